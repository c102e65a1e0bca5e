//! # helmsman-link
//!
//! The seam between the sharding orchestrator and the storage engine it
//! drives. The orchestrator never talks to the engine directly; it builds
//! literal administrative statements and hands them to an [`EngineClient`],
//! which returns tabular [`Response`] blocks.
//!
//! This crate ships:
//! - the [`EngineClient`] trait and its [`EngineSettings`]
//! - the [`Response`] / [`StatementResult`] result model
//! - [`escape_value`], the minimal literal escaping applied before embedding
//!   values into statements
//! - [`test_utils::MockEngine`], an in-memory engine that interprets the
//!   orchestrator's statement vocabulary for component tests
//!
//! The real client (HTTP or native protocol) lives in the host daemon; only
//! the contract is defined here.

pub mod client;
pub mod error;
pub mod escape;
pub mod response;
pub mod test_utils;

pub use client::{EngineClient, EngineSettings};
pub use error::{LinkError, Result};
pub use escape::escape_value;
pub use response::{Response, Row, StatementResult};
