//! Test utilities for helmsman-link.
//!
//! Provides [`MockEngine`], an in-memory engine implementation that
//! interprets the statement vocabulary the orchestrator emits: table DDL,
//! inserts, conditional updates, filtered/ordered selects (including the
//! `value[0]` projection and `REGEX(key, …)` predicate), and
//! `SHOW STATUS LIKE` against scripted status variables. Replication-group
//! DDL is accepted and recorded in a command log so tests can assert on the
//! exact text sent to the engine.
//!
//! Failures are scripted by substring match: any request containing a
//! registered needle fails with the registered error, which drives the
//! queue's error and race-lost paths in component tests.

use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::client::{EngineClient, EngineSettings};
use crate::error::Result;
use crate::response::{Response, Row, StatementResult};

#[derive(Default)]
struct MockState {
    /// Table name (cluster prefix stripped) to rows.
    tables: HashMap<String, Vec<Row>>,
    /// Scripted `SHOW STATUS` variables.
    status_vars: HashMap<String, String>,
    /// Substring to error message; matched requests fail.
    failures: Vec<(String, String)>,
    /// Every request text, in order.
    log: Vec<String>,
}

/// In-memory engine for component tests.
pub struct MockEngine {
    state: Mutex<MockState>,
    settings: EngineSettings,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            settings: EngineSettings::default(),
        }
    }

    pub fn with_data_dir(data_dir: std::path::PathBuf) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            settings: EngineSettings {
                data_dir: Some(data_dir),
            },
        }
    }

    /// Pre-create a table without going through DDL.
    pub fn create_table(&self, name: &str) {
        self.state
            .lock()
            .tables
            .insert(normalize_table(name).to_string(), Vec::new());
    }

    /// Script a `SHOW STATUS` variable.
    pub fn set_status_var(&self, name: &str, value: &str) {
        self.state
            .lock()
            .status_vars
            .insert(name.to_string(), value.to_string());
    }

    /// Fail every request containing `needle` with `error`.
    pub fn fail_matching(&self, needle: &str, error: &str) {
        self.state
            .lock()
            .failures
            .push((needle.to_string(), error.to_string()));
    }

    /// Drop all scripted failures.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Snapshot of a table's rows.
    pub fn table_rows(&self, name: &str) -> Vec<Row> {
        self.state
            .lock()
            .tables
            .get(normalize_table(name))
            .cloned()
            .unwrap_or_default()
    }

    /// Mutate a table's rows directly (e.g., to fabricate retry counts).
    pub fn mutate_table(&self, name: &str, f: impl FnOnce(&mut Vec<Row>)) {
        let mut state = self.state.lock();
        if let Some(rows) = state.tables.get_mut(normalize_table(name)) {
            f(rows);
        }
    }

    /// All requests sent so far.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Requests containing the given fragment.
    pub fn requests_matching(&self, fragment: &str) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|q| q.contains(fragment))
            .cloned()
            .collect()
    }

    fn execute(&self, query: &str) -> Response {
        let q = query.trim();
        let mut state = self.state.lock();
        state.log.push(q.to_string());

        for (needle, error) in &state.failures {
            if q.contains(needle.as_str()) {
                return Response::with_error(error.clone());
            }
        }

        let upper = q.to_uppercase();
        if upper.starts_with("SHOW STATUS LIKE") {
            return show_status(&state, q);
        }
        if upper.starts_with("CREATE TABLE") {
            return create_table_stmt(&mut state, q);
        }
        if upper.starts_with("INSERT INTO") {
            return insert_stmt(&mut state, q);
        }
        if upper.starts_with("UPDATE ") {
            return update_stmt(&mut state, q);
        }
        if upper.starts_with("SELECT ") {
            return select_stmt(&state, q);
        }
        const CLUSTER_VERBS: [&str; 5] = [
            "CREATE CLUSTER",
            "JOIN CLUSTER",
            "ALTER CLUSTER",
            "DELETE CLUSTER",
            "SET CLUSTER",
        ];
        if CLUSTER_VERBS.iter().any(|v| upper.starts_with(v)) {
            return Response::ok();
        }
        Response::with_error(format!("unsupported statement: {}", q))
    }
}

impl EngineClient for MockEngine {
    fn send_request(&self, query: &str) -> Result<Response> {
        Ok(self.execute(query))
    }

    fn has_table(&self, table: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .tables
            .contains_key(normalize_table(table)))
    }

    fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

/// Strip a replication-group prefix: "c1:sharding_queue" -> "sharding_queue".
fn normalize_table(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

fn strip_ticks(s: &str) -> &str {
    s.trim().trim_matches('`')
}

/// First token of `s` (up to whitespace or '('), backticks stripped.
fn take_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let end = s
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(s.len());
    (strip_ticks(&s[..end]), &s[end..])
}

/// Split on `sep` outside single-quoted literals.
fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => {
                current.push(c);
                escaped = true;
            }
            '\'' => {
                current.push(c);
                in_quote = !in_quote;
            }
            c if c == sep && !in_quote => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Parse a statement literal: quoted string (unescaped) or integer.
fn parse_literal(s: &str) -> Value {
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return Value::String(unescape(inner));
    }
    if let Ok(n) = s.parse::<i64>() {
        return Value::Number(n.into());
    }
    Value::String(s.to_string())
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cell_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

enum Cond {
    Cmp {
        col: String,
        op: &'static str,
        val: Value,
    },
    Regex {
        col: String,
        pattern: String,
    },
}

fn parse_conditions(clause: &str) -> Vec<Cond> {
    clause
        .split(" AND ")
        .filter_map(|part| parse_condition(part.trim()))
        .collect()
}

fn parse_condition(s: &str) -> Option<Cond> {
    let upper = s.to_uppercase();
    if upper.starts_with("REGEX(") {
        let inner = &s[s.find('(')? + 1..s.rfind(')')?];
        let args = split_top_level(inner, ',');
        if args.len() != 2 {
            return None;
        }
        let pattern = match parse_literal(&args[1]) {
            Value::String(p) => p,
            other => cell_text(&other),
        };
        return Some(Cond::Regex {
            col: strip_ticks(&args[0]).to_string(),
            pattern,
        });
    }
    for op in ["<>", "=", "<"] {
        if let Some(idx) = s.find(op) {
            let col = strip_ticks(&s[..idx]).to_string();
            let val = parse_literal(&s[idx + op.len()..]);
            return Some(Cond::Cmp { col, op, val });
        }
    }
    None
}

fn matches_conditions(row: &Row, conds: &[Cond]) -> bool {
    conds.iter().all(|cond| match cond {
        Cond::Cmp { col, op, val } => {
            let Some(cell) = row.get(col) else {
                return false;
            };
            match *op {
                "=" => cell_text(cell) == cell_text(val),
                "<>" => cell_text(cell) != cell_text(val),
                "<" => match (cell_i64(cell), cell_i64(val)) {
                    (Some(a), Some(b)) => a < b,
                    _ => false,
                },
                _ => false,
            }
        }
        Cond::Regex { col, pattern } => {
            let Some(cell) = row.get(col) else {
                return false;
            };
            Regex::new(pattern)
                .map(|re| re.is_match(&cell_text(cell)))
                .unwrap_or(false)
        }
    })
}

fn show_status(state: &MockState, q: &str) -> Response {
    let Some(start) = q.find('\'') else {
        return Response::with_error("malformed SHOW STATUS");
    };
    let Some(end) = q.rfind('\'') else {
        return Response::with_error("malformed SHOW STATUS");
    };
    let var = &q[start + 1..end];
    match state.status_vars.get(var) {
        Some(value) => {
            let mut row = Row::new();
            row.insert("Counter".to_string(), Value::String(var.to_string()));
            row.insert("Value".to_string(), Value::String(value.clone()));
            Response::with_data(vec![row])
        }
        None => Response::with_data(Vec::new()),
    }
}

fn create_table_stmt(state: &mut MockState, q: &str) -> Response {
    let rest = &q["CREATE TABLE".len()..];
    let (table, _) = take_token(rest);
    let table = normalize_table(table).to_string();
    if state.tables.contains_key(&table) {
        return Response::with_error(format!("table '{}' already exists", table));
    }
    state.tables.insert(table, Vec::new());
    Response::ok()
}

fn insert_stmt(state: &mut MockState, q: &str) -> Response {
    let rest = &q["INSERT INTO".len()..];
    let (table, rest) = take_token(rest);
    let table = normalize_table(table).to_string();

    let Some(cols_open) = rest.find('(') else {
        return Response::with_error("malformed INSERT: missing column list");
    };
    let Some(cols_close) = rest[cols_open..].find(')') else {
        return Response::with_error("malformed INSERT: missing column list");
    };
    let cols: Vec<String> = rest[cols_open + 1..cols_open + cols_close]
        .split(',')
        .map(|c| strip_ticks(c).to_string())
        .collect();

    let after_cols = &rest[cols_open + cols_close + 1..];
    let upper = after_cols.to_uppercase();
    let Some(values_at) = upper.find("VALUES") else {
        return Response::with_error("malformed INSERT: missing VALUES");
    };
    let tail = &after_cols[values_at + "VALUES".len()..];
    let Some(vals_open) = tail.find('(') else {
        return Response::with_error("malformed INSERT: missing value list");
    };
    let Some(vals_close) = tail.rfind(')') else {
        return Response::with_error("malformed INSERT: missing value list");
    };
    let values: Vec<Value> = split_top_level(&tail[vals_open + 1..vals_close], ',')
        .iter()
        .map(|v| parse_literal(v))
        .collect();

    if values.len() != cols.len() {
        return Response::with_error(format!(
            "column/value count mismatch: {} vs {}",
            cols.len(),
            values.len()
        ));
    }

    let Some(rows) = state.tables.get_mut(&table) else {
        return Response::with_error(format!("unknown table '{}'", table));
    };
    rows.push(cols.into_iter().zip(values).collect());
    Response::affected(1)
}

fn update_stmt(state: &mut MockState, q: &str) -> Response {
    let rest = &q["UPDATE ".len()..];
    let (table, rest) = take_token(rest);
    let table = normalize_table(table).to_string();

    let upper = rest.to_uppercase();
    let Some(set_at) = upper.find(" SET ") else {
        return Response::with_error("malformed UPDATE: missing SET");
    };
    let Some(where_at) = upper.rfind(" WHERE ") else {
        return Response::with_error("malformed UPDATE: missing WHERE");
    };
    let assignments: Vec<(String, Value)> =
        split_top_level(&rest[set_at + " SET ".len()..where_at], ',')
            .iter()
            .filter_map(|a| {
                let idx = a.find('=')?;
                Some((
                    strip_ticks(&a[..idx]).to_string(),
                    parse_literal(&a[idx + 1..]),
                ))
            })
            .collect();
    let conds = parse_conditions(&rest[where_at + " WHERE ".len()..]);

    let Some(rows) = state.tables.get_mut(&table) else {
        return Response::with_error(format!("unknown table '{}'", table));
    };
    let mut affected = 0u64;
    for row in rows.iter_mut() {
        if matches_conditions(row, &conds) {
            for (col, val) in &assignments {
                row.insert(col.clone(), val.clone());
            }
            affected += 1;
        }
    }
    Response::affected(affected)
}

fn select_stmt(state: &MockState, q: &str) -> Response {
    let body = &q["SELECT ".len()..];
    let Some(from_at) = body.find(" FROM ") else {
        return Response::with_error("malformed SELECT: missing FROM");
    };
    let projection = body[..from_at].trim();
    let rest = &body[from_at + " FROM ".len()..];
    let (table, rest) = take_token(rest);
    let table = normalize_table(table).to_string();

    let upper = rest.to_uppercase();
    let where_at = upper.find(" WHERE ");
    let order_at = upper.find(" ORDER BY ");
    let limit_at = upper.find(" LIMIT ");
    let clause_end = order_at.or(limit_at).unwrap_or(rest.len());

    let conds = match where_at {
        Some(at) => parse_conditions(&rest[at + " WHERE ".len()..clause_end]),
        None => Vec::new(),
    };

    let Some(rows) = state.tables.get(&table) else {
        return Response::with_error(format!("unknown table '{}'", table));
    };
    let mut matched: Vec<Row> = rows
        .iter()
        .filter(|row| matches_conditions(row, &conds))
        .cloned()
        .collect();

    if order_at.is_some() {
        matched.sort_by_key(|row| row.get("id").and_then(cell_i64).unwrap_or(0));
    }
    if let Some(at) = limit_at {
        if let Ok(limit) = rest[at + " LIMIT ".len()..].trim().parse::<usize>() {
            matched.truncate(limit);
        }
    }

    let projected: Vec<Row> = matched.iter().map(|row| project(projection, row)).collect();
    Response {
        results: vec![StatementResult::with_data(projected)],
    }
}

fn project(projection: &str, row: &Row) -> Row {
    if projection == "*" {
        return row.clone();
    }
    let mut out = Row::new();
    for item in split_top_level(projection, ',') {
        let lower = item.to_lowercase();
        if lower.starts_with("value[0]") {
            out.insert("value".to_string(), project_value0(row.get("value")));
        } else {
            let col = strip_ticks(&item).to_string();
            if let Some(cell) = row.get(&col) {
                out.insert(col, cell.clone());
            }
        }
    }
    out
}

/// Emulate the engine's `value[0]` projection over an array-wrapped JSON
/// column: strings come back raw, everything else as JSON text.
fn project_value0(cell: Option<&Value>) -> Value {
    let text = match cell {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => return Value::Null,
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(items)) => match items.into_iter().next() {
            Some(Value::String(s)) => Value::String(s),
            Some(other) => Value::String(other.to_string()),
            None => Value::Null,
        },
        Ok(other) => Value::String(other.to_string()),
        Err(_) => Value::String(text),
    }
}
