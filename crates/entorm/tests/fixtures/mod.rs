//! Shared test fixtures: an in-memory [`Connection`] that understands
//! the SQL the engine emits for the SQLite dialect, plus a pre-wired
//! registry with sales-order definitions.

#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use entorm::{
    Connection, DefId, Dialect, Error, FieldId, Registry, RegistryOptions, Result, Row,
    SequenceTokenSource, Value,
};

#[derive(Clone)]
struct MemIndex {
    name: String,
    columns: Vec<String>,
    unique: bool,
}

#[derive(Clone, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<HashMap<String, Value>>,
    indexes: Vec<MemIndex>,
}

/// In-memory backend for one registry. Tables are maps of column name to
/// value; transactions snapshot and restore the whole store.
pub struct MemoryConnection {
    tables: HashMap<String, Table>,
    snapshot: Option<HashMap<String, Table>>,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
            snapshot: None,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::backend("memory", format!("no such table {name}")))
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::backend("memory", format!("no such table {name}")))
    }
}

impl Default for MemoryConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for MemoryConnection {
    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.log.lock().push(sql.to_string());
        if let Some(rest) = sql.strip_prefix("create table if not exists ") {
            let name = rest
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .trim_end_matches('(');
            self.tables.entry(name.to_string()).or_insert_with(|| Table {
                columns: vec!["ref".to_string()],
                ..Table::default()
            });
            return Ok(0);
        }
        if let Some(rest) = sql.strip_prefix("alter table ") {
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            // alter table {t} add column {col} {type..}
            if tokens.len() >= 5 && tokens[1] == "add" && tokens[2] == "column" {
                let (name, col) = (tokens[0].to_string(), tokens[3].to_string());
                let table = self.table_mut(&name)?;
                if !table.columns.contains(&col) {
                    table.columns.push(col);
                }
                return Ok(0);
            }
            return Err(Error::backend("memory", format!("unsupported: {sql}")));
        }
        if sql.starts_with("create index ") || sql.starts_with("create unique index ") {
            let head_len = sql.find('(').unwrap_or(sql.len());
            let tokens: Vec<&str> = sql[..head_len].split_whitespace().collect();
            let unique = tokens[1] == "unique";
            let (name_pos, table_pos) = if unique { (3, 5) } else { (2, 4) };
            let index = MemIndex {
                name: tokens[name_pos].to_string(),
                columns: inside_parens(&sql[head_len..])
                    .split(", ")
                    .map(str::to_string)
                    .collect(),
                unique,
            };
            let table = self.table_mut(tokens[table_pos])?;
            if !table.indexes.iter().any(|i| i.name == index.name) {
                table.indexes.push(index);
            }
            return Ok(0);
        }
        if let Some(name) = sql.strip_prefix("drop index ") {
            let name = name.trim();
            for table in self.tables.values_mut() {
                table.indexes.retain(|i| i.name != name);
            }
            return Ok(0);
        }
        if let Some(rest) = sql.strip_prefix("insert into ") {
            let values_pos = find_quoted(rest, " values ")
                .ok_or_else(|| Error::backend("memory", format!("bad insert: {sql}")))?;
            let head = &rest[..values_pos];
            let open = head.find('(').unwrap_or(head.len());
            let name = head[..open].trim().to_string();
            let cols: Vec<String> = inside_parens(&head[open..])
                .split(", ")
                .map(str::to_string)
                .collect();
            let vals = split_quoted(inside_parens(&rest[values_pos + 8..]), ", ");
            let table = self.table_mut(&name)?;
            let mut row = HashMap::new();
            for (col, lit) in cols.iter().zip(&vals) {
                row.insert(col.clone(), parse_literal(lit));
            }
            table.rows.push(row);
            return Ok(1);
        }
        if let Some(rest) = sql.strip_prefix("update ") {
            let set_pos = find_quoted(rest, " set ")
                .ok_or_else(|| Error::backend("memory", format!("bad update: {sql}")))?;
            let name = rest[..set_pos].trim().to_string();
            let tail = &rest[set_pos + 5..];
            let (assignments, conds) = match find_quoted(tail, " where ") {
                Some(p) => (&tail[..p], parse_conds(&tail[p + 7..])),
                None => (tail, Vec::new()),
            };
            let sets: Vec<(String, Value)> = split_quoted(assignments, ", ")
                .iter()
                .filter_map(|a| {
                    a.split_once(" = ")
                        .map(|(col, lit)| (col.trim().to_string(), parse_literal(lit)))
                })
                .collect();
            let table = self.table_mut(&name)?;
            let mut affected = 0;
            for row in &mut table.rows {
                if row_matches(row, &conds) {
                    for (col, value) in &sets {
                        row.insert(col.clone(), value.clone());
                    }
                    affected += 1;
                }
            }
            return Ok(affected);
        }
        if let Some(rest) = sql.strip_prefix("delete from ") {
            let (name, conds) = match find_quoted(rest, " where ") {
                Some(p) => (rest[..p].trim().to_string(), parse_conds(&rest[p + 7..])),
                None => (rest.trim().to_string(), Vec::new()),
            };
            let table = self.table_mut(&name)?;
            let before = table.rows.len();
            table.rows.retain(|row| !row_matches(row, &conds));
            return Ok((before - table.rows.len()) as u64);
        }
        Err(Error::backend("memory", format!("unsupported: {sql}")))
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.log.lock().push(sql.to_string());
        if let Some(rest) = sql.strip_prefix("PRAGMA table_info(") {
            let name = rest.trim_end_matches(')');
            let columns = self
                .tables
                .get(name)
                .map(|t| t.columns.clone())
                .unwrap_or_default();
            return Ok(columns
                .into_iter()
                .enumerate()
                .map(|(i, col)| {
                    Row::new(
                        vec![
                            "cid".to_string(),
                            "name".to_string(),
                            "type".to_string(),
                            "notnull".to_string(),
                            "dflt_value".to_string(),
                            "pk".to_string(),
                        ],
                        vec![
                            Value::Int(i as i64),
                            Value::Text(col),
                            Value::Text("text".to_string()),
                            Value::Int(0),
                            Value::Null,
                            Value::Int(i64::from(i == 0)),
                        ],
                    )
                })
                .collect());
        }
        if let Some(rest) = sql.strip_prefix("PRAGMA index_list(") {
            let name = rest.trim_end_matches(')');
            let indexes = self
                .tables
                .get(name)
                .map(|t| t.indexes.clone())
                .unwrap_or_default();
            return Ok(indexes
                .into_iter()
                .enumerate()
                .map(|(i, index)| {
                    Row::new(
                        vec![
                            "seq".to_string(),
                            "name".to_string(),
                            "unique".to_string(),
                            "origin".to_string(),
                            "partial".to_string(),
                        ],
                        vec![
                            Value::Int(i as i64),
                            Value::Text(index.name),
                            Value::Int(i64::from(index.unique)),
                            Value::Text("c".to_string()),
                            Value::Int(0),
                        ],
                    )
                })
                .collect());
        }
        if let Some(rest) = sql.strip_prefix("PRAGMA index_info(") {
            let name = rest.trim_end_matches(')');
            let index = self
                .tables
                .values()
                .flat_map(|t| t.indexes.iter())
                .find(|i| i.name == name);
            let columns = index.map(|i| i.columns.clone()).unwrap_or_default();
            return Ok(columns
                .into_iter()
                .enumerate()
                .map(|(i, col)| {
                    Row::new(
                        vec!["seqno".to_string(), "cid".to_string(), "name".to_string()],
                        vec![Value::Int(i as i64), Value::Int(i as i64), Value::Text(col)],
                    )
                })
                .collect());
        }
        if let Some(rest) = sql.strip_prefix("select count(*) as total from ") {
            let (name, conds) = match find_quoted(rest, " where ") {
                Some(p) => (rest[..p].trim(), parse_conds(&rest[p + 7..])),
                None => (rest.trim(), Vec::new()),
            };
            let total = self
                .table(name)?
                .rows
                .iter()
                .filter(|row| row_matches(row, &conds))
                .count();
            return Ok(vec![Row::new(
                vec!["total".to_string()],
                vec![Value::Int(total as i64)],
            )]);
        }
        if let Some(rest) = sql.strip_prefix("select ") {
            let from_pos = find_quoted(rest, " from ")
                .ok_or_else(|| Error::backend("memory", format!("bad select: {sql}")))?;
            let cols: Vec<String> = rest[..from_pos].split(", ").map(str::to_string).collect();
            let mut tail = &rest[from_pos + 6..];
            let mut limit = None;
            if let Some(p) = find_quoted(tail, " limit ") {
                limit = Some(tail[p + 7..].to_string());
                tail = &tail[..p];
            }
            let mut order = None;
            if let Some(p) = find_quoted(tail, " order by ") {
                order = Some(tail[p + 10..].to_string());
                tail = &tail[..p];
            }
            let conds = match find_quoted(tail, " where ") {
                Some(p) => {
                    let c = parse_conds(&tail[p + 7..]);
                    tail = &tail[..p];
                    c
                }
                None => Vec::new(),
            };
            let name = tail.trim();
            let mut rows: Vec<HashMap<String, Value>> = self
                .table(name)?
                .rows
                .iter()
                .filter(|row| row_matches(row, &conds))
                .cloned()
                .collect();
            if let Some(order) = order {
                let terms: Vec<(String, bool)> = order
                    .split(", ")
                    .map(|t| {
                        let t = t.trim();
                        t.strip_suffix(" desc")
                            .map_or((t.to_string(), false), |c| (c.to_string(), true))
                    })
                    .collect();
                rows.sort_by(|a, b| {
                    for (col, desc) in &terms {
                        let ord = cmp_values(
                            a.get(col).unwrap_or(&Value::Null),
                            b.get(col).unwrap_or(&Value::Null),
                        );
                        if ord != Ordering::Equal {
                            return if *desc { ord.reverse() } else { ord };
                        }
                    }
                    Ordering::Equal
                });
            }
            if let Some(limit) = limit {
                // {size} offset {offset}
                let parts: Vec<&str> = limit.split_whitespace().collect();
                let size: usize = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
                let offset: usize = parts.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
                rows = rows.into_iter().skip(offset).take(size).collect();
            }
            return Ok(rows
                .into_iter()
                .map(|row| {
                    let values = cols
                        .iter()
                        .map(|col| {
                            if col == "1" {
                                Value::Int(1)
                            } else {
                                row.get(col).cloned().unwrap_or(Value::Null)
                            }
                        })
                        .collect();
                    Row::new(cols.clone(), values)
                })
                .collect());
        }
        Err(Error::backend("memory", format!("unsupported: {sql}")))
    }

    fn begin(&mut self) -> Result<()> {
        if self.snapshot.is_some() {
            return Err(Error::backend("memory", "transaction already open"));
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.snapshot.take().is_none() {
            return Err(Error::backend("memory", "no open transaction"));
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        match self.snapshot.take() {
            Some(snapshot) => {
                self.tables = snapshot;
                Ok(())
            }
            None => Err(Error::backend("memory", "no open transaction")),
        }
    }
}

// -----------------------------------------------------------------------
// mini SQL helpers
// -----------------------------------------------------------------------

/// Find `needle` in `haystack` outside single-quoted regions.
fn find_quoted(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            in_quote = !in_quote;
        } else if !in_quote && haystack[i..].starts_with(needle) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Split on `sep` outside single-quoted regions.
fn split_quoted(s: &str, sep: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = s;
    while let Some(p) = find_quoted(rest, sep) {
        parts.push(rest[..p].to_string());
        rest = &rest[p + sep.len()..];
    }
    parts.push(rest.to_string());
    parts
}

fn inside_parens(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .unwrap_or(s)
}

fn parse_literal(lit: &str) -> Value {
    let lit = lit.trim();
    match lit {
        "NULL" => Value::Null,
        "TRUE" => Value::Bool(true),
        "FALSE" => Value::Bool(false),
        _ => {
            if let Some(inner) = lit.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
                Value::Text(inner.replace("''", "'"))
            } else if lit.contains('.') {
                Value::Float(lit.parse().unwrap_or(0.0))
            } else {
                Value::Int(lit.parse().unwrap_or(0))
            }
        }
    }
}

#[derive(Debug)]
enum Cond {
    Cmp(String, &'static str, Value),
    Null(String, bool),
}

fn parse_conds(s: &str) -> Vec<Cond> {
    split_quoted(s.trim(), " and ")
        .into_iter()
        .map(|c| {
            let c = c.trim().to_string();
            if let Some(col) = c.strip_suffix(" is not null") {
                return Cond::Null(col.trim().to_string(), true);
            }
            if let Some(col) = c.strip_suffix(" is null") {
                return Cond::Null(col.trim().to_string(), false);
            }
            for op in ["<>", ">=", "<=", "=", ">", "<"] {
                let needle = format!(" {op} ");
                if let Some(p) = find_quoted(&c, &needle) {
                    let col = c[..p].trim().to_string();
                    let lit = parse_literal(&c[p + needle.len()..]);
                    return Cond::Cmp(col, op, lit);
                }
            }
            panic!("unsupported condition: {c}");
        })
        .collect()
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Int(x), Value::Float(y)) => {
            (*x as f64).partial_cmp(y).unwrap_or(Ordering::Equal)
        }
        (Value::Float(x), Value::Int(y)) => {
            x.partial_cmp(&(*y as f64)).unwrap_or(Ordering::Equal)
        }
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn row_matches(row: &HashMap<String, Value>, conds: &[Cond]) -> bool {
    conds.iter().all(|cond| match cond {
        Cond::Null(col, negated) => {
            let is_null = matches!(row.get(col), None | Some(Value::Null));
            is_null != *negated
        }
        Cond::Cmp(col, op, expected) => {
            let actual = row.get(col).unwrap_or(&Value::Null);
            if matches!(actual, Value::Null) || matches!(expected, Value::Null) {
                return false;
            }
            let ord = cmp_values(actual, expected);
            match *op {
                "=" => ord == Ordering::Equal,
                "<>" => ord != Ordering::Equal,
                ">" => ord == Ordering::Greater,
                ">=" => ord != Ordering::Less,
                "<" => ord == Ordering::Less,
                "<=" => ord != Ordering::Greater,
                _ => false,
            }
        }
    })
}

// -----------------------------------------------------------------------
// pre-wired registry
// -----------------------------------------------------------------------

/// A registry over a [`MemoryConnection`] with sales-order definitions
/// already registered and reconciled.
pub struct Mock {
    pub registry: Registry,
    pub orders: DefId,
    pub number: FieldId,
    pub total: FieldId,
    pub posted_at: FieldId,
    pub lines: DefId,
    pub line_order: FieldId,
    pub qty: FieldId,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl Mock {
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::new(Dialect::Sqlite))
    }

    pub fn with_options(options: RegistryOptions) -> Self {
        let conn = MemoryConnection::new();
        let log = conn.log.clone();
        let mut registry = Registry::with_token_source(
            Box::new(conn),
            options,
            Arc::new(SequenceTokenSource::starting_at(1)),
        );

        let orders = registry.define("SalesOrder").unwrap();
        let def = registry.def_mut(orders);
        let number = def.add_text_field("Number", 20).unwrap();
        let total = def.add_numeric_field("Total", 15, 2).unwrap();
        let posted_at = def.add_datetime_field("PostedAt").unwrap();
        def.add_index(&[number], true).unwrap();

        let lines = registry.define("SalesOrderLine").unwrap();
        let def = registry.def_mut(lines);
        let line_order = def.add_reference_field("OrderRef", orders).unwrap();
        let qty = def.add_integer_field("Qty").unwrap();
        def.add_index(&[line_order], false).unwrap();

        let failures = registry.reconcile_all();
        assert!(failures.is_empty(), "reconcile failed: {failures:?}");

        Self {
            registry,
            orders,
            number,
            total,
            posted_at,
            lines,
            line_order,
            qty,
            log,
        }
    }

    /// Statements issued so far.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

impl Default for Mock {
    fn default() -> Self {
        Self::new()
    }
}
