//! Structure reconciliation against the in-memory backend.

mod fixtures;

use std::sync::Arc;

use entorm::{Connection, Dialect, Registry, RegistryOptions, SequenceTokenSource};
use fixtures::{MemoryConnection, Mock};

#[test]
fn test_initial_reconcile_creates_tables_and_indexes() {
    let m = Mock::new();
    let statements = m.statements();
    assert!(statements
        .iter()
        .any(|s| s.starts_with("create table if not exists salesorder ")));
    assert!(statements
        .iter()
        .any(|s| s.starts_with("create table if not exists salesorderline ")));
    assert!(statements
        .iter()
        .any(|s| s == "create unique index salesorder_idx_by_number__uniq on salesorder (number)"));
    assert!(statements
        .iter()
        .any(|s| s == "create index salesorderline_idx_by_orderref on salesorderline (orderref)"));
    // Every declared column was added.
    for col in ["isdeleted", "dataversion", "number", "total", "postedat"] {
        assert!(
            statements
                .iter()
                .any(|s| s.starts_with(&format!("alter table salesorder add column {col} "))),
            "missing column {col}"
        );
    }
}

#[test]
fn test_reconcile_is_idempotent() {
    let m = Mock::new();
    let before = m.statements().len();
    let failures = m.registry.reconcile_all();
    assert!(failures.is_empty());
    // The second pass only inspects; nothing is altered, dropped, or
    // indexed again.
    let all = m.statements();
    for s in &all[before..] {
        assert!(
            s.starts_with("create table if not exists") || s.starts_with("PRAGMA"),
            "unexpected mutation: {s}"
        );
    }
}

#[test]
fn test_reconcile_adds_columns_for_new_fields() {
    let mut m = Mock::new();
    m.registry
        .def_mut(m.orders)
        .add_text_field("Comment", 250)
        .unwrap();
    m.registry.reconcile(m.orders).unwrap();
    assert!(m
        .statements()
        .iter()
        .any(|s| s == "alter table salesorder add column comment varchar(250)"));
}

#[test]
fn test_reconcile_drops_stale_managed_indexes_only() {
    let mut conn = MemoryConnection::new();
    conn.execute("create table if not exists salesorder (ref varchar(107) not null primary key)")
        .unwrap();
    conn.execute("create index salesorder_idx_by_stale on salesorder (number)")
        .unwrap();
    conn.execute("create index handmade_index on salesorder (number)")
        .unwrap();
    let log = conn.log.clone();

    let mut registry = Registry::with_token_source(
        Box::new(conn),
        RegistryOptions::new(Dialect::Sqlite),
        Arc::new(SequenceTokenSource::starting_at(1)),
    );
    let orders = registry.define("SalesOrder").unwrap();
    let number = registry.def_mut(orders).add_text_field("Number", 20).unwrap();
    registry.def_mut(orders).add_index(&[number], false).unwrap();
    registry.reconcile(orders).unwrap();

    let statements = log.lock().clone();
    assert!(statements
        .iter()
        .any(|s| s == "drop index salesorder_idx_by_stale"));
    assert!(!statements.iter().any(|s| s.contains("drop index handmade_index")));
    assert!(statements
        .iter()
        .any(|s| s == "create index salesorder_idx_by_number on salesorder (number)"));
}

#[test]
fn test_reconcile_rebuilds_index_with_wrong_shape() {
    let mut conn = MemoryConnection::new();
    conn.execute("create table if not exists salesorder (ref varchar(107) not null primary key)")
        .unwrap();
    // Same managed name, but non-unique and on the wrong column.
    conn.execute("create index salesorder_idx_by_number__uniq on salesorder (comment)")
        .unwrap();
    let log = conn.log.clone();

    let mut registry = Registry::with_token_source(
        Box::new(conn),
        RegistryOptions::new(Dialect::Sqlite),
        Arc::new(SequenceTokenSource::starting_at(1)),
    );
    let orders = registry.define("SalesOrder").unwrap();
    let number = registry.def_mut(orders).add_text_field("Number", 20).unwrap();
    registry.def_mut(orders).add_index(&[number], true).unwrap();
    registry.reconcile(orders).unwrap();

    let statements = log.lock().clone();
    assert!(statements
        .iter()
        .any(|s| s == "drop index salesorder_idx_by_number__uniq"));
    assert!(statements
        .iter()
        .any(|s| s == "create unique index salesorder_idx_by_number__uniq on salesorder (number)"));
}

#[test]
fn test_reconcile_new_index_on_existing_table() {
    let mut m = Mock::new();
    let def = m.registry.def_mut(m.orders);
    let posted = def.field_by_name("PostedAt").unwrap().id;
    def.add_index(&[posted], false).unwrap();
    m.registry.reconcile(m.orders).unwrap();
    assert!(m
        .statements()
        .iter()
        .any(|s| s == "create index salesorder_idx_by_postedat on salesorder (postedat)"));
}
