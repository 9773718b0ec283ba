//! Table reconciliation per dialect.

use entorm_core::dialect::REF_DOMAIN_NAME;
use entorm_core::{Connection, Dialect, EntityDef, Result, REF_COLUMN_LEN};
use tracing::debug;

/// Create the database-level reference type where the dialect supports
/// one. Postgres gets a domain, MSSQL a user-defined type; MySQL and
/// SQLite inline a varchar instead and need nothing here.
pub fn ensure_ref_column_type(conn: &mut dyn Connection, dialect: Dialect) -> Result<()> {
    match dialect {
        Dialect::Postgres => {
            let probe = format!(
                "select 1 from pg_type where typname = '{REF_DOMAIN_NAME}'"
            );
            if conn.query(&probe)?.is_empty() {
                debug!(dialect = %dialect, "creating reference domain");
                conn.execute(&format!(
                    "create domain {REF_DOMAIN_NAME} as varchar({REF_COLUMN_LEN})"
                ))?;
            }
        }
        Dialect::Mssql => {
            let probe = format!(
                "select 1 from sys.types where name = '{REF_DOMAIN_NAME}'"
            );
            if conn.query(&probe)?.is_empty() {
                debug!(dialect = %dialect, "creating reference type");
                conn.execute(&format!(
                    "create type {REF_DOMAIN_NAME} from nvarchar({REF_COLUMN_LEN})"
                ))?;
            }
        }
        Dialect::Mysql | Dialect::Sqlite => {}
    }
    Ok(())
}

/// Converge the backing table of `def` toward its declared shape.
///
/// Missing tables and columns are created; on Postgres the column type
/// is also re-asserted so widened declarations take effect. Columns are
/// never dropped.
pub fn ensure_table(conn: &mut dyn Connection, dialect: Dialect, def: &EntityDef) -> Result<()> {
    let table = def.sql_table_name();
    debug!(table, dialect = %dialect, "reconciling table");
    match dialect {
        Dialect::Postgres => ensure_table_postgres(conn, def, table),
        Dialect::Mssql => ensure_table_mssql(conn, def, table),
        Dialect::Mysql => ensure_table_mysql(conn, def, table),
        Dialect::Sqlite => ensure_table_sqlite(conn, def, table),
    }
}

fn ensure_table_postgres(
    conn: &mut dyn Connection,
    def: &EntityDef,
    table: &str,
) -> Result<()> {
    conn.execute(&format!("create table if not exists {table} ()"))?;
    for field in def.fields() {
        let col = field.sql_name();
        let ty = field.kind.column_type(Dialect::Postgres);
        conn.execute(&format!(
            "alter table {table} add column if not exists {col} {ty}"
        ))?;
        conn.execute(&format!(
            "alter table {table} alter column {col} type {ty}"
        ))?;
    }
    let pk_probe = format!(
        "select 1 from information_schema.constraint_column_usage \
         where table_name = '{table}' and constraint_name = '{table}_pk'"
    );
    if conn.query(&pk_probe)?.is_empty() {
        conn.execute(&format!(
            "alter table {table} add constraint {table}_pk primary key (ref)"
        ))?;
    }
    Ok(())
}

fn ensure_table_mssql(conn: &mut dyn Connection, def: &EntityDef, table: &str) -> Result<()> {
    conn.execute(&format!(
        "if not exists (select * from sysobjects where name = '{table}' and xtype = 'U') \
         create table {table} (ref {REF_DOMAIN_NAME} not null primary key)"
    ))?;
    for field in def.fields() {
        let col = field.sql_name();
        if col == "ref" {
            continue;
        }
        let ty = field.kind.column_type(Dialect::Mssql);
        conn.execute(&format!(
            "if not exists (select * from syscolumns \
             where id = object_id('{table}') and name = '{col}') \
             alter table {table} add {col} {ty}"
        ))?;
    }
    Ok(())
}

fn ensure_table_mysql(conn: &mut dyn Connection, def: &EntityDef, table: &str) -> Result<()> {
    conn.execute(&format!(
        "create table if not exists {table} \
         (ref varchar({REF_COLUMN_LEN}) not null, primary key (ref))"
    ))?;
    for field in def.fields() {
        let col = field.sql_name();
        if col == "ref" {
            continue;
        }
        let probe = format!(
            "select 1 from INFORMATION_SCHEMA.columns \
             where table_name = '{table}' and column_name = '{col}' \
             and table_schema = database()"
        );
        if conn.query(&probe)?.is_empty() {
            let ty = field.kind.column_type(Dialect::Mysql);
            conn.execute(&format!("alter table {table} add column {col} {ty}"))?;
        }
    }
    Ok(())
}

fn ensure_table_sqlite(conn: &mut dyn Connection, def: &EntityDef, table: &str) -> Result<()> {
    conn.execute(&format!(
        "create table if not exists {table} \
         (ref varchar({REF_COLUMN_LEN}) not null primary key)"
    ))?;
    let live: Vec<String> = conn
        .query(&format!("PRAGMA table_info({table})"))?
        .iter()
        .filter_map(|row| match row.get_named("name") {
            Some(entorm_core::Value::Text(s)) => Some(s.to_lowercase()),
            _ => None,
        })
        .collect();
    for field in def.fields() {
        let col = field.sql_name();
        if live.contains(&col) {
            continue;
        }
        let ty = field.kind.column_type(Dialect::Sqlite);
        conn.execute(&format!("alter table {table} add column {col} {ty}"))?;
    }
    Ok(())
}
