//! Secondary-index reconciliation per dialect.
//!
//! Index names are deterministic functions of the table, column list,
//! and uniqueness (`{table}_idx_by_{col}..[__uniq]`). Live indexes are
//! loaded with their actual columns and uniqueness and matched against
//! the declared set on all three; an engine-managed live index that
//! diverges in any of them is dropped and recreated. Indexes outside
//! the managed name prefix (primary keys, hand-made indexes) are never
//! touched.

use entorm_core::{Connection, Dialect, EntityDef, Result, Value};
use tracing::debug;

/// One index the definition wants to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// The drop/create work needed to converge live indexes to the declared
/// set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPlan {
    pub to_drop: Vec<String>,
    pub to_create: Vec<IndexSpec>,
}

impl IndexPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_drop.is_empty() && self.to_create.is_empty()
    }
}

/// Declared indexes of a definition as concrete name/column specs.
#[must_use]
pub fn compile_targets(def: &EntityDef) -> Vec<IndexSpec> {
    def.indexes()
        .iter()
        .map(|idx| IndexSpec {
            name: idx.sql_name(def),
            columns: idx
                .fields
                .iter()
                .map(|fid| def.field(*fid).sql_name())
                .collect(),
            unique: idx.unique,
        })
        .collect()
}

/// Name prefix identifying indexes this engine owns on a table.
#[must_use]
pub fn managed_prefix(table: &str) -> String {
    format!("{table}_idx_by_")
}

/// Two-pass diff of live indexes against declared specs.
///
/// An index matches only when name, column order, and uniqueness all
/// agree. Pass one collects engine-managed live indexes with no matching
/// spec (a renamed, reshaped, or uniqueness-flipped index lands here and
/// gets rebuilt); pass two collects declared specs with no matching live
/// index. Live names outside `prefix` are ignored entirely.
#[must_use]
pub fn diff_indexes(live: &[IndexSpec], targets: &[IndexSpec], prefix: &str) -> IndexPlan {
    let converged = |a: &IndexSpec, b: &IndexSpec| {
        a.name == b.name && a.columns == b.columns && a.unique == b.unique
    };
    let mut plan = IndexPlan::default();
    for spec in live {
        if spec.name.starts_with(prefix) && !targets.iter().any(|t| converged(t, spec)) {
            plan.to_drop.push(spec.name.clone());
        }
    }
    for target in targets {
        if !live.iter().any(|spec| converged(spec, target)) {
            plan.to_create.push(target.clone());
        }
    }
    plan
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Int(n)) => *n != 0,
        Some(Value::Text(s)) => matches!(s.as_str(), "t" | "true" | "1"),
        _ => false,
    }
}

/// Append `column` to the spec named `name`, creating the spec on first
/// sight. Rows arrive ordered by index then column position.
fn push_column(specs: &mut Vec<IndexSpec>, name: &str, unique: bool, column: &str) {
    if let Some(spec) = specs.iter_mut().find(|s| s.name == name) {
        spec.columns.push(column.to_string());
    } else {
        specs.push(IndexSpec {
            name: name.to_string(),
            columns: vec![column.to_string()],
            unique,
        });
    }
}

/// The indexes currently on `table` with their columns and uniqueness,
/// as the dialect catalog reports them. Primary keys are excluded.
pub fn load_live(
    conn: &mut dyn Connection,
    dialect: Dialect,
    table: &str,
) -> Result<Vec<IndexSpec>> {
    let mut specs = Vec::new();
    match dialect {
        Dialect::Postgres => {
            let rows = conn.query(&format!(
                "select i.relname as iname, ix.indisunique as uni, a.attname as cname \
                 from pg_class t, pg_class i, pg_index ix, pg_attribute a \
                 where t.oid = ix.indrelid and i.oid = ix.indexrelid \
                 and a.attrelid = t.oid and t.relkind = 'r' \
                 and a.attnum = any(ix.indkey) and t.relname = '{table}' \
                 and ix.indisprimary = false \
                 order by i.relname, array_position(ix.indkey, a.attnum)"
            ))?;
            for row in rows {
                let (Some(Value::Text(name)), Some(Value::Text(column))) =
                    (row.get(0), row.get(2))
                else {
                    continue;
                };
                push_column(&mut specs, name, is_truthy(row.get(1)), column);
            }
        }
        Dialect::Mssql => {
            let rows = conn.query(&format!(
                "select i.name as iname, i.is_unique as uni, c.name as cname \
                 from sys.indexes i \
                 inner join sys.index_columns ic \
                 on i.object_id = ic.object_id and i.index_id = ic.index_id \
                 inner join sys.columns c \
                 on ic.object_id = c.object_id and ic.column_id = c.column_id \
                 inner join sys.tables t on i.object_id = t.object_id \
                 where t.name = '{table}' and i.is_primary_key = 0 \
                 order by i.name, ic.index_column_id"
            ))?;
            for row in rows {
                let (Some(Value::Text(name)), Some(Value::Text(column))) =
                    (row.get(0), row.get(2))
                else {
                    continue;
                };
                push_column(&mut specs, name, is_truthy(row.get(1)), column);
            }
        }
        Dialect::Mysql => {
            let rows = conn.query(&format!(
                "show index from {table} where Key_name != 'PRIMARY'"
            ))?;
            for row in rows {
                let (Some(Value::Text(name)), Some(Value::Text(column))) =
                    (row.get_named("Key_name"), row.get_named("Column_name"))
                else {
                    continue;
                };
                let unique = !is_truthy(row.get_named("Non_unique"));
                push_column(&mut specs, name, unique, column);
            }
        }
        Dialect::Sqlite => {
            // origin "c" keeps only explicitly created indexes, skipping
            // the ones backing primary keys and unique constraints.
            let rows = conn.query(&format!("PRAGMA index_list({table})"))?;
            for row in rows {
                let created = matches!(row.get_named("origin"), Some(Value::Text(o)) if o == "c");
                if !created {
                    continue;
                }
                let Some(Value::Text(name)) = row.get_named("name") else {
                    continue;
                };
                let name = name.clone();
                let unique = is_truthy(row.get_named("unique"));
                let mut columns = Vec::new();
                for info in conn.query(&format!("PRAGMA index_info({name})"))? {
                    if let Some(Value::Text(column)) = info.get_named("name") {
                        columns.push(column.clone());
                    }
                }
                specs.push(IndexSpec {
                    name,
                    columns,
                    unique,
                });
            }
        }
    }
    Ok(specs)
}

/// Converge the live indexes of `def`'s table to its declared set.
pub fn reconcile_indexes(
    conn: &mut dyn Connection,
    dialect: Dialect,
    def: &EntityDef,
) -> Result<IndexPlan> {
    let table = def.sql_table_name();
    let live = load_live(conn, dialect, table)?;
    let targets = compile_targets(def);
    let plan = diff_indexes(&live, &targets, &managed_prefix(table));
    if plan.is_empty() {
        return Ok(plan);
    }
    debug!(
        table,
        drops = plan.to_drop.len(),
        creates = plan.to_create.len(),
        "reconciling indexes"
    );
    for name in &plan.to_drop {
        conn.execute(&dialect.drop_index_sql(name, table))?;
    }
    for spec in &plan.to_create {
        let uniq = if spec.unique { "unique " } else { "" };
        conn.execute(&format!(
            "create {uniq}index {} on {table} ({})",
            spec.name,
            spec.columns.join(", ")
        ))?;
    }
    Ok(plan)
}
