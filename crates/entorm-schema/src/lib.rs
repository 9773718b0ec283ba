//! Database structure reconciliation.
//!
//! Given a registered [`EntityDef`](entorm_core::EntityDef) and a live
//! connection, this crate converges the backing table and its secondary
//! indexes toward the definition, additively: missing tables, columns,
//! and indexes are created, stale engine-managed indexes are dropped,
//! and nothing else is touched. Existing columns are never dropped and
//! (outside Postgres type widening) never altered.
//!
//! All statements run on the caller's connection inside the caller's
//! transaction scope; nothing here begins or commits.

pub mod index;
pub mod table;

pub use index::{diff_indexes, reconcile_indexes, IndexPlan};
pub use table::{ensure_ref_column_type, ensure_table};
