//! The narrow driver surface the engine depends on.

use crate::error::Result;
use crate::value::Row;

/// Abstraction over one live database session.
///
/// The engine renders complete SQL statements (all literals inlined, no
/// placeholders) and hands them here; implementations only need to run
/// text and marshal results into [`Row`]s. Transaction calls are issued
/// exactly at real boundaries: the registry collapses nested scopes into
/// a single outermost begin/commit pair before calling in.
pub trait Connection: Send {
    /// Run a statement that returns no rows; yields the affected-row count.
    fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Run a query and collect every result row.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Open a transaction.
    fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll the open transaction back.
    fn rollback(&mut self) -> Result<()>;
}
