//! Entorm: a schema-driven persistence engine.
//!
//! Programs register typed record definitions at startup; the engine
//! maps them onto relational tables across four SQL dialects (Postgres,
//! MSSQL, MySQL, SQLite), converges live database structure toward the
//! declarations, and runs the whole record lifecycle: create, load
//! through a verifying read cache, save under optimistic concurrency,
//! delete (soft or physical), and filtered/sorted/paginated selects.
//!
//! Identity is a self-describing reference string, `<base36
//! token>$$<object name>`: the embedded name routes any bare reference to
//! its definition without touching storage.
//!
//! ```no_run
//! use entorm::{Registry, RegistryOptions, Dialect};
//! # fn connect() -> Box<dyn entorm::Connection> { unimplemented!() }
//! # fn main() -> entorm::Result<()> {
//! let mut registry = Registry::new(connect(), RegistryOptions::new(Dialect::Postgres));
//! let orders = registry.define("SalesOrder")?;
//! let number = registry.def_mut(orders).add_text_field("Number", 20)?;
//! registry.def_mut(orders).add_index(&[number], true)?;
//! registry.reconcile_all();
//!
//! let mut order = registry.create(orders)?;
//! order.set_text(registry.def(orders), number, "A-001")?;
//! registry.save(&mut order)?;
//! # Ok(())
//! # }
//! ```

mod cache;

pub mod entity;
pub mod hook;
pub mod registry;

pub use entity::Entity;
pub use hook::{Hook, HookEvent, HookResult};
pub use registry::{Registry, RegistryOptions, SelectResult, WrapFn};

// The pieces callers need from the lower layers.
pub use entorm_core::{
    compose_ref, parse_ref, Catalog, ConcurrencyMode, Connection, DefId, Dialect, EntityDef,
    Error, FieldDef, FieldId, FieldKind, FieldValue, IndexDef, Result, Row, SequenceTokenSource,
    SystemTokenSource, TokenSource, Value, DATA_VERSION_FIELD, IS_DELETED_FIELD, REF_FIELD,
};
pub use entorm_query::{CmpOp, Filter, Page, Sort};
