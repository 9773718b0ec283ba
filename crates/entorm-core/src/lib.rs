//! Core types for Entorm.
//!
//! `entorm-core` is the foundation layer for the workspace. It defines:
//!
//! - **Dialects**: the closed set of supported SQL backends and their
//!   literal/type/introspection differences.
//! - **Data model**: [`Value`] and [`Row`] represent driver inputs/outputs;
//!   [`Connection`] is the seam database drivers implement.
//! - **Field system**: [`FieldKind`] and [`FieldValue`] — the closed set of
//!   value kinds with dialect-aware rendering, ingestion, and change
//!   tracking.
//! - **Metadata**: [`EntityDef`], [`FieldDef`], [`IndexDef`], and the
//!   [`Catalog`] of registered definitions.
//! - **References**: the self-describing identity format
//!   `<base36 token>$$<object name>` and its token generator.
//!
//! Who uses this crate:
//!
//! - `entorm-schema` consumes definitions and `Connection` to reconcile
//!   live database structure.
//! - `entorm-query` consumes definitions and field rendering to compile
//!   filters and sorts into SQL.
//! - `entorm` (the facade) builds the registry and entity lifecycle engine
//!   on top of everything here.

pub mod connection;
pub mod def;
pub mod dialect;
pub mod error;
pub mod field;
pub mod reference;
pub mod value;

pub use connection::Connection;
pub use def::{
    Catalog, ConcurrencyMode, DefId, EntityDef, FieldDef, FieldId, IndexDef, DATA_VERSION_FIELD,
    IS_DELETED_FIELD, REF_FIELD,
};
pub use dialect::Dialect;
pub use error::{Error, Result};
pub use field::{FieldKind, FieldValue};
pub use reference::{
    compose_ref, parse_ref, SequenceTokenSource, SystemTokenSource, TokenSource, REF_COLUMN_LEN,
    REF_SPLITTER, REF_TOKEN_LEN,
};
pub use value::{Row, Value};
