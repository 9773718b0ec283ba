//! Filter and sort compilation.
//!
//! Callers describe conditions as [`Filter`] trees over declared field
//! names; compilation resolves the names against an
//! [`EntityDef`](entorm_core::EntityDef), type-checks the operands, and
//! renders complete SQL with inlined, escaped literals. Select/count
//! statement assembly (projection, ordering, pagination) lives in
//! [`select`].

pub mod filter;
pub mod select;

pub use filter::{CmpOp, Filter};
pub use select::{build_count, build_select, pages_count, Page, Sort};
