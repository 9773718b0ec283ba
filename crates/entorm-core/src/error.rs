//! Error taxonomy shared across the workspace.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of the persistence engine.
///
/// SQL/transport failures are always wrapped in [`Error::Backend`] with the
/// operation and identifiers involved; nothing is silently swallowed.
#[derive(Debug, Error)]
pub enum Error {
    /// Duplicate object/table/field/index name at registration time.
    ///
    /// Fatal to the registering call only; prior registrations are intact.
    #[error("definition conflict: {0}")]
    DefinitionConflict(String),

    /// A dialect name that is not one of the supported backends.
    #[error("unsupported dialect: {0}")]
    UnsupportedDialect(String),

    /// A driver value of the wrong shape was ingested into a field value.
    #[error("type mismatch for field {field}: expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        got: &'static str,
    },

    /// A reference string that does not parse, whose encoded type is
    /// unregistered, or that does not match a typed field's target.
    #[error("invalid reference {reference}: {detail}")]
    InvalidReference { reference: String, detail: String },

    /// Version-token mismatch during a concurrency-checked save.
    ///
    /// The live instance's token has been restored to its pre-attempt value
    /// before this error surfaces.
    #[error("stale write: {0} was changed by another writer")]
    StaleWrite(String),

    /// Load of an absent reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// A lifecycle hook returned an error.
    ///
    /// Before-hooks abort the enclosing operation with no database
    /// mutation; after-save hooks cannot roll back the committed effect.
    #[error("{event} hook failed for {reference}: {message}")]
    HookFailure {
        event: &'static str,
        reference: String,
        message: String,
    },

    /// A structurally invalid query (e.g. pagination without ordering,
    /// a filter naming a field the definition does not have).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A SQL or transport failure, wrapped with the operation that issued it.
    #[error("{op}: {message}")]
    Backend { op: String, message: String },
}

impl Error {
    /// Wrap a driver-level failure with the operation that caused it.
    pub fn backend(op: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Backend {
            op: op.into(),
            message: message.to_string(),
        }
    }
}
