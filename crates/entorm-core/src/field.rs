//! The closed set of field kinds and their change-tracked values.
//!
//! [`FieldKind`] knows how each kind maps to a column type per dialect,
//! how to render a type-correct SQL literal, and how to normalize the
//! loosely-typed values drivers deliver. [`FieldValue`] is the per-field
//! storage on a live instance: a current/committed pair whose divergence
//! marks the field dirty.

use chrono::NaiveDateTime;

use crate::def::{Catalog, DefId};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::reference::parse_ref;
use crate::value::Value;

/// Render/parse layout for date-time literals, shared by all dialects.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// One of the six supported field kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Bounded text, stored as a varchar of `max_len` characters.
    Text { max_len: u32 },
    /// 64-bit signed integer.
    Integer,
    /// Boolean flag.
    Boolean,
    /// Typed reference to instances of another (or the same) definition.
    Reference { target: DefId },
    /// Fixed-point decimal with the given precision and scale.
    Numeric { precision: u8, scale: u8 },
    /// Second-resolution timestamp without a zone; absent renders as NULL.
    /// `format` is the field's external layout (`strftime`-style), used for
    /// SQL literals and JSON text alike.
    DateTime { format: String },
}

impl FieldKind {
    /// Short tag used in type-mismatch diagnostics.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            FieldKind::Text { .. } => "text",
            FieldKind::Integer => "int",
            FieldKind::Boolean => "bool",
            FieldKind::Reference { .. } => "reference",
            FieldKind::Numeric { .. } => "numeric",
            FieldKind::DateTime { .. } => "date-time",
        }
    }

    /// SQL column type for this kind on the given dialect.
    #[must_use]
    pub fn column_type(&self, dialect: Dialect) -> String {
        match self {
            FieldKind::Text { max_len } => match dialect {
                Dialect::Mssql => format!("nvarchar({max_len})"),
                Dialect::Postgres | Dialect::Mysql | Dialect::Sqlite => {
                    format!("varchar({max_len})")
                }
            },
            FieldKind::Integer => match dialect {
                Dialect::Postgres | Dialect::Mysql => "int".to_string(),
                Dialect::Mssql => "bigint".to_string(),
                Dialect::Sqlite => "integer".to_string(),
            },
            FieldKind::Boolean => match dialect {
                Dialect::Postgres => "bool".to_string(),
                Dialect::Mssql => "bit".to_string(),
                Dialect::Mysql => "tinyint(1)".to_string(),
                Dialect::Sqlite => "boolean".to_string(),
            },
            FieldKind::Reference { .. } => dialect.ref_column_type(),
            FieldKind::Numeric { precision, scale } => {
                format!("decimal({precision}, {scale})")
            }
            FieldKind::DateTime { .. } => match dialect {
                Dialect::Postgres => "timestamp without time zone".to_string(),
                Dialect::Mssql | Dialect::Mysql | Dialect::Sqlite => "datetime".to_string(),
            },
        }
    }

    /// Render a canonical value of this kind as an inline SQL literal.
    ///
    /// `field_name` is carried for diagnostics only. The value must already
    /// be canonical for the kind (as produced by [`FieldKind::ingest`] or a
    /// [`FieldValue`] accessor).
    pub fn render_literal(
        &self,
        dialect: Dialect,
        value: &Value,
        field_name: &str,
    ) -> Result<String> {
        match (self, value) {
            (FieldKind::Text { .. } | FieldKind::Reference { .. }, Value::Text(s)) => {
                Ok(quote_text(s))
            }
            (FieldKind::Integer, Value::Int(n)) => Ok(n.to_string()),
            (FieldKind::Boolean, Value::Bool(b)) => Ok(dialect.bool_literal(*b).to_string()),
            (FieldKind::Numeric { scale, .. }, Value::Float(f)) => {
                Ok(format!("{f:.prec$}", prec = *scale as usize))
            }
            (FieldKind::DateTime { .. }, Value::Null) => Ok("NULL".to_string()),
            (FieldKind::DateTime { format }, Value::DateTime(dt)) => {
                Ok(format!("'{}'", dt.format(format)))
            }
            (kind, other) => Err(Error::TypeMismatch {
                field: field_name.to_string(),
                expected: kind.type_tag(),
                got: other.type_tag(),
            }),
        }
    }

    /// Normalize a driver-delivered value into the canonical [`Value`]
    /// shape for this kind.
    ///
    /// Drivers are loose: SQLite reports booleans as integers, MySQL hands
    /// back byte-strings, timestamps arrive as text on several backends.
    /// Anything that cannot be coerced is a [`Error::TypeMismatch`].
    /// Reference values additionally have their embedded object name
    /// checked against the field's declared target in `catalog`; a
    /// mismatch is [`Error::InvalidReference`], never coerced.
    pub fn ingest(&self, field_name: &str, raw: Value, catalog: &Catalog) -> Result<Value> {
        let mismatch = |got: &'static str| Error::TypeMismatch {
            field: field_name.to_string(),
            expected: self.type_tag(),
            got,
        };
        match self {
            FieldKind::Text { .. } => match raw {
                Value::Text(s) => Ok(Value::Text(s)),
                Value::Bytes(b) => Ok(Value::Text(String::from_utf8_lossy(&b).into_owned())),
                Value::Null => Ok(Value::Text(String::new())),
                other => Err(mismatch(other.type_tag())),
            },
            FieldKind::Reference { target } => {
                let s = match raw {
                    Value::Text(s) => s,
                    Value::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
                    Value::Null => String::new(),
                    other => return Err(mismatch(other.type_tag())),
                };
                // The empty string is the unset reference.
                if !s.is_empty() {
                    let (_, object_name) = parse_ref(&s)?;
                    let expected = catalog.def(*target).sql_table_name();
                    if object_name != expected {
                        return Err(Error::InvalidReference {
                            detail: format!(
                                "{field_name} expects a {expected} reference, found {object_name}"
                            ),
                            reference: s,
                        });
                    }
                }
                Ok(Value::Text(s))
            }
            FieldKind::Integer => match raw {
                Value::Int(n) => Ok(Value::Int(n)),
                Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                Value::Text(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| mismatch("text")),
                Value::Null => Ok(Value::Int(0)),
                other => Err(mismatch(other.type_tag())),
            },
            FieldKind::Boolean => match raw {
                Value::Bool(b) => Ok(Value::Bool(b)),
                Value::Int(n) => Ok(Value::Bool(n != 0)),
                Value::Text(s) => match s.to_lowercase().as_str() {
                    "true" | "t" | "1" | "yes" | "y" | "on" => Ok(Value::Bool(true)),
                    "false" | "f" | "0" | "no" | "n" | "off" | "" => Ok(Value::Bool(false)),
                    _ => Err(mismatch("text")),
                },
                Value::Null => Ok(Value::Bool(false)),
                other => Err(mismatch(other.type_tag())),
            },
            FieldKind::Numeric { .. } => match raw {
                Value::Float(f) => Ok(Value::Float(f)),
                Value::Int(n) => Ok(Value::Float(n as f64)),
                Value::Text(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| mismatch("text")),
                Value::Bytes(b) => String::from_utf8_lossy(&b)
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| mismatch("bytes")),
                Value::Null => Ok(Value::Float(0.0)),
                other => Err(mismatch(other.type_tag())),
            },
            FieldKind::DateTime { format } => match raw {
                Value::DateTime(dt) => Ok(Value::DateTime(dt)),
                Value::Null => Ok(Value::Null),
                // Postgres reports open-ended timestamps as infinities;
                // both collapse to the unset value.
                Value::Text(s) if s.is_empty() || s == "infinity" || s == "-infinity" => {
                    Ok(Value::Null)
                }
                Value::Text(s) => parse_datetime(&s, format)
                    .map(Value::DateTime)
                    .ok_or_else(|| mismatch("text")),
                other => Err(mismatch(other.type_tag())),
            },
        }
    }
}

/// Quote a string as a SQL text literal, doubling embedded quotes.
#[must_use]
pub fn quote_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push('\'');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

fn parse_datetime(s: &str, declared: &str) -> Option<NaiveDateTime> {
    // The field's declared layout first, then the shapes backends use:
    // ISO separator or a space, with or without fractional seconds.
    for layout in [
        declared,
        DATETIME_FORMAT,
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt);
        }
    }
    None
}

/// Change-tracked storage for one field of a live instance.
///
/// Each variant holds the working (`current`) and last-persisted
/// (`committed`) value; a successful save commits the pair.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text {
        current: String,
        committed: String,
    },
    Integer {
        current: i64,
        committed: i64,
    },
    Boolean {
        current: bool,
        committed: bool,
    },
    Reference {
        current: String,
        committed: String,
    },
    Numeric {
        current: f64,
        committed: f64,
    },
    DateTime {
        current: Option<NaiveDateTime>,
        committed: Option<NaiveDateTime>,
    },
}

impl FieldValue {
    /// Zero-valued storage for a freshly created instance.
    #[must_use]
    pub fn new(kind: &FieldKind) -> Self {
        match kind {
            FieldKind::Text { .. } => FieldValue::Text {
                current: String::new(),
                committed: String::new(),
            },
            FieldKind::Integer => FieldValue::Integer {
                current: 0,
                committed: 0,
            },
            FieldKind::Boolean => FieldValue::Boolean {
                current: false,
                committed: false,
            },
            FieldKind::Reference { .. } => FieldValue::Reference {
                current: String::new(),
                committed: String::new(),
            },
            FieldKind::Numeric { .. } => FieldValue::Numeric {
                current: 0.0,
                committed: 0.0,
            },
            FieldKind::DateTime { .. } => FieldValue::DateTime {
                current: None,
                committed: None,
            },
        }
    }

    /// Storage seeded from a loaded row: current and committed coincide.
    pub fn from_committed(
        kind: &FieldKind,
        field_name: &str,
        raw: Value,
        catalog: &Catalog,
    ) -> Result<Self> {
        let canonical = kind.ingest(field_name, raw, catalog)?;
        let mut fv = FieldValue::new(kind);
        fv.set(field_name, canonical)?;
        fv.commit();
        Ok(fv)
    }

    /// The working value, in canonical [`Value`] form.
    #[must_use]
    pub fn current_value(&self) -> Value {
        match self {
            FieldValue::Text { current, .. } | FieldValue::Reference { current, .. } => {
                Value::Text(current.clone())
            }
            FieldValue::Integer { current, .. } => Value::Int(*current),
            FieldValue::Boolean { current, .. } => Value::Bool(*current),
            FieldValue::Numeric { current, .. } => Value::Float(*current),
            FieldValue::DateTime { current, .. } => {
                current.map_or(Value::Null, Value::DateTime)
            }
        }
    }

    /// The last-persisted value, in canonical [`Value`] form.
    #[must_use]
    pub fn committed_value(&self) -> Value {
        match self {
            FieldValue::Text { committed, .. } | FieldValue::Reference { committed, .. } => {
                Value::Text(committed.clone())
            }
            FieldValue::Integer { committed, .. } => Value::Int(*committed),
            FieldValue::Boolean { committed, .. } => Value::Bool(*committed),
            FieldValue::Numeric { committed, .. } => Value::Float(*committed),
            FieldValue::DateTime { committed, .. } => {
                committed.map_or(Value::Null, Value::DateTime)
            }
        }
    }

    /// Overwrite the working value with a canonical value of the right shape.
    pub fn set(&mut self, field_name: &str, value: Value) -> Result<()> {
        let mismatch = |expected: &'static str, got: &'static str| Error::TypeMismatch {
            field: field_name.to_string(),
            expected,
            got,
        };
        match (self, value) {
            (FieldValue::Text { current, .. }, Value::Text(s))
            | (FieldValue::Reference { current, .. }, Value::Text(s)) => {
                *current = s;
                Ok(())
            }
            (FieldValue::Integer { current, .. }, Value::Int(n)) => {
                *current = n;
                Ok(())
            }
            (FieldValue::Boolean { current, .. }, Value::Bool(b)) => {
                *current = b;
                Ok(())
            }
            (FieldValue::Numeric { current, .. }, Value::Float(f)) => {
                *current = f;
                Ok(())
            }
            (FieldValue::DateTime { current, .. }, Value::DateTime(dt)) => {
                *current = Some(dt);
                Ok(())
            }
            (FieldValue::DateTime { current, .. }, Value::Null) => {
                *current = None;
                Ok(())
            }
            (fv, other) => Err(mismatch(fv.type_tag(), other.type_tag())),
        }
    }

    /// True while the working value differs from the last-persisted one.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        match self {
            FieldValue::Text { current, committed }
            | FieldValue::Reference { current, committed } => current != committed,
            FieldValue::Integer { current, committed } => current != committed,
            FieldValue::Boolean { current, committed } => current != committed,
            FieldValue::Numeric { current, committed } => {
                (current - committed).abs() > f64::EPSILON
            }
            FieldValue::DateTime { current, committed } => current != committed,
        }
    }

    /// Mark the working value as persisted.
    pub fn commit(&mut self) {
        match self {
            FieldValue::Text { current, committed }
            | FieldValue::Reference { current, committed } => {
                committed.clone_from(current);
            }
            FieldValue::Integer { current, committed } => *committed = *current,
            FieldValue::Boolean { current, committed } => *committed = *current,
            FieldValue::Numeric { current, committed } => *committed = *current,
            FieldValue::DateTime { current, committed } => *committed = *current,
        }
    }

    /// Short tag used in type-mismatch diagnostics.
    #[must_use]
    pub const fn type_tag(&self) -> &'static str {
        match self {
            FieldValue::Text { .. } => "text",
            FieldValue::Integer { .. } => "int",
            FieldValue::Boolean { .. } => "bool",
            FieldValue::Reference { .. } => "reference",
            FieldValue::Numeric { .. } => "numeric",
            FieldValue::DateTime { .. } => "date-time",
        }
    }
}
