//! Composable filter conditions over declared fields.

use entorm_core::field::quote_text;
use entorm_core::{Catalog, Dialect, EntityDef, Error, Result, Value};

/// Scalar comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CmpOp {
    const fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }
}

/// One condition over a definition's fields.
///
/// Leaves name fields by their declared (case-insensitive) names;
/// resolution and type checking happen at render time against the
/// definition the query targets. Trees nest through [`Filter::and`] and
/// [`Filter::or`].
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Cmp {
        field: String,
        op: CmpOp,
        value: Value,
    },
    Like {
        field: String,
        pattern: String,
    },
    In {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
    IsNull {
        field: String,
        negated: bool,
    },
    All(Vec<Filter>),
    Any(Vec<Filter>),
}

impl Filter {
    #[must_use]
    pub fn cmp(field: &str, op: CmpOp, value: impl Into<Value>) -> Self {
        Filter::Cmp {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Eq, value)
    }

    #[must_use]
    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Ne, value)
    }

    #[must_use]
    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Gt, value)
    }

    #[must_use]
    pub fn ge(field: &str, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Ge, value)
    }

    #[must_use]
    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Lt, value)
    }

    #[must_use]
    pub fn le(field: &str, value: impl Into<Value>) -> Self {
        Self::cmp(field, CmpOp::Le, value)
    }

    /// SQL LIKE over a text field; the pattern is passed through verbatim
    /// (wildcards included) with quote escaping only.
    #[must_use]
    pub fn like(field: &str, pattern: &str) -> Self {
        Filter::Like {
            field: field.to_string(),
            pattern: pattern.to_string(),
        }
    }

    #[must_use]
    pub fn is_in(field: &str, values: Vec<Value>) -> Self {
        Filter::In {
            field: field.to_string(),
            values,
            negated: false,
        }
    }

    #[must_use]
    pub fn not_in(field: &str, values: Vec<Value>) -> Self {
        Filter::In {
            field: field.to_string(),
            values,
            negated: true,
        }
    }

    #[must_use]
    pub fn is_null(field: &str) -> Self {
        Filter::IsNull {
            field: field.to_string(),
            negated: false,
        }
    }

    #[must_use]
    pub fn is_not_null(field: &str) -> Self {
        Filter::IsNull {
            field: field.to_string(),
            negated: true,
        }
    }

    /// Conjunction of sub-conditions, parenthesized as a group.
    #[must_use]
    pub fn and(items: Vec<Filter>) -> Self {
        Filter::All(items)
    }

    /// Disjunction of sub-conditions, parenthesized as a group.
    #[must_use]
    pub fn or(items: Vec<Filter>) -> Self {
        Filter::Any(items)
    }

    /// Render this condition as a SQL predicate against `def`. The
    /// catalog backs reference-operand target checks.
    pub fn render(&self, catalog: &Catalog, def: &EntityDef, dialect: Dialect) -> Result<String> {
        match self {
            Filter::Cmp { field, op, value } => {
                let fd = resolve(def, field)?;
                let canonical = fd.kind.ingest(&fd.name, value.clone(), catalog)?;
                let lit = fd.kind.render_literal(dialect, &canonical, &fd.name)?;
                Ok(format!("{} {} {}", fd.sql_name(), op.sql(), lit))
            }
            Filter::Like { field, pattern } => {
                let fd = resolve(def, field)?;
                Ok(format!("{} like {}", fd.sql_name(), quote_text(pattern)))
            }
            Filter::In {
                field,
                values,
                negated,
            } => {
                let fd = resolve(def, field)?;
                if values.is_empty() {
                    return Err(Error::InvalidQuery(format!(
                        "empty value list for {} on {}",
                        fd.name,
                        def.name()
                    )));
                }
                let mut lits = Vec::with_capacity(values.len());
                for value in values {
                    let canonical = fd.kind.ingest(&fd.name, value.clone(), catalog)?;
                    lits.push(fd.kind.render_literal(dialect, &canonical, &fd.name)?);
                }
                let keyword = if *negated { "not in" } else { "in" };
                Ok(format!("{} {} ({})", fd.sql_name(), keyword, lits.join(", ")))
            }
            Filter::IsNull { field, negated } => {
                let fd = resolve(def, field)?;
                let keyword = if *negated { "is not null" } else { "is null" };
                Ok(format!("{} {}", fd.sql_name(), keyword))
            }
            Filter::All(items) => render_group(catalog, def, dialect, items, " and "),
            Filter::Any(items) => render_group(catalog, def, dialect, items, " or "),
        }
    }
}

fn resolve<'a>(def: &'a EntityDef, field: &str) -> Result<&'a entorm_core::FieldDef> {
    def.field_by_name(field).ok_or_else(|| {
        Error::InvalidQuery(format!("no field {field} on {}", def.name()))
    })
}

fn render_group(
    catalog: &Catalog,
    def: &EntityDef,
    dialect: Dialect,
    items: &[Filter],
    joiner: &str,
) -> Result<String> {
    if items.is_empty() {
        return Err(Error::InvalidQuery(format!(
            "empty condition group for {}",
            def.name()
        )));
    }
    let parts = items
        .iter()
        .map(|f| f.render(catalog, def, dialect))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", parts.join(joiner)))
}
