//! Entity definitions, their fields and indexes, and the catalog that
//! holds them.
//!
//! Definitions are arena-allocated inside a [`Catalog`]; [`DefId`] and
//! [`FieldId`] are stable indices into it. Every definition carries three
//! reserved fields at fixed positions: the self-describing reference, the
//! soft-delete flag, and the optimistic-concurrency version token.

use crate::error::{Error, Result};
use crate::field::{DATETIME_FORMAT, FieldKind, FieldValue};
use crate::reference::parse_ref;
use crate::value::Value;

/// Name of the reserved identity field.
pub const REF_FIELD: &str = "Ref";

/// Name of the reserved soft-delete flag field.
pub const IS_DELETED_FIELD: &str = "IsDeleted";

/// Name of the reserved version-token field.
pub const DATA_VERSION_FIELD: &str = "DataVersion";

/// Column width of the version token.
pub const DATA_VERSION_LEN: u32 = 20;

/// Stable handle to a definition inside its [`Catalog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefId(pub usize);

/// Stable handle to a field inside its [`EntityDef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub usize);

/// When saves compare the persisted version token before overwriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyMode {
    /// Never compare; last write wins.
    Never,
    /// Defer to the registry-wide default.
    #[default]
    Default,
    /// Always compare; a mismatch is a stale write.
    Always,
}

impl ConcurrencyMode {
    /// Collapse `Default` into the registry-wide fallback.
    #[must_use]
    pub fn resolve(self, fallback: ConcurrencyMode) -> ConcurrencyMode {
        match self {
            ConcurrencyMode::Default => fallback,
            other => other,
        }
    }
}

/// One field of a definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub id: FieldId,
    /// Declared (mixed-case) name, unique within the definition
    /// case-insensitively.
    pub name: String,
    pub kind: FieldKind,
    /// Declared default, seeded into fresh instances. Always canonical
    /// for `kind`, since only the typed `add_*_field_with_default`
    /// builders can set it.
    pub default: Option<Value>,
}

impl FieldDef {
    /// Lowercase column name used in SQL.
    #[must_use]
    pub fn sql_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Fresh change-tracked storage for this field, seeded with the
    /// declared default when one exists.
    #[must_use]
    pub fn new_value(&self) -> FieldValue {
        let mut fv = FieldValue::new(&self.kind);
        if let Some(default) = &self.default {
            if fv.set(&self.name, default.clone()).is_ok() {
                fv.commit();
            }
        }
        fv
    }
}

/// A secondary index over one or more fields, in declared column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub fields: Vec<FieldId>,
    pub unique: bool,
}

impl IndexDef {
    /// Deterministic index name: table, column list, uniqueness marker.
    #[must_use]
    pub fn sql_name(&self, def: &EntityDef) -> String {
        let mut name = format!("{}_idx_by", def.sql_table_name());
        for fid in &self.fields {
            name.push('_');
            name.push_str(&def.field(*fid).sql_name());
        }
        if self.unique {
            name.push_str("__uniq");
        }
        name
    }
}

/// One registered record type: name, fields, indexes, and policies.
#[derive(Debug, Clone)]
pub struct EntityDef {
    id: DefId,
    name: String,
    table: String,
    fields: Vec<FieldDef>,
    indexes: Vec<IndexDef>,
    fragments: Vec<String>,
    pub concurrency: ConcurrencyMode,
    pub soft_delete: bool,
}

impl EntityDef {
    /// Reserved field positions, identical for every definition.
    pub const REF: FieldId = FieldId(0);
    pub const IS_DELETED: FieldId = FieldId(1);
    pub const DATA_VERSION: FieldId = FieldId(2);

    fn new(id: DefId, name: &str) -> Self {
        let mut def = Self {
            id,
            name: name.to_string(),
            table: name.to_lowercase(),
            fields: Vec::new(),
            indexes: Vec::new(),
            fragments: Vec::new(),
            concurrency: ConcurrencyMode::Default,
            soft_delete: false,
        };
        def.fields.push(FieldDef {
            id: Self::REF,
            name: REF_FIELD.to_string(),
            kind: FieldKind::Reference { target: id },
            default: None,
        });
        def.fields.push(FieldDef {
            id: Self::IS_DELETED,
            name: IS_DELETED_FIELD.to_string(),
            kind: FieldKind::Boolean,
            default: None,
        });
        def.fields.push(FieldDef {
            id: Self::DATA_VERSION,
            name: DATA_VERSION_FIELD.to_string(),
            kind: FieldKind::Text {
                max_len: DATA_VERSION_LEN,
            },
            default: None,
        });
        def
    }

    #[must_use]
    pub fn id(&self) -> DefId {
        self.id
    }

    /// Declared (mixed-case) definition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowercase table name used in SQL and inside references.
    #[must_use]
    pub fn sql_table_name(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    #[must_use]
    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Field by handle. Handles come from this definition's `add_*`
    /// methods or the reserved constants, so the index is always valid.
    #[must_use]
    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.0]
    }

    /// Field by name, case-insensitively.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    fn add_field(
        &mut self,
        name: &str,
        kind: FieldKind,
        default: Option<Value>,
    ) -> Result<FieldId> {
        check_identifier(name)?;
        if self.field_by_name(name).is_some() {
            return Err(Error::DefinitionConflict(format!(
                "field {name} already declared on {}",
                self.name
            )));
        }
        let id = FieldId(self.fields.len());
        self.fields.push(FieldDef {
            id,
            name: name.to_string(),
            kind,
            default,
        });
        Ok(id)
    }

    pub fn add_text_field(&mut self, name: &str, max_len: u32) -> Result<FieldId> {
        self.add_field(name, FieldKind::Text { max_len }, None)
    }

    pub fn add_text_field_with_default(
        &mut self,
        name: &str,
        max_len: u32,
        default: &str,
    ) -> Result<FieldId> {
        self.add_field(
            name,
            FieldKind::Text { max_len },
            Some(Value::Text(default.to_string())),
        )
    }

    pub fn add_integer_field(&mut self, name: &str) -> Result<FieldId> {
        self.add_field(name, FieldKind::Integer, None)
    }

    pub fn add_integer_field_with_default(&mut self, name: &str, default: i64) -> Result<FieldId> {
        self.add_field(name, FieldKind::Integer, Some(Value::Int(default)))
    }

    pub fn add_boolean_field(&mut self, name: &str) -> Result<FieldId> {
        self.add_field(name, FieldKind::Boolean, None)
    }

    pub fn add_boolean_field_with_default(&mut self, name: &str, default: bool) -> Result<FieldId> {
        self.add_field(name, FieldKind::Boolean, Some(Value::Bool(default)))
    }

    pub fn add_reference_field(&mut self, name: &str, target: DefId) -> Result<FieldId> {
        self.add_field(name, FieldKind::Reference { target }, None)
    }

    pub fn add_numeric_field(&mut self, name: &str, precision: u8, scale: u8) -> Result<FieldId> {
        self.add_field(name, FieldKind::Numeric { precision, scale }, None)
    }

    pub fn add_numeric_field_with_default(
        &mut self,
        name: &str,
        precision: u8,
        scale: u8,
        default: f64,
    ) -> Result<FieldId> {
        self.add_field(
            name,
            FieldKind::Numeric { precision, scale },
            Some(Value::Float(default)),
        )
    }

    /// Date-time field using the default ISO external format.
    pub fn add_datetime_field(&mut self, name: &str) -> Result<FieldId> {
        self.add_datetime_field_with_format(name, DATETIME_FORMAT)
    }

    /// Date-time field with a caller-declared `strftime`-style external
    /// format, used for SQL literals and JSON text.
    pub fn add_datetime_field_with_format(&mut self, name: &str, format: &str) -> Result<FieldId> {
        self.add_field(
            name,
            FieldKind::DateTime {
                format: format.to_string(),
            },
            None,
        )
    }

    /// Declare a secondary index over the given fields, in order.
    pub fn add_index(&mut self, fields: &[FieldId], unique: bool) -> Result<()> {
        if fields.is_empty() {
            return Err(Error::DefinitionConflict(format!(
                "index on {} declares no fields",
                self.name
            )));
        }
        if fields == [Self::REF] {
            return Err(Error::DefinitionConflict(format!(
                "{} is already indexed as the primary key of {}",
                REF_FIELD, self.name
            )));
        }
        for (i, fid) in fields.iter().enumerate() {
            if fid.0 >= self.fields.len() {
                return Err(Error::DefinitionConflict(format!(
                    "index on {} names an unknown field",
                    self.name
                )));
            }
            if fields[..i].contains(fid) {
                return Err(Error::DefinitionConflict(format!(
                    "index on {} repeats field {}",
                    self.name,
                    self.field(*fid).name
                )));
            }
        }
        let idx = IndexDef {
            fields: fields.to_vec(),
            unique,
        };
        // Two indexes over the same fields are duplicates regardless of
        // column order.
        let mut key = idx.fields.clone();
        key.sort_unstable();
        let duplicate = self.indexes.iter().any(|existing| {
            let mut existing_key = existing.fields.clone();
            existing_key.sort_unstable();
            existing_key == key
        });
        if duplicate {
            return Err(Error::DefinitionConflict(format!(
                "index {} already declared",
                idx.sql_name(self)
            )));
        }
        self.indexes.push(idx);
        Ok(())
    }

    /// Tag this definition with a fragment name, used to attach hooks to
    /// whole families of definitions at once.
    pub fn add_fragment(&mut self, tag: &str) {
        if !self.has_fragment(tag) {
            self.fragments.push(tag.to_string());
        }
    }

    #[must_use]
    pub fn has_fragment(&self, tag: &str) -> bool {
        self.fragments.iter().any(|f| f.eq_ignore_ascii_case(tag))
    }
}

/// Names flow into SQL unquoted, so they are restricted to identifier
/// characters.
fn check_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic()
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::DefinitionConflict(format!(
            "invalid identifier {name:?}: must be ASCII alphanumeric/underscore, starting with a letter"
        )))
    }
}

/// The set of registered definitions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    defs: Vec<EntityDef>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new definition. The name must be globally unique
    /// case-insensitively, since table names derive from it.
    pub fn define(&mut self, name: &str) -> Result<DefId> {
        check_identifier(name)?;
        if self.def_by_name(name).is_some() {
            return Err(Error::DefinitionConflict(format!(
                "definition {name} already registered"
            )));
        }
        let id = DefId(self.defs.len());
        self.defs.push(EntityDef::new(id, name));
        Ok(id)
    }

    /// Definition by handle. Handles come from [`Catalog::define`], so the
    /// index is always valid.
    #[must_use]
    pub fn def(&self, id: DefId) -> &EntityDef {
        &self.defs[id.0]
    }

    #[must_use]
    pub fn def_mut(&mut self, id: DefId) -> &mut EntityDef {
        &mut self.defs[id.0]
    }

    /// Definition by name, case-insensitively.
    #[must_use]
    pub fn def_by_name(&self, name: &str) -> Option<&EntityDef> {
        self.defs
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDef> {
        self.defs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Route a reference string to the definition its embedded name
    /// describes.
    pub fn resolve_ref(&self, reference: &str) -> Result<DefId> {
        let (_, object_name) = parse_ref(reference)?;
        self.def_by_name(object_name)
            .map(EntityDef::id)
            .ok_or_else(|| Error::InvalidReference {
                reference: reference.to_string(),
                detail: format!("no definition registered as {object_name}"),
            })
    }

    /// True when the string is a well-formed reference to a registered
    /// definition. Works purely on the string; nothing is persisted or
    /// queried.
    #[must_use]
    pub fn is_ref(&self, candidate: &str) -> bool {
        self.resolve_ref(candidate).is_ok()
    }
}
