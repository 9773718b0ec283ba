//! Live record instances.
//!
//! An [`Entity`] is a value object: the definition handle, one
//! change-tracked [`FieldValue`] per declared field (reserved fields
//! included), and a new/persisted flag. It carries no connection or
//! registry handle, so clones are cheap to reason about; all persistence
//! goes through [`Registry`](crate::Registry) methods.

use chrono::NaiveDateTime;
use entorm_core::{
    Catalog, DefId, EntityDef, Error, FieldId, FieldKind, FieldValue, Result, Value,
};
use serde_json::json;

/// Count of reserved fields at the head of every definition.
const RESERVED_COUNT: usize = 3;

/// One in-memory instance of a registered definition.
#[derive(Debug, Clone)]
pub struct Entity {
    def_id: DefId,
    values: Vec<FieldValue>,
    is_new: bool,
}

impl Entity {
    /// Fresh instance carrying an already-composed reference, with every
    /// field at its declared default or zero value.
    pub(crate) fn new(def: &EntityDef, reference: String) -> Self {
        let mut values: Vec<FieldValue> = def
            .fields()
            .iter()
            .map(|f| f.new_value())
            .collect();
        if let FieldValue::Reference { current, committed } = &mut values[EntityDef::REF.0] {
            current.clone_from(&reference);
            committed.clone_from(&reference);
        }
        Self {
            def_id: def.id(),
            values,
            is_new: true,
        }
    }

    /// Rebuild an instance from a loaded row, field values in definition
    /// order. Loaded instances start clean and persisted.
    pub(crate) fn from_row(catalog: &Catalog, def: &EntityDef, raw: Vec<Value>) -> Result<Self> {
        if raw.len() != def.fields().len() {
            return Err(Error::backend(
                format!("load {}", def.sql_table_name()),
                format!(
                    "row has {} columns, definition has {}",
                    raw.len(),
                    def.fields().len()
                ),
            ));
        }
        let mut values = Vec::with_capacity(raw.len());
        for (field, value) in def.fields().iter().zip(raw) {
            values.push(FieldValue::from_committed(
                &field.kind,
                &field.name,
                value,
                catalog,
            )?);
        }
        Ok(Self {
            def_id: def.id(),
            values,
            is_new: false,
        })
    }

    #[must_use]
    pub fn def_id(&self) -> DefId {
        self.def_id
    }

    /// True until the first successful save.
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.is_new = false;
        for fv in &mut self.values {
            fv.commit();
        }
    }

    /// The instance's self-describing reference.
    #[must_use]
    pub fn reference(&self) -> &str {
        match &self.values[EntityDef::REF.0] {
            FieldValue::Reference { current, .. } => current,
            // Position 0 is always the reserved reference field.
            _ => "",
        }
    }

    /// Current soft-delete flag.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(
            self.values[EntityDef::IS_DELETED.0],
            FieldValue::Boolean { current: true, .. }
        )
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        if let FieldValue::Boolean { current, .. } = &mut self.values[EntityDef::IS_DELETED.0] {
            *current = deleted;
        }
    }

    /// The last-persisted version token (empty until first save).
    #[must_use]
    pub fn data_version(&self) -> String {
        match self.values[EntityDef::DATA_VERSION.0].committed_value() {
            Value::Text(s) => s,
            _ => String::new(),
        }
    }

    pub(crate) fn field_value(&self, id: FieldId) -> &FieldValue {
        &self.values[id.0]
    }

    pub(crate) fn field_value_mut(&mut self, id: FieldId) -> &mut FieldValue {
        &mut self.values[id.0]
    }

    /// Working value of a field, in canonical [`Value`] form.
    #[must_use]
    pub fn value(&self, id: FieldId) -> Value {
        self.values[id.0].current_value()
    }

    /// Overwrite a field's working value. The value must match the
    /// field's kind; use [`Entity::set_reference`] for typed reference
    /// fields so the target type is validated.
    pub fn set_value(&mut self, def: &EntityDef, id: FieldId, value: Value) -> Result<()> {
        self.values[id.0].set(&def.field(id).name, value)
    }

    /// Like [`Entity::set_value`] without definition access; diagnostics
    /// fall back to the field position. Hooks receive only the instance,
    /// so they assign through this.
    pub fn set_raw(&mut self, id: FieldId, value: Value) -> Result<()> {
        let tag = format!("field #{}", id.0);
        self.values[id.0].set(&tag, value)
    }

    // -------------------------------------------------------------------
    // typed conveniences
    // -------------------------------------------------------------------

    #[must_use]
    pub fn get_text(&self, id: FieldId) -> String {
        match &self.values[id.0] {
            FieldValue::Text { current, .. } | FieldValue::Reference { current, .. } => {
                current.clone()
            }
            _ => String::new(),
        }
    }

    pub fn set_text(&mut self, def: &EntityDef, id: FieldId, value: &str) -> Result<()> {
        self.set_value(def, id, Value::Text(value.to_string()))
    }

    #[must_use]
    pub fn get_int(&self, id: FieldId) -> i64 {
        match &self.values[id.0] {
            FieldValue::Integer { current, .. } => *current,
            _ => 0,
        }
    }

    pub fn set_int(&mut self, def: &EntityDef, id: FieldId, value: i64) -> Result<()> {
        self.set_value(def, id, Value::Int(value))
    }

    #[must_use]
    pub fn get_bool(&self, id: FieldId) -> bool {
        matches!(
            self.values[id.0],
            FieldValue::Boolean { current: true, .. }
        )
    }

    pub fn set_bool(&mut self, def: &EntityDef, id: FieldId, value: bool) -> Result<()> {
        self.set_value(def, id, Value::Bool(value))
    }

    #[must_use]
    pub fn get_float(&self, id: FieldId) -> f64 {
        match &self.values[id.0] {
            FieldValue::Numeric { current, .. } => *current,
            _ => 0.0,
        }
    }

    pub fn set_float(&mut self, def: &EntityDef, id: FieldId, value: f64) -> Result<()> {
        self.set_value(def, id, Value::Float(value))
    }

    #[must_use]
    pub fn get_datetime(&self, id: FieldId) -> Option<NaiveDateTime> {
        match &self.values[id.0] {
            FieldValue::DateTime { current, .. } => *current,
            _ => None,
        }
    }

    pub fn set_datetime(
        &mut self,
        def: &EntityDef,
        id: FieldId,
        value: Option<NaiveDateTime>,
    ) -> Result<()> {
        self.set_value(def, id, value.map_or(Value::Null, Value::DateTime))
    }

    /// Assign a reference field, validating that the reference's embedded
    /// type matches the field's declared target.
    pub fn set_reference(
        &mut self,
        catalog: &Catalog,
        id: FieldId,
        reference: &str,
    ) -> Result<()> {
        let def = catalog.def(self.def_id);
        let field = def.field(id);
        if let FieldKind::Reference { target } = field.kind {
            if !reference.is_empty() {
                let resolved = catalog.resolve_ref(reference)?;
                if resolved != target {
                    return Err(Error::InvalidReference {
                        reference: reference.to_string(),
                        detail: format!(
                            "field {} expects references to {}",
                            field.name,
                            catalog.def(target).name()
                        ),
                    });
                }
            }
        }
        self.values[id.0].set(&field.name, Value::Text(reference.to_string()))
    }

    // -------------------------------------------------------------------
    // change tracking and copying
    // -------------------------------------------------------------------

    /// True while any field's working value differs from its persisted one.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.is_new || self.values.iter().any(FieldValue::is_dirty)
    }

    /// Copy working values from another instance of the same definition.
    /// The reference and version token follow only when `include_identity`
    /// is set; the deletion flag always follows the source.
    pub fn copy_from(
        &mut self,
        def: &EntityDef,
        other: &Entity,
        include_identity: bool,
    ) -> Result<()> {
        if other.def_id != self.def_id {
            return Err(Error::InvalidQuery(format!(
                "cannot copy between different definitions (into {})",
                def.name()
            )));
        }
        for field in def.fields() {
            if !include_identity
                && (field.id == EntityDef::REF || field.id == EntityDef::DATA_VERSION)
            {
                continue;
            }
            self.values[field.id.0].set(&field.name, other.value(field.id))?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // JSON projection
    // -------------------------------------------------------------------

    /// Project the working values as a JSON object keyed by declared
    /// field names.
    #[must_use]
    pub fn to_json(&self, catalog: &Catalog) -> serde_json::Value {
        let def = catalog.def(self.def_id);
        let mut map = serde_json::Map::with_capacity(def.fields().len());
        for field in def.fields() {
            let value = match self.value(field.id) {
                Value::Null => serde_json::Value::Null,
                Value::Bool(b) => json!(b),
                Value::Int(n) => json!(n),
                Value::Float(f) => json!(f),
                Value::Text(s) => json!(s),
                Value::Bytes(b) => json!(String::from_utf8_lossy(&b)),
                Value::DateTime(dt) => {
                    let layout = match &field.kind {
                        FieldKind::DateTime { format } => format.as_str(),
                        _ => entorm_core::field::DATETIME_FORMAT,
                    };
                    json!(dt.format(layout).to_string())
                }
            };
            map.insert(field.name.clone(), value);
        }
        serde_json::Value::Object(map)
    }

    /// Apply a JSON object onto the working values, keyed by declared
    /// field names (case-insensitive). Scalars are coerced leniently the
    /// same way driver values are; unknown keys and reserved fields are
    /// skipped, so round-tripping [`Entity::to_json`] output is safe.
    pub fn apply_json(&mut self, catalog: &Catalog, json: &serde_json::Value) -> Result<()> {
        let def = catalog.def(self.def_id);
        let serde_json::Value::Object(map) = json else {
            return Err(Error::InvalidQuery(format!(
                "expected a JSON object for {}",
                def.name()
            )));
        };
        for (key, raw) in map {
            let Some(field) = def.field_by_name(key) else {
                continue;
            };
            if field.id.0 < RESERVED_COUNT {
                continue;
            }
            let incoming = match raw {
                serde_json::Value::Null => Value::Null,
                serde_json::Value::Bool(b) => Value::Bool(*b),
                serde_json::Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        Value::Int(i)
                    } else {
                        Value::Float(n.as_f64().unwrap_or(0.0))
                    }
                }
                serde_json::Value::String(s) => Value::Text(s.clone()),
                // Expanded reference projections carry the bare
                // reference string under the reserved `Ref` key.
                serde_json::Value::Object(obj)
                    if matches!(field.kind, FieldKind::Reference { .. }) =>
                {
                    match obj.get(entorm_core::REF_FIELD) {
                        Some(serde_json::Value::String(s)) => Value::Text(s.clone()),
                        _ => {
                            return Err(Error::InvalidReference {
                                reference: raw.to_string(),
                                detail: format!(
                                    "expanded object for {} has no reference string",
                                    field.name
                                ),
                            })
                        }
                    }
                }
                other => {
                    return Err(Error::TypeMismatch {
                        field: field.name.clone(),
                        expected: field.kind.type_tag(),
                        got: if other.is_array() { "array" } else { "object" },
                    })
                }
            };
            let canonical = field.kind.ingest(&field.name, incoming, catalog)?;
            let name = field.name.clone();
            let id = field.id;
            self.values[id.0].set(&name, canonical)?;
        }
        Ok(())
    }
}
