//! Pending entity changes handed to the engine by the persistence layer.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{NumberingError, Result};
use crate::types::value::FieldValue;

/// How the entity is being written in the current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Only inserted and updated entities receive numbers.
    pub fn is_numberable(self) -> bool {
        matches!(self, Self::Insert | Self::Update)
    }
}

/// Transient view of one entity inside a save operation.
///
/// Field order is preserved so that the persistence layer can turn the change
/// back into a column list without reshuffling.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange {
    /// Stable identifier used to look up numbering rules
    pub entity_type: String,

    /// Backing table, optionally schema-qualified (`billing.invoices`)
    pub table: String,

    pub kind: ChangeKind,

    pub fields: IndexMap<String, FieldValue>,
}

impl EntityChange {
    pub fn new(entity_type: impl Into<String>, table: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            entity_type: entity_type.into(),
            table: table.into(),
            kind,
            fields: IndexMap::new(),
        }
    }

    /// Shorthand for an inserted entity.
    pub fn insert(entity_type: impl Into<String>, table: impl Into<String>) -> Self {
        Self::new(entity_type, table, ChangeKind::Insert)
    }

    /// Add a field value (builder style).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text value of a field, if it holds text.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_text)
    }

    /// Write a generated number into an existing, empty field.
    ///
    /// Never overwrites: a populated or missing field means the rule does not
    /// fit this entity.
    pub fn assign_number(&mut self, field: &str, number: String) -> Result<()> {
        let Some(slot) = self.fields.get_mut(field) else {
            return Err(NumberingError::misconfigured(
                &self.entity_type,
                field,
                "field is not present on the entity",
            ));
        };
        if !slot.is_empty() {
            return Err(NumberingError::misconfigured(
                &self.entity_type,
                field,
                "refusing to overwrite an existing number",
            ));
        }
        *slot = FieldValue::Text(number);
        Ok(())
    }
}
