//! Scope keys identify one counter.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::types::value::FieldValue;

/// Maximum key length, matching the `scope_key` column.
pub const MAX_SCOPE_KEY_LEN: usize = 256;

/// One scope field and its current value on the entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeValue {
    pub field: String,
    pub value: FieldValue,
}

impl ScopeValue {
    pub fn new(field: impl Into<String>, value: FieldValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }
}

/// Counter identity: entity type, numbered field and normalized scope values.
///
/// Format: `{entity_type}.{field}` followed by `_{scope_field}_{value}` for
/// each scope field in rule order. Keys over [`MAX_SCOPE_KEY_LEN`] characters
/// keep a readable prefix and end in `#` plus the SHA-256 of the full key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn derive(entity_type: &str, field: &str, scope: &[ScopeValue]) -> Self {
        let mut key = format!("{entity_type}.{field}");
        for sv in scope {
            key.push('_');
            key.push_str(&sv.field);
            key.push('_');
            key.push_str(&sv.value.normalized());
        }

        if key.chars().count() <= MAX_SCOPE_KEY_LEN {
            return Self(key);
        }

        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        let keep = MAX_SCOPE_KEY_LEN - digest.len() - 1;
        let mut shortened: String = key.chars().take(keep).collect();
        shortened.push('#');
        shortened.push_str(&digest);
        Self(shortened)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ScopeKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_unscoped_key_is_type_and_field() {
        let key = ScopeKey::derive("Product", "number", &[]);
        assert_eq!(key.as_str(), "Product.number");
    }

    #[test]
    fn test_scope_values_are_appended_in_order() {
        let ordered = NaiveDate::from_ymd_opt(2021, 9, 26)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        let key = ScopeKey::derive(
            "Invoice",
            "number",
            &[
                ScopeValue::new("branch", FieldValue::from("north")),
                ScopeValue::new("issued_at", FieldValue::from(ordered)),
            ],
        );
        assert_eq!(
            key.as_str(),
            "Invoice.number_branch_north_issued_at_20210926"
        );
    }

    #[test]
    fn test_null_scope_value_has_a_marker() {
        let key = ScopeKey::derive(
            "Invoice",
            "number",
            &[ScopeValue::new("branch", FieldValue::Null)],
        );
        assert_eq!(key.as_str(), "Invoice.number_branch_~");
    }

    #[test]
    fn test_different_fields_get_different_counters() {
        let a = ScopeKey::derive("Order", "number", &[]);
        let b = ScopeKey::derive("Order", "tracking_code", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_long_keys_are_shortened_with_a_digest() {
        let long = "x".repeat(400);
        let a = ScopeKey::derive("Order", "number", &[ScopeValue::new("note", FieldValue::from(long.clone()))]);
        let b = ScopeKey::derive(
            "Order",
            "number",
            &[ScopeValue::new("note", FieldValue::from(format!("{long}y")))],
        );

        assert_eq!(a.as_str().chars().count(), MAX_SCOPE_KEY_LEN);
        assert!(a.as_str().starts_with("Order.number_note_x"));
        assert_ne!(a, b);
    }
}
