//! Numbering policy engine.
//!
//! For every pending change in `Insert`/`Update` state, each rule registered
//! for its entity type runs through these stages:
//!
//! ```text
//! Idle ─► ScopeResolved ─► Locked ─► Allocated ─► Probed ─┬─► Assigned
//!                                        ▲                │
//!                                        └── Retrying ◄───┘ (candidate taken)
//! ```
//!
//! Rules run one after another on the same session. A lock taken for a scope
//! key is kept until the transaction ends, so a later rule or entity sharing
//! the key does not lock again.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::error::{NumberingError, Result};
use crate::traits::session::{NumberingSession, Probe};
use crate::types::{
    config::{is_table_name, NumberingConfig, NumberingRule},
    entity::EntityChange,
    scope::{ScopeKey, ScopeValue},
};

/// Stage of one rule's numbering pass, recorded on trace events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberingStage {
    Idle,
    ScopeResolved,
    Locked,
    Allocated,
    Probed,
    Retrying,
    Assigned,
}

impl NumberingStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ScopeResolved => "scope_resolved",
            Self::Locked => "locked",
            Self::Allocated => "allocated",
            Self::Probed => "probed",
            Self::Retrying => "retrying",
            Self::Assigned => "assigned",
        }
    }
}

impl fmt::Display for NumberingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A number written into a pending change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedNumber {
    /// Position of the change in the slice passed to `process`
    pub index: usize,
    pub entity_type: String,
    pub field: String,
    pub scope_key: ScopeKey,
    /// Raw counter value behind the number
    pub value: i64,
    pub number: String,
    /// Candidates tried, including the one assigned
    pub attempts: u32,
}

/// Assigns numbers to pending changes before their transaction commits.
#[derive(Debug, Clone)]
pub struct NumberingEngine {
    config: Arc<NumberingConfig>,
}

impl NumberingEngine {
    pub fn new(config: Arc<NumberingConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NumberingConfig {
        &self.config
    }

    /// Number every empty numbered field of `changes`, in place.
    ///
    /// Must run inside the transaction that will persist `changes`. Any error
    /// leaves the changes partially numbered; the caller is expected to roll
    /// the transaction back and propagate the error.
    #[instrument(skip_all, fields(changes = changes.len()))]
    pub async fn process<S>(
        &self,
        session: &mut S,
        changes: &mut [EntityChange],
    ) -> Result<Vec<AssignedNumber>>
    where
        S: NumberingSession + ?Sized,
    {
        let mut held = HashSet::new();
        let mut assigned = Vec::new();

        for (index, change) in changes.iter_mut().enumerate() {
            if !change.kind.is_numberable() {
                continue;
            }

            for rule in self.config.rules_for(&change.entity_type) {
                if let Some(mut number) = self.number_field(session, change, rule, &mut held).await? {
                    number.index = index;
                    assigned.push(number);
                }
            }
        }

        Ok(assigned)
    }

    async fn number_field<S>(
        &self,
        session: &mut S,
        change: &mut EntityChange,
        rule: &NumberingRule,
        held: &mut HashSet<ScopeKey>,
    ) -> Result<Option<AssignedNumber>>
    where
        S: NumberingSession + ?Sized,
    {
        let entity_type = change.entity_type.as_str();
        let field = rule.field_name.as_str();

        let Some(current) = change.field(field) else {
            return Err(NumberingError::misconfigured(
                entity_type,
                field,
                "field is not present on the entity",
            ));
        };
        if !current.is_empty() {
            debug!(entity_type, field, "already numbered, skipping");
            return Ok(None);
        }
        if !is_table_name(&change.table) {
            return Err(NumberingError::misconfigured(
                entity_type,
                field,
                format!("table name {:?} is not a plain identifier", change.table),
            ));
        }
        debug!(entity_type, field, stage = %NumberingStage::Idle);

        let scope = rule
            .scope_fields
            .iter()
            .map(|name| match change.field(name) {
                Some(value) => Ok(ScopeValue::new(name.clone(), value.clone())),
                None => Err(NumberingError::misconfigured(
                    entity_type,
                    field,
                    format!("scope field {name} is not present on the entity"),
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        let key = ScopeKey::derive(entity_type, field, &scope);
        debug!(scope_key = %key, stage = %NumberingStage::ScopeResolved);

        if !held.contains(&key) {
            session
                .acquire_exclusive(&key, self.config.lock_timeout())
                .await
                .inspect_err(|e| warn!(scope_key = %key, error = %e, "numbering lock failed"))?;
            held.insert(key.clone());
        }
        debug!(scope_key = %key, stage = %NumberingStage::Locked);

        let max_attempts = self.config.max_attempts();
        for attempt in 1..=max_attempts {
            let value = session.allocate(&key, rule.start, rule.increment_by).await?;
            let candidate = rule.format(value);
            debug!(scope_key = %key, value, attempt, stage = %NumberingStage::Allocated);

            let probe = Probe {
                table: &change.table,
                number_field: field,
                number: &candidate,
                scope: &scope,
            };
            if session.exists(&probe).await? {
                warn!(
                    scope_key = %key,
                    candidate = %candidate,
                    attempt,
                    stage = %NumberingStage::Retrying,
                    "candidate number already taken"
                );
                continue;
            }
            debug!(scope_key = %key, stage = %NumberingStage::Probed);

            let assigned = AssignedNumber {
                index: 0,
                entity_type: entity_type.to_string(),
                field: field.to_string(),
                scope_key: key,
                value,
                number: candidate.clone(),
                attempts: attempt,
            };
            change.assign_number(field, candidate)?;
            info!(
                entity_type = %assigned.entity_type,
                field = %assigned.field,
                number = %assigned.number,
                attempts = attempt,
                stage = %NumberingStage::Assigned,
                "number assigned"
            );
            return Ok(Some(assigned));
        }

        Err(NumberingError::RetryLimitExceeded {
            scope_key: key.to_string(),
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryBackend;
    use crate::types::{value::FieldValue, ChangeKind};

    fn engine(rule: NumberingRule) -> NumberingEngine {
        let config = NumberingConfig::builder()
            .rule("Product", rule)
            .build()
            .unwrap();
        NumberingEngine::new(config.into_shared())
    }

    fn product() -> EntityChange {
        EntityChange::insert("Product", "products")
            .with_field("name", "test")
            .with_field("number", FieldValue::Null)
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(NumberingStage::ScopeResolved.to_string(), "scope_resolved");
        assert_eq!(NumberingStage::Retrying.as_str(), "retrying");
    }

    #[tokio::test]
    async fn test_reports_assignments_by_index() {
        let engine = engine(NumberingRule::builder().field_name("number").build());
        let backend = MemoryBackend::new();
        let mut session = backend.begin();

        let mut changes = vec![
            EntityChange::insert("Customer", "customers").with_field("name", "x"),
            product(),
            product(),
        ];
        let assigned = engine.process(&mut session, &mut changes).await.unwrap();

        assert_eq!(assigned.len(), 2);
        assert_eq!(assigned[0].index, 1);
        assert_eq!(assigned[1].index, 2);
        assert_eq!(assigned[1].number, "2");
        assert_eq!(assigned[1].scope_key.as_str(), "Product.number");
    }

    #[tokio::test]
    async fn test_deleted_entities_are_left_alone() {
        let engine = engine(NumberingRule::builder().field_name("number").build());
        let backend = MemoryBackend::new();
        let mut session = backend.begin();

        let mut changes = vec![EntityChange::new("Product", "products", ChangeKind::Delete)
            .with_field("number", FieldValue::Null)];
        let assigned = engine.process(&mut session, &mut changes).await.unwrap();

        assert!(assigned.is_empty());
        assert_eq!(changes[0].field("number"), Some(&FieldValue::Null));
    }

    #[tokio::test]
    async fn test_missing_target_field_is_misconfigured() {
        let engine = engine(NumberingRule::builder().field_name("code").build());
        let backend = MemoryBackend::new();
        let mut session = backend.begin();

        let err = engine
            .process(&mut session, &mut [product()])
            .await
            .unwrap_err();
        assert!(matches!(err, NumberingError::MisconfiguredRule { .. }));
    }

    #[tokio::test]
    async fn test_missing_scope_field_is_misconfigured() {
        let engine = engine(
            NumberingRule::builder()
                .field_name("number")
                .scope_fields(vec!["branch".to_string()])
                .build(),
        );
        let backend = MemoryBackend::new();
        let mut session = backend.begin();

        let err = engine
            .process(&mut session, &mut [product()])
            .await
            .unwrap_err();
        assert!(
            matches!(err, NumberingError::MisconfiguredRule { ref reason, .. } if reason.contains("branch"))
        );
        assert_eq!(backend.counter_count(), 0);
    }

    #[tokio::test]
    async fn test_unsafe_table_name_is_rejected() {
        let engine = engine(NumberingRule::builder().field_name("number").build());
        let backend = MemoryBackend::new();
        let mut session = backend.begin();

        let mut changes = [EntityChange::insert("Product", "products; --")
            .with_field("number", FieldValue::Null)];
        assert!(engine.process(&mut session, &mut changes).await.is_err());
    }
}
