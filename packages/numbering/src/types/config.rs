//! Numbering rules and the immutable per-process configuration.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{NumberingError, Result};

/// Default wait for a scope lock before the save fails.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Default number of candidates tried before giving up on a scope.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// Postgres identifier limit.
const MAX_IDENTIFIER_LEN: usize = 63;

fn default_start() -> i64 {
    1
}

fn default_increment() -> i64 {
    1
}

/// Which field of an entity gets numbered and how.
///
/// Issued values follow `start, start + increment_by, ...` per scope key and
/// are formatted as `prefix` followed by the decimal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct NumberingRule {
    /// Target field; also the column probed for duplicates
    #[builder(setter(into))]
    pub field_name: String,

    /// Fields whose values scope the counter and the uniqueness probe
    #[serde(default)]
    #[builder(default)]
    pub scope_fields: Vec<String>,

    #[serde(default = "default_start")]
    #[builder(default = 1)]
    pub start: i64,

    #[serde(default = "default_increment")]
    #[builder(default = 1)]
    pub increment_by: i64,

    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub prefix: Option<String>,
}

impl NumberingRule {
    /// Format an allocated value as a candidate number.
    pub fn format(&self, value: i64) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{value}"),
            None => value.to_string(),
        }
    }

    fn validate(&self, entity_type: &str) -> Result<()> {
        let fail = |reason: String| NumberingError::misconfigured(entity_type, &self.field_name, reason);

        if !is_sql_identifier(&self.field_name) {
            return Err(fail("field name is not a plain identifier".into()));
        }
        if self.increment_by <= 0 {
            return Err(fail(format!("increment_by must be positive, got {}", self.increment_by)));
        }
        if self.start < 0 {
            return Err(fail(format!("start must not be negative, got {}", self.start)));
        }
        for (i, scope_field) in self.scope_fields.iter().enumerate() {
            if !is_sql_identifier(scope_field) {
                return Err(fail(format!("scope field {scope_field:?} is not a plain identifier")));
            }
            if scope_field == &self.field_name {
                return Err(fail("a field cannot scope its own number".into()));
            }
            if self.scope_fields[..i].contains(scope_field) {
                return Err(fail(format!("scope field {scope_field} listed twice")));
            }
        }
        Ok(())
    }
}

/// Whether `name` can be quoted into SQL as a column or table name.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_IDENTIFIER_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Like [`is_sql_identifier`] but allows one schema qualifier.
pub fn is_table_name(name: &str) -> bool {
    match name.split_once('.') {
        Some((schema, table)) => is_sql_identifier(schema) && is_sql_identifier(table),
        None => is_sql_identifier(name),
    }
}

/// Registry of numbering rules per entity type, plus engine limits.
///
/// Built once at startup through [`NumberingConfigBuilder`] and shared behind
/// an `Arc`; there is no way to mutate it afterwards.
#[derive(Debug, Clone)]
pub struct NumberingConfig {
    rules: IndexMap<String, Vec<NumberingRule>>,
    lock_timeout: Duration,
    max_attempts: u32,
}

impl NumberingConfig {
    pub fn builder() -> NumberingConfigBuilder {
        NumberingConfigBuilder::default()
    }

    /// Rules for an entity type, in processing order. Empty when unnumbered.
    pub fn rules_for(&self, entity_type: &str) -> &[NumberingRule] {
        self.rules.get(entity_type).map_or(&[], Vec::as_slice)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

/// On-disk shape accepted by [`NumberingConfigBuilder::from_json`].
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    lock_timeout_ms: Option<u64>,
    #[serde(default)]
    max_attempts: Option<u32>,
    #[serde(default)]
    entities: IndexMap<String, Vec<NumberingRule>>,
}

/// Collects rules and limits, validating everything in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct NumberingConfigBuilder {
    rules: IndexMap<String, Vec<NumberingRule>>,
    lock_timeout: Duration,
    max_attempts: u32,
}

impl Default for NumberingConfigBuilder {
    fn default() -> Self {
        Self {
            rules: IndexMap::new(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl NumberingConfigBuilder {
    /// Parse a JSON document such as
    ///
    /// ```json
    /// {
    ///   "lock_timeout_ms": 15000,
    ///   "entities": {
    ///     "Product": [{ "field_name": "number", "prefix": "Prefix-", "start": 100, "increment_by": 5 }]
    ///   }
    /// }
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let mut builder = Self::default();
        if let Some(ms) = file.lock_timeout_ms {
            builder.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(max_attempts) = file.max_attempts {
            builder.max_attempts = max_attempts;
        }
        for (entity_type, rules) in file.entities {
            builder = builder.rules(entity_type, rules);
        }
        Ok(builder)
    }

    /// Append a rule for an entity type.
    pub fn rule(mut self, entity_type: impl Into<String>, rule: NumberingRule) -> Self {
        self.rules.entry(entity_type.into()).or_default().push(rule);
        self
    }

    pub fn rules(
        mut self,
        entity_type: impl Into<String>,
        rules: impl IntoIterator<Item = NumberingRule>,
    ) -> Self {
        self.rules.entry(entity_type.into()).or_default().extend(rules);
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn build(self) -> Result<NumberingConfig> {
        if self.max_attempts == 0 {
            return Err(NumberingError::misconfigured("*", "*", "max_attempts must be at least 1"));
        }

        for (entity_type, rules) in &self.rules {
            for (i, rule) in rules.iter().enumerate() {
                rule.validate(entity_type)?;
                if rules[..i].iter().any(|r| r.field_name == rule.field_name) {
                    return Err(NumberingError::misconfigured(
                        entity_type,
                        &rule.field_name,
                        "field is numbered by more than one rule",
                    ));
                }
            }
        }

        Ok(NumberingConfig {
            rules: self.rules,
            lock_timeout: self.lock_timeout,
            max_attempts: self.max_attempts,
        })
    }
}
