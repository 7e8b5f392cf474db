use anyhow::{Context, Result};
use dotenvy::dotenv;
use numbering::{NumberingConfig, NumberingConfigBuilder, NumberingRule};
use std::env;
use std::time::Duration;

use crate::domains::products::models::product::{NUMBER_FIELD, PRODUCT_ENTITY};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Overrides the lock timeout from the rules file
    pub numbering_lock_timeout: Option<Duration>,
    /// Overrides the attempt budget from the rules file
    pub numbering_max_attempts: Option<u32>,
    /// JSON file with numbering rules; the product rule is used when unset
    pub numbering_rules_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            numbering_lock_timeout: env::var("NUMBERING_LOCK_TIMEOUT_MS")
                .ok()
                .map(|ms| ms.parse().map(Duration::from_millis))
                .transpose()
                .context("NUMBERING_LOCK_TIMEOUT_MS must be a number of milliseconds")?,
            numbering_max_attempts: env::var("NUMBERING_MAX_ATTEMPTS")
                .ok()
                .map(|n| n.parse::<u32>())
                .transpose()
                .context("NUMBERING_MAX_ATTEMPTS must be a positive number")?,
            numbering_rules_path: env::var("NUMBERING_RULES_PATH").ok(),
        })
    }

    /// Build the numbering registry once at startup.
    pub fn numbering_config(&self) -> Result<NumberingConfig> {
        let mut builder = match &self.numbering_rules_path {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read numbering rules from {path}"))?;
                NumberingConfigBuilder::from_json(&json)
                    .with_context(|| format!("Invalid numbering rules in {path}"))?
            }
            None => NumberingConfig::builder().rule(PRODUCT_ENTITY, default_product_rule()),
        };

        if let Some(timeout) = self.numbering_lock_timeout {
            builder = builder.lock_timeout(timeout);
        }
        if let Some(max_attempts) = self.numbering_max_attempts {
            builder = builder.max_attempts(max_attempts);
        }

        builder.build().context("Invalid numbering configuration")
    }
}

/// Products are numbered `Prefix-100`, `Prefix-105`, ...
pub fn default_product_rule() -> NumberingRule {
    NumberingRule::builder()
        .field_name(NUMBER_FIELD)
        .prefix("Prefix-")
        .start(100)
        .increment_by(5)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: "postgres://localhost/numbering".to_string(),
            port: 8080,
            numbering_lock_timeout: None,
            numbering_max_attempts: None,
            numbering_rules_path: None,
        }
    }

    #[test]
    fn test_defaults_to_product_rule() {
        let rules = config().numbering_config().unwrap();
        assert_eq!(rules.rules_for(PRODUCT_ENTITY), [default_product_rule()]);
        assert_eq!(rules.lock_timeout(), numbering::DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn test_env_overrides_limits() {
        let rules = Config {
            numbering_lock_timeout: Some(Duration::from_millis(250)),
            numbering_max_attempts: Some(7),
            ..config()
        }
        .numbering_config()
        .unwrap();

        assert_eq!(rules.lock_timeout(), Duration::from_millis(250));
        assert_eq!(rules.max_attempts(), 7);
    }

    #[test]
    fn test_missing_rules_file_is_an_error() {
        let result = Config {
            numbering_rules_path: Some("/nonexistent/numbering.json".to_string()),
            ..config()
        }
        .numbering_config();
        assert!(result.is_err());
    }
}
