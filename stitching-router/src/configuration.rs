//! Logic for loading configuration in to an object model
use std::str::FromStr;

use displaydoc::Display;
use schemars::gen::SchemaSettings;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not deserialize configuration: {0}
    DeserializeConfigError(#[from] serde_yaml::Error),

    /// value for '{name}' is invalid: {message}
    InvalidConfiguration { name: &'static str, message: String },
}

/// The configuration of the stitching engine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// Execution options.
    pub execution: Execution,

    /// Query planning options.
    pub planning: Planning,
}

/// Execution options.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Execution {
    /// Dispatch the location requests of one dependency tier concurrently.
    /// When disabled they are sent one after the other.
    pub nonblocking: bool,
}

impl Default for Execution {
    fn default() -> Self {
        Self { nonblocking: true }
    }
}

/// Query planning options.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Planning {
    /// Maximum number of steps a single plan may contain.
    pub max_steps: usize,
}

const DEFAULT_MAX_STEPS: usize = 1024;

impl Default for Planning {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl Configuration {
    fn validate(self) -> Result<Self, ConfigurationError> {
        if self.planning.max_steps == 0 {
            return Err(ConfigurationError::InvalidConfiguration {
                name: "planning.max_steps",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(self)
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Configuration = serde_yaml::from_str(s)?;
        config.validate()
    }
}

/// Generate a JSON schema for the configuration.
pub fn generate_config_schema() -> RootSchema {
    let settings = SchemaSettings::draft2019_09().with(|s| {
        s.option_nullable = true;
        s.option_add_null_type = false;
        s.inline_subschemas = true;
    });
    let gen = settings.into_generator();
    gen.into_root_schema_for::<Configuration>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let configuration = Configuration::from_str("{}").unwrap();
        assert_eq!(configuration, Configuration::default());
        assert!(configuration.execution.nonblocking);
        assert_eq!(configuration.planning.max_steps, DEFAULT_MAX_STEPS);
    }

    #[test]
    fn test_partial_yaml() {
        let configuration = Configuration::from_str(
            r#"
execution:
  nonblocking: false
"#,
        )
        .unwrap();
        assert!(!configuration.execution.nonblocking);
        assert_eq!(configuration.planning, Planning::default());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let error = Configuration::from_str(
            r#"
execution:
  blocking: true
"#,
        )
        .unwrap_err();
        assert!(matches!(error, ConfigurationError::DeserializeConfigError(_)));
    }

    #[test]
    fn test_zero_max_steps_is_rejected() {
        let error = Configuration::from_str("planning:\n  max_steps: 0\n").unwrap_err();
        assert_eq!(
            error.to_string(),
            "value for 'planning.max_steps' is invalid: must be greater than zero"
        );
    }

    #[test]
    fn test_config_schema_lists_options() {
        let schema = serde_json::to_string(&generate_config_schema()).unwrap();
        assert!(schema.contains("nonblocking"));
        assert!(schema.contains("max_steps"));
    }
}
