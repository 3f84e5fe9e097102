//! Pipeline configuration.
//!
//! # Example
//!
//! ```
//! use courier_runtime::config::PipelineConfig;
//! use courier_runtime::resolver::ResolutionStrategy;
//!
//! let config = PipelineConfig::default()
//!     .with_resolution(ResolutionStrategy::External)
//!     .with_execution_duration(false);
//! assert!(config.validate().is_ok());
//! ```

use crate::resolver::{ObjectResolver, ObjectResolverBuilder, ResolutionStrategy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Environment variable selecting the resolution strategy (`internal|external`).
pub const ENV_RESOLUTION: &str = "COURIER_RESOLUTION";
/// Environment variable toggling execution-duration recording.
pub const ENV_INCLUDE_EXECUTION_DURATION: &str = "COURIER_INCLUDE_EXECUTION_DURATION";
/// Environment variable limiting the resolver dependency depth.
pub const ENV_MAX_RESOLUTION_DEPTH: &str = "COURIER_MAX_RESOLUTION_DEPTH";
/// Environment variable toggling the repository stage.
pub const ENV_PERSIST_MESSAGES: &str = "COURIER_PERSIST_MESSAGES";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable holds an unparsable value.
    #[error("Invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },

    /// The configuration is inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings shared by the pipeline facades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// How handler and query objects are obtained.
    pub resolution: ResolutionStrategy,
    /// Record handler execution time on messages.
    pub include_execution_duration: bool,
    /// Maximum depth of internally resolved dependency chains.
    pub max_resolution_depth: usize,
    /// Append the repository stage to default chains.
    pub persist_messages: bool,
}

impl PipelineConfig {
    /// Set the resolution strategy
    #[must_use]
    pub const fn with_resolution(mut self, resolution: ResolutionStrategy) -> Self {
        self.resolution = resolution;
        self
    }

    /// Toggle execution-duration recording
    #[must_use]
    pub const fn with_execution_duration(mut self, include: bool) -> Self {
        self.include_execution_duration = include;
        self
    }

    /// Set the maximum resolution depth
    #[must_use]
    pub const fn with_max_resolution_depth(mut self, depth: usize) -> Self {
        self.max_resolution_depth = depth;
        self
    }

    /// Toggle persistence in default chains
    #[must_use]
    pub const fn with_persistence(mut self, persist: bool) -> Self {
        self.persist_messages = persist;
        self
    }

    /// A resolver builder preset with the strategy and depth limit.
    #[must_use]
    pub fn resolver(&self) -> ObjectResolverBuilder {
        ObjectResolver::builder()
            .strategy(self.resolution)
            .max_depth(self.max_resolution_depth)
    }

    /// Defaults overridden by `COURIER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable cannot be parsed or the result
    /// fails [`PipelineConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`PipelineConfig::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`PipelineConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            resolution: parse(&lookup, ENV_RESOLUTION)?.unwrap_or(defaults.resolution),
            include_execution_duration: parse_flag(&lookup, ENV_INCLUDE_EXECUTION_DURATION)?
                .unwrap_or(defaults.include_execution_duration),
            max_resolution_depth: parse(&lookup, ENV_MAX_RESOLUTION_DEPTH)?.unwrap_or(defaults.max_resolution_depth),
            persist_messages: parse_flag(&lookup, ENV_PERSIST_MESSAGES)?.unwrap_or(defaults.persist_messages),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero resolution depth.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resolution_depth == 0 {
            return Err(ConfigError::Invalid("max_resolution_depth must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resolution: ResolutionStrategy::Internal,
            include_execution_duration: true,
            max_resolution_depth: ObjectResolver::DEFAULT_MAX_DEPTH,
            persist_messages: true,
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<bool>, ConfigError> {
    lookup(name)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue { name, value }),
        })
        .transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Panics: test fails on configuration errors
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_without_variables() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.resolution, ResolutionStrategy::Internal);
        assert!(config.include_execution_duration);
    }

    #[test]
    fn variables_override_defaults() {
        let config = PipelineConfig::from_lookup(lookup(&[
            (ENV_RESOLUTION, "External"),
            (ENV_INCLUDE_EXECUTION_DURATION, "off"),
            (ENV_MAX_RESOLUTION_DEPTH, "4"),
            (ENV_PERSIST_MESSAGES, "0"),
        ]))
        .unwrap();

        assert_eq!(config.resolution, ResolutionStrategy::External);
        assert!(!config.include_execution_duration);
        assert_eq!(config.max_resolution_depth, 4);
        assert!(!config.persist_messages);
    }

    #[test]
    fn bad_values_are_reported_by_name() {
        let error = PipelineConfig::from_lookup(lookup(&[(ENV_RESOLUTION, "magic")])).unwrap_err();
        assert_eq!(
            error,
            ConfigError::InvalidValue {
                name: ENV_RESOLUTION,
                value: "magic".into()
            }
        );
        assert!(PipelineConfig::from_lookup(lookup(&[(ENV_MAX_RESOLUTION_DEPTH, "0")])).is_err());
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: PipelineConfig = serde_json::from_str(r#"{"resolution": "external"}"#).unwrap();
        assert_eq!(config.resolution, ResolutionStrategy::External);
        assert_eq!(config.max_resolution_depth, ObjectResolver::DEFAULT_MAX_DEPTH);
    }
}
