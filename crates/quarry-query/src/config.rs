//! Translation configuration.
//!
//! Loaded from the `[query]` table of a TOML file or built in code:
//!
//! ```toml
//! [query]
//! parameterize = true
//! generate_context_accessors = false
//! default_tracking = "no_tracking"
//! log_sensitive_data = false
//! normalize_in_builder = true
//! ```

use crate::error::{TranslationError, TranslationResult};
use serde::{Deserialize, Serialize};

/// Default change-tracking behavior for queries without a tracking annotation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryTrackingBehavior {
    #[default]
    TrackAll,
    NoTracking,
}

impl QueryTrackingBehavior {
    pub fn is_tracking(self) -> bool {
        matches!(self, Self::TrackAll)
    }
}

/// Options for the translation pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TranslationConfig {
    /// Replace captured values with named parameters (otherwise inline constants)
    pub parameterize: bool,

    /// Turn context member reads into accessors resolved per execution
    pub generate_context_accessors: bool,

    /// Tracking behavior when the query carries no tracking annotation
    pub default_tracking: QueryTrackingBehavior,

    /// Include expression text in parameterization errors
    pub log_sensitive_data: bool,

    /// Run the normalizer again on clause expressions while building models
    pub normalize_in_builder: bool,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            parameterize: true,
            generate_context_accessors: false,
            default_tracking: QueryTrackingBehavior::TrackAll,
            log_sensitive_data: false,
            normalize_in_builder: true,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    query: TranslationConfig,
}

impl TranslationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML text; settings live under a `[query]` table
    pub fn from_toml_str(content: &str) -> TranslationResult<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(file.query)
    }

    /// Serialize as a `[query]` TOML table
    pub fn to_toml_string(&self) -> TranslationResult<String> {
        #[derive(Serialize)]
        struct Out<'a> {
            query: &'a TranslationConfig,
        }
        toml::to_string(&Out { query: self })
            .map_err(|e| TranslationError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TranslationConfig::default();
        assert!(config.parameterize);
        assert!(!config.generate_context_accessors);
        assert_eq!(config.default_tracking, QueryTrackingBehavior::TrackAll);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TranslationConfig::from_toml_str(
            r#"
            [query]
            default_tracking = "no_tracking"
            log_sensitive_data = true
            "#,
        )
        .unwrap();
        assert_eq!(config.default_tracking, QueryTrackingBehavior::NoTracking);
        assert!(config.log_sensitive_data);
        assert!(config.parameterize);
    }

    #[test]
    fn test_missing_table_is_default() {
        let config = TranslationConfig::from_toml_str("").unwrap();
        assert_eq!(config, TranslationConfig::default());
    }

    #[test]
    fn test_invalid_value_is_config_error() {
        let err = TranslationConfig::from_toml_str("[query]\nparameterize = \"yes\"").unwrap_err();
        assert!(matches!(err, TranslationError::Config(_)));
    }

    #[test]
    fn test_round_trip_through_toml() {
        let config = TranslationConfig {
            generate_context_accessors: true,
            ..TranslationConfig::default()
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(TranslationConfig::from_toml_str(&text).unwrap(), config);
    }
}
