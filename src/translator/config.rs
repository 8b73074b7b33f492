//! Translator configuration
//!
//! Loaded from a JSON file. Every field has a default, so an empty object
//! is a valid configuration.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bson::CodecSettings;
use crate::expr::{TranslateError, TranslateResult};
use crate::observability::{log_event_with_fields, Event};
use crate::planner::DEFAULT_GROUP_FIELD_PREFIX;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatorConfig {
    /// Prefix of synthesised group output fields
    #[serde(default = "default_group_field_prefix")]
    pub group_field_prefix: String,

    /// Drop or merge stages that cannot change the result
    #[serde(default = "default_eliminate_redundant_stages")]
    pub eliminate_redundant_stages: bool,

    #[serde(default)]
    pub codec: CodecSettings,
}

fn default_group_field_prefix() -> String {
    DEFAULT_GROUP_FIELD_PREFIX.to_string()
}

fn default_eliminate_redundant_stages() -> bool {
    true
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            group_field_prefix: default_group_field_prefix(),
            eliminate_redundant_stages: default_eliminate_redundant_stages(),
            codec: CodecSettings::default(),
        }
    }
}

impl TranslatorConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> TranslateResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| TranslateError::InvalidConfig(format!("Failed to read config: {}", e)))?;

        let config: TranslatorConfig = serde_json::from_str(&content)
            .map_err(|e| TranslateError::InvalidConfig(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        let path = path.display().to_string();
        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("path", &path),
                ("group_field_prefix", &config.group_field_prefix),
            ],
        );

        Ok(config)
    }

    pub fn validate(&self) -> TranslateResult<()> {
        let prefix = &self.group_field_prefix;
        if prefix.is_empty() {
            return Err(TranslateError::InvalidConfig(
                "group_field_prefix must not be empty".into(),
            ));
        }
        if prefix.contains('.') || prefix.starts_with('$') || prefix.contains('\0') {
            return Err(TranslateError::InvalidConfig(format!(
                "Invalid group_field_prefix: '{}'",
                prefix
            )));
        }

        self.codec
            .validate()
            .map_err(|e| TranslateError::InvalidConfig(format!("Codec config error: {}", e)))?;

        Ok(())
    }
}
