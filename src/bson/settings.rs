//! Codec limits

use serde::{Deserialize, Serialize};

/// Largest document accepted by default (16 MiB)
pub const DEFAULT_MAX_DOCUMENT_SIZE: i32 = 16 * 1024 * 1024;

/// Deepest container nesting accepted by default
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 100;

/// Limits enforced by the reader and the writer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSettings {
    /// Maximum encoded size of one document, length prefix included
    #[serde(default = "default_max_document_size")]
    pub max_document_size: i32,

    /// Maximum number of simultaneously open containers
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
}

fn default_max_document_size() -> i32 {
    DEFAULT_MAX_DOCUMENT_SIZE
}

fn default_max_nesting_depth() -> usize {
    DEFAULT_MAX_NESTING_DEPTH
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }
}

impl CodecSettings {
    /// Returns a description of the first invalid limit, if any
    pub fn validate(&self) -> Result<(), String> {
        if self.max_document_size < 5 {
            return Err(format!(
                "max_document_size must be at least 5, got {}",
                self.max_document_size
            ));
        }
        if self.max_nesting_depth == 0 {
            return Err("max_nesting_depth must be > 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CodecSettings::default();
        assert_eq!(settings.max_document_size, 16 * 1024 * 1024);
        assert_eq!(settings.max_nesting_depth, 100);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: CodecSettings =
            serde_json::from_str(r#"{"max_nesting_depth": 4}"#).unwrap();
        assert_eq!(settings.max_nesting_depth, 4);
        assert_eq!(settings.max_document_size, DEFAULT_MAX_DOCUMENT_SIZE);
    }

    #[test]
    fn test_rejects_tiny_document_limit() {
        let settings = CodecSettings {
            max_document_size: 4,
            ..CodecSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
