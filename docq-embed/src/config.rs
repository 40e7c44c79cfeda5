//! Embedding model configuration.

use serde::{Deserialize, Serialize};

/// Default model: the retrieval model the ingestion pipeline was tuned with.
pub const DEFAULT_MODEL: &str = "bge-base-en-v1.5";

/// Configuration for a [`FastEmbedProvider`](crate::FastEmbedProvider).
///
/// Only builtin fastembed models are supported; the model is selected by
/// name. Unknown names fail at initialization with an
/// [`EmbedError::InvalidConfig`](crate::EmbedError::InvalidConfig).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbedConfig {
    model_name: String,
}

impl EmbedConfig {
    /// Configuration for the given builtin model name.
    pub fn new<S: Into<String>>(model_name: S) -> Self {
        Self {
            model_name: model_name.into(),
        }
    }

    /// The configured model name.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_bge() {
        let config = EmbedConfig::default();
        assert_eq!(config.model_name(), "bge-base-en-v1.5");
    }

    #[test]
    fn config_serializes_deterministically() {
        let a = serde_json::to_string(&EmbedConfig::default()).unwrap();
        let b = serde_json::to_string(&EmbedConfig::default()).unwrap();
        assert_eq!(a, b);
    }
}
