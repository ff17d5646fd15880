//! # Engine Configuration
//!
//! Cache policy and query defaults, loaded from TOML:
//!
//! ```toml
//! [cache]
//! layers = ["eager", "tracked"]
//! eager_capacity = 10000
//! tracked_capacity = 10000
//! tracked_ttl_secs = 300
//!
//! [query]
//! include_inferred = true
//! ```
//!
//! Every field is optional; the default is a single eager layer.

use crate::EngineError;
use crate::primitives::{DEFAULT_EAGER_CAPACITY, DEFAULT_TRACKED_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One cache layer of the lookup chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    None,
    Eager,
    Tracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Layers in lookup order.
    pub layers: Vec<CachePolicy>,
    pub eager_capacity: usize,
    pub tracked_capacity: u64,
    pub tracked_ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            layers: vec![CachePolicy::Eager],
            eager_capacity: DEFAULT_EAGER_CAPACITY,
            tracked_capacity: DEFAULT_TRACKED_CAPACITY,
            tracked_ttl_secs: None,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn tracked_ttl(&self) -> Option<Duration> {
        self.tracked_ttl_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryConfig {
    pub include_inferred: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            include_inferred: true,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub query: QueryConfig,
}

impl EngineConfig {
    /// A configuration with exactly the given cache layers.
    #[must_use]
    pub fn with_layers(layers: Vec<CachePolicy>) -> Self {
        Self {
            cache: CacheConfig {
                layers,
                ..CacheConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.cache.layers.contains(&CachePolicy::Eager) && self.cache.eager_capacity == 0 {
            return Err(EngineError::Config(
                "cache.eager_capacity must be greater than zero".to_string(),
            ));
        }
        if self.cache.layers.contains(&CachePolicy::Tracked) && self.cache.tracked_capacity == 0 {
            return Err(EngineError::Config(
                "cache.tracked_capacity must be greater than zero".to_string(),
            ));
        }
        if self.cache.tracked_ttl_secs == Some(0) {
            return Err(EngineError::Config(
                "cache.tracked_ttl_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = EngineConfig::from_toml_str("").expect("parse");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cache.layers, vec![CachePolicy::Eager]);
        assert!(config.query.include_inferred);
    }

    #[test]
    fn full_document_parses() {
        let config = EngineConfig::from_toml_str(
            r#"
            [cache]
            layers = ["eager", "tracked"]
            eager_capacity = 16
            tracked_capacity = 32
            tracked_ttl_secs = 60

            [query]
            include_inferred = false
            "#,
        )
        .expect("parse");
        assert_eq!(
            config.cache.layers,
            vec![CachePolicy::Eager, CachePolicy::Tracked]
        );
        assert_eq!(config.cache.eager_capacity, 16);
        assert_eq!(config.cache.tracked_ttl(), Some(Duration::from_secs(60)));
        assert!(!config.query.include_inferred);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = EngineConfig::from_toml_str("[cache]\neager_capacity = 0\n");
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let result = EngineConfig::from_toml_str("[cache]\nlayers = [\"weak\"]\n");
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("tripod.toml");
        std::fs::write(&path, "[cache]\nlayers = [\"none\"]\n").expect("write");
        let config = EngineConfig::from_file(&path).expect("load");
        assert_eq!(config.cache.layers, vec![CachePolicy::None]);
    }
}
