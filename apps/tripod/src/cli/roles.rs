//! # Role Files
//!
//! Roles for the CLI's type registry, loaded from TOML:
//!
//! ```toml
//! [[role]]
//! name = "Agent"
//! type = "http://xmlns.com/foaf/0.1/Agent"
//!
//! [[role]]
//! name = "Person"
//! type = "http://xmlns.com/foaf/0.1/Person"
//! extends = ["Agent"]
//! bulk = ["http://xmlns.com/foaf/0.1/name"]
//! ```

use super::CliError;
use serde::Deserialize;
use std::path::Path;
use tripod_core::{EngineError, RoleDef, TypeRegistry};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleFile {
    #[serde(default)]
    pub role: Vec<RoleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub rdf_type: Option<String>,
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub bulk: Vec<String>,
    #[serde(default)]
    pub merge_from: bool,
}

impl RoleFile {
    pub fn parse(text: &str) -> Result<Self, CliError> {
        toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()).into())
    }

    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CliError::Io(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Build a registry with every role of the file.
    pub fn into_registry(self) -> TypeRegistry {
        let registry = TypeRegistry::new();
        for spec in self.role {
            let mut def = RoleDef::new(spec.name);
            if let Some(t) = spec.rdf_type {
                def = def.with_type(t);
            }
            for parent in spec.extends {
                def = def.extends(parent);
            }
            for predicate in spec.bulk {
                def = def.bulk_property(predicate);
            }
            if spec.merge_from {
                def = def.merge_from();
            }
            registry.register(def);
        }
        registry
    }
}
