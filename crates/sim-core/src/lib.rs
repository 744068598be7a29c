#![deny(warnings)]

//! Core domain models for the resource economy.
//!
//! This crate declares resources and their production dependencies, derives
//! the immutable resource graph (tiers, dependents, topological order) and
//! holds the simulation settings loaded from scenario files.

mod config;
mod graph;

pub use config::{default_catalog, load_scenario, Scenario, SimConfig};
pub use graph::{Resource, ResourceGraph};

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Floor used for dependency-free resources when none is declared.
pub const DEFAULT_BASE_MIN: f64 = 5.0;

/// Unique resource key, e.g. "iron", "steel", "consumer_goods".
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

fn default_base_min() -> f64 {
    DEFAULT_BASE_MIN
}

/// Raw resource declaration as written in a scenario file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    /// Unique key.
    pub name: ResourceId,
    /// Human-readable label.
    pub label: String,
    /// Display glyph; opaque to the engine.
    #[serde(default)]
    pub icon: String,
    /// Direct production dependencies, in declaration order.
    #[serde(default)]
    pub components: Vec<ResourceId>,
    /// Floor used only when `components` is empty.
    #[serde(default = "default_base_min")]
    pub base_min: f64,
}

impl ResourceDecl {
    /// A dependency-free resource with the default floor.
    pub fn base(name: &str, label: &str, icon: &str) -> Self {
        Self {
            name: ResourceId::from(name),
            label: label.to_string(),
            icon: icon.to_string(),
            components: vec![],
            base_min: DEFAULT_BASE_MIN,
        }
    }

    /// A resource produced from the named components.
    pub fn derived(name: &str, label: &str, icon: &str, components: &[&str]) -> Self {
        Self {
            components: components.iter().map(|c| ResourceId::from(*c)).collect(),
            ..Self::base(name, label, icon)
        }
    }

    pub fn with_base_min(mut self, base_min: f64) -> Self {
        self.base_min = base_min;
        self
    }
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// Resource names must be non-blank.
    #[error("resource name must not be empty")]
    EmptyName,
    /// Two declarations share a name.
    #[error("duplicate resource: {0}")]
    DuplicateResource(String),
    /// A component refers to an undeclared resource.
    #[error("resource {resource} depends on unknown component {component}")]
    DanglingComponent { resource: String, component: String },
    /// A resource transitively depends on itself.
    #[error("dependency cycle through resource {0}")]
    Cycle(String),
    /// Base minimum must be finite and >= 0.
    #[error("base minimum of {0} must be finite and non-negative")]
    InvalidBaseMin(String),
    /// A settings field is out of range.
    #[error("invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },
    /// Scenario file could not be read.
    #[error("scenario io error: {0}")]
    Io(String),
    /// Scenario file is not valid YAML for a scenario.
    #[error("scenario parse error: {0}")]
    Parse(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// Validate a single declaration in isolation.
pub fn validate_decl(decl: &ResourceDecl) -> Result<(), ConfigError> {
    if decl.name.0.trim().is_empty() {
        return Err(ConfigError::EmptyName);
    }
    if !decl.base_min.is_finite() || decl.base_min < 0.0 {
        return Err(ConfigError::InvalidBaseMin(decl.name.0.clone()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decl_defaults_from_yaml() {
        let d: ResourceDecl = serde_yaml::from_str("name: iron\nlabel: Iron\n").unwrap();
        assert_eq!(d.name, ResourceId::from("iron"));
        assert_eq!(d.base_min, DEFAULT_BASE_MIN);
        assert!(d.components.is_empty());
        assert!(d.icon.is_empty());
    }

    #[test]
    fn decl_json_roundtrip_keeps_components() {
        let d = ResourceDecl::derived("steel", "Steel", "S", &["iron", "coal"]);
        let s = serde_json::to_string(&d).unwrap();
        assert!(s.contains("\"components\":[\"iron\",\"coal\"]"));
        let back: ResourceDecl = serde_json::from_str(&s).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn validate_rejects_blank_and_bad_floor() {
        assert_eq!(
            validate_decl(&ResourceDecl::base("  ", "Blank", "")),
            Err(ConfigError::EmptyName)
        );
        assert_eq!(
            validate_decl(&ResourceDecl::base("iron", "Iron", "").with_base_min(f64::NAN)),
            Err(ConfigError::InvalidBaseMin("iron".into()))
        );
        assert_eq!(
            validate_decl(&ResourceDecl::base("iron", "Iron", "").with_base_min(-1.0)),
            Err(ConfigError::InvalidBaseMin("iron".into()))
        );
        assert!(validate_decl(&ResourceDecl::base("iron", "Iron", "").with_base_min(0.0)).is_ok());
    }
}
