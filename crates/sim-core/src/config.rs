//! Simulation settings and scenario files.

use crate::{ConfigError, ResourceDecl, ResourceGraph};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Tunable simulation settings. Every field has a default so partial
/// scenario files and older snapshots still load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Milliseconds between noise ticks.
    pub noise_interval_ms: u64,
    /// Milliseconds the newest contract takes to decay.
    pub decay_time_ms: u64,
    /// Number of active contracts maintenance aims for.
    pub contract_count: usize,
    /// Multiplier applied to the target value when sizing contracts.
    pub difficulty: f64,
    /// Reward multiplier bound; may be given in either order with `reward_max`.
    pub reward_min: f64,
    pub reward_max: f64,
    /// Cap on distinct resource types in one contract.
    pub max_resources: usize,
    /// Seed value of the target-value escalator.
    pub start_target_value: f64,
    /// Seed for the deterministic RNG.
    pub rng_seed: u64,
    pub noise_enabled: bool,
    pub ignore_minimum: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            noise_interval_ms: 5_000,
            decay_time_ms: 10_000,
            contract_count: 3,
            difficulty: 1.0,
            reward_min: 1.2,
            reward_max: 1.6,
            max_resources: 3,
            start_target_value: 40.0,
            rng_seed: 42,
            noise_enabled: true,
            ignore_minimum: false,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSetting {
        field,
        reason: reason.into(),
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.noise_interval_ms == 0 {
            return Err(invalid("noise_interval_ms", "must be > 0"));
        }
        if self.decay_time_ms == 0 {
            return Err(invalid("decay_time_ms", "must be > 0"));
        }
        if !self.difficulty.is_finite() || self.difficulty <= 0.0 {
            return Err(invalid("difficulty", "must be finite and > 0"));
        }
        if !self.reward_min.is_finite() || !self.reward_max.is_finite() {
            return Err(invalid("reward_min/reward_max", "must be finite"));
        }
        if self.max_resources == 0 {
            return Err(invalid("max_resources", "must be >= 1"));
        }
        if !self.start_target_value.is_finite() || self.start_target_value <= 0.0 {
            return Err(invalid("start_target_value", "must be finite and > 0"));
        }
        Ok(())
    }
}

/// Resource declarations plus settings, as stored in a YAML scenario.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Scenario {
    /// Empty selects [`default_catalog`].
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    #[serde(default)]
    pub settings: SimConfig,
}

impl Scenario {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let scenario: Scenario = serde_yaml::from_str(text)?;
        scenario.settings.validate()?;
        Ok(scenario)
    }

    /// Declarations to build the graph from, falling back to the catalog.
    pub fn declarations(&self) -> Vec<ResourceDecl> {
        if self.resources.is_empty() {
            default_catalog()
        } else {
            self.resources.clone()
        }
    }

    pub fn build_graph(&self) -> Result<ResourceGraph, ConfigError> {
        ResourceGraph::new(self.declarations())
    }
}

/// Read and validate a scenario file.
pub fn load_scenario<P: AsRef<Path>>(path: P) -> Result<Scenario, ConfigError> {
    let text = fs::read_to_string(path.as_ref())?;
    let scenario = Scenario::from_yaml_str(&text)?;
    info!(
        path = %path.as_ref().display(),
        resources = scenario.resources.len(),
        "scenario loaded"
    );
    Ok(scenario)
}

/// Built-in resource catalog used when a scenario declares none.
pub fn default_catalog() -> Vec<ResourceDecl> {
    vec![
        ResourceDecl::base("iron", "Iron Ore", "⛏"),
        ResourceDecl::base("coal", "Coal", "🪨"),
        ResourceDecl::base("oil", "Crude Oil", "🛢"),
        ResourceDecl::base("copper", "Copper", "🟠"),
        ResourceDecl::base("silicon", "Silicon", "💎"),
        ResourceDecl::derived("steel", "Steel", "🔩", &["iron", "coal"]),
        ResourceDecl::derived("plastics", "Plastics", "🧴", &["oil"]),
        ResourceDecl::derived(
            "electronics",
            "Electronics",
            "🔌",
            &["copper", "silicon", "plastics"],
        ),
        ResourceDecl::derived(
            "consumer_goods",
            "Consumer Goods",
            "📦",
            &["steel", "plastics"],
        ),
        ResourceDecl::derived("machinery", "Machinery", "⚙", &["steel", "electronics"]),
    ]
}
