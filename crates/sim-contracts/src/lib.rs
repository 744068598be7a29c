#![deny(warnings)]

//! Procurement contracts: procedural generation, completion and decay.
//!
//! Contracts read resource values from a [`sim_econ::ResourceState`] when they
//! are built and write consumption or inflation back when they leave the
//! active set. The [`ContractBook`] keeps the active list at its target size
//! and owns the target-value escalator.

mod book;
mod generator;
mod labels;

pub use book::{ContractBook, ContractStats, MaintenanceReport, ESCALATION_FACTOR};
pub use generator::{generate_contract, GenerationParams, MAX_UNITS};
pub use labels::{LabelPool, CONTRACT_LABELS};

use serde::{Deserialize, Serialize};
use sim_core::{ResourceId, SimConfig};
use std::collections::BTreeMap;
use std::fmt;

/// Contract identifier; increases with creation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContractId(pub u64);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reward multiplier bounds, reconciled so `min <= max`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RewardRange {
    pub min: f64,
    pub max: f64,
}

impl RewardRange {
    /// Accepts the bounds in either order.
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }
}

/// A generated procurement contract. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub id: ContractId,
    pub label: String,
    /// Market value of the bundle at generation time.
    pub value: f64,
    /// `floor(value * m)` with `m` drawn from `reward_range`.
    pub reward: u64,
    /// Required quantity per resource.
    pub resources: BTreeMap<ResourceId, u32>,
    pub difficulty: f64,
    pub reward_range: RewardRange,
    pub max_resources: usize,
}

impl Contract {
    pub fn units(&self) -> u32 {
        self.resources.values().sum()
    }
}

/// Settings the contract subsystem reads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractSettings {
    /// Target number of active contracts.
    pub count: usize,
    pub difficulty: f64,
    pub reward: RewardRange,
    pub max_resources: usize,
    pub start_target_value: f64,
}

impl From<&SimConfig> for ContractSettings {
    fn from(cfg: &SimConfig) -> Self {
        Self {
            count: cfg.contract_count,
            difficulty: cfg.difficulty,
            reward: RewardRange::new(cfg.reward_min, cfg.reward_max),
            max_resources: cfg.max_resources,
            start_target_value: cfg.start_target_value,
        }
    }
}

impl Default for ContractSettings {
    fn default() -> Self {
        Self::from(&SimConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_range_reconciles_order() {
        let r = RewardRange::new(1.8, 1.2);
        assert_eq!(r.min, 1.2);
        assert_eq!(r.max, 1.8);
    }

    #[test]
    fn settings_follow_config() {
        let cfg = SimConfig {
            contract_count: 5,
            reward_min: 2.0,
            reward_max: 1.0,
            ..SimConfig::default()
        };
        let s = ContractSettings::from(&cfg);
        assert_eq!(s.count, 5);
        assert_eq!(s.reward, RewardRange::new(1.0, 2.0));
        assert_eq!(s.start_target_value, cfg.start_target_value);
    }

    #[test]
    fn contract_serializes_resources_by_name() {
        let mut resources = BTreeMap::new();
        resources.insert(ResourceId::from("iron"), 3);
        let c = Contract {
            id: ContractId(7),
            label: "Harbor Expansion".into(),
            value: 15.0,
            reward: 18,
            resources,
            difficulty: 1.0,
            reward_range: RewardRange::new(1.2, 1.6),
            max_resources: 3,
        };
        let s = serde_json::to_string(&c).unwrap();
        assert!(s.contains("\"resources\":{\"iron\":3}"));
        assert_eq!(c.units(), 3);
        assert_eq!(c.id.to_string(), "#7");
    }
}
