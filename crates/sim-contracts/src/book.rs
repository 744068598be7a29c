//! Active contract set, escalator and lifecycle.

use crate::generator::{generate_contract, GenerationParams};
use crate::labels::LabelPool;
use crate::{Contract, ContractId, ContractSettings, RewardRange};
use rand::Rng;
use serde::Serialize;
use sim_econ::{ChangeOrigin, ResourceState};
use tracing::{debug, info};

/// Target-value growth per completed contract.
pub const ESCALATION_FACTOR: f64 = 1.1;
/// Percent of a resource's value consumed (or inflated) per contract unit.
const PCT_PER_UNIT: f64 = 5.0;
/// Completion never pushes a resource below this value.
const COMPLETION_FLOOR: f64 = 2.0;

/// Contracts added and removed by one maintenance pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaintenanceReport {
    pub generated: Vec<ContractId>,
    pub trimmed: Vec<ContractId>,
}

impl MaintenanceReport {
    pub fn is_empty(&self) -> bool {
        self.generated.is_empty() && self.trimmed.is_empty()
    }
}

/// Lifetime counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ContractStats {
    pub completed: u64,
    pub decayed: u64,
    pub total_rewards: u64,
}

/// Owner of the active contracts and the target-value escalator.
///
/// Resource values are read from, and written back to, a caller-supplied
/// [`ResourceState`]; the book never holds them.
#[derive(Clone, Debug)]
pub struct ContractBook {
    active: Vec<Contract>,
    settings: ContractSettings,
    target_value: f64,
    next_id: u64,
    labels: LabelPool,
    stats: ContractStats,
}

impl ContractBook {
    pub fn new(settings: ContractSettings) -> Self {
        Self::with_labels(settings, LabelPool::standard())
    }

    pub fn with_labels(settings: ContractSettings, labels: LabelPool) -> Self {
        Self {
            active: Vec::new(),
            target_value: settings.start_target_value,
            settings,
            next_id: 1,
            labels,
            stats: ContractStats::default(),
        }
    }

    /// Active contracts, oldest first.
    pub fn contracts(&self) -> &[Contract] {
        &self.active
    }

    pub fn get(&self, id: ContractId) -> Option<&Contract> {
        self.active.iter().find(|c| c.id == id)
    }

    /// The most recently added active contract.
    pub fn newest(&self) -> Option<&Contract> {
        self.active.last()
    }

    pub fn target_value(&self) -> f64 {
        self.target_value
    }

    pub fn settings(&self) -> &ContractSettings {
        &self.settings
    }

    pub fn stats(&self) -> ContractStats {
        self.stats
    }

    fn params(&self) -> GenerationParams {
        GenerationParams {
            difficulty: self.settings.difficulty,
            reward: self.settings.reward,
            max_resources: self.settings.max_resources,
        }
    }

    /// Generate one contract at the current target value and append it.
    pub fn generate<R: Rng + ?Sized>(&mut self, state: &ResourceState, rng: &mut R) -> ContractId {
        let id = ContractId(self.next_id);
        self.next_id += 1;
        let params = self.params();
        let contract =
            generate_contract(state, self.target_value, id, &params, &mut self.labels, rng);
        self.active.push(contract);
        id
    }

    /// Fill a shortfall or trim a surplus so the active count matches the
    /// target. Does nothing while paused.
    pub fn maintain<R: Rng + ?Sized>(
        &mut self,
        state: &ResourceState,
        rng: &mut R,
        paused: bool,
    ) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        if paused {
            return report;
        }
        while self.active.len() < self.settings.count {
            report.generated.push(self.generate(state, rng));
        }
        while self.active.len() > self.settings.count {
            if let Some(c) = self.active.pop() {
                self.labels.release(&c.label);
                report.trimmed.push(c.id);
            }
        }
        if !report.is_empty() {
            debug!(
                generated = report.generated.len(),
                trimmed = report.trimmed.len(),
                active = self.active.len(),
                "contracts maintained"
            );
        }
        report
    }

    fn take(&mut self, id: ContractId) -> Option<Contract> {
        let Some(pos) = self.active.iter().position(|c| c.id == id) else {
            debug!(%id, "contract not active");
            return None;
        };
        let contract = self.active.remove(pos);
        self.labels.release(&contract.label);
        Some(contract)
    }

    /// Fulfil a contract: escalate the target value, pay the reward and
    /// consume `5% * quantity` of each bundled resource, floored at 2. The
    /// write bypasses the floor clamp.
    pub fn complete(&mut self, id: ContractId, state: &mut ResourceState) -> Option<Contract> {
        let contract = self.take(id)?;
        self.target_value *= ESCALATION_FACTOR;
        for (name, &qty) in &contract.resources {
            let Some(current) = state.value(name.as_str()) else {
                continue;
            };
            let next = (current * (100.0 - PCT_PER_UNIT * qty as f64) / 100.0)
                .floor()
                .max(COMPLETION_FLOOR);
            state.assign_value(name.as_str(), next, ChangeOrigin::ContractCompleted);
        }
        self.stats.completed += 1;
        self.stats.total_rewards = self.stats.total_rewards.saturating_add(contract.reward);
        info!(
            id = %contract.id,
            label = %contract.label,
            reward = contract.reward,
            target_value = self.target_value,
            "contract completed"
        );
        Some(contract)
    }

    /// Let a contract lapse: no reward, and each bundled resource is
    /// inflated by `5% * quantity`, rounded up.
    pub fn decay(&mut self, id: ContractId, state: &mut ResourceState) -> Option<Contract> {
        let contract = self.take(id)?;
        for (name, &qty) in &contract.resources {
            let Some(current) = state.value(name.as_str()) else {
                continue;
            };
            let next = (current * (100.0 + PCT_PER_UNIT * qty as f64) / 100.0).ceil();
            state.assign_value(name.as_str(), next, ChangeOrigin::ContractDecayed);
        }
        self.stats.decayed += 1;
        info!(id = %contract.id, label = %contract.label, "contract decayed");
        Some(contract)
    }

    /// Drop every contract, reset the escalator and reseed unless paused.
    pub fn reset<R: Rng + ?Sized>(
        &mut self,
        state: &ResourceState,
        rng: &mut R,
        paused: bool,
    ) -> MaintenanceReport {
        self.active.clear();
        self.labels.clear();
        self.target_value = self.settings.start_target_value;
        debug!(target_value = self.target_value, "contracts reset");
        self.maintain(state, rng, paused)
    }

    pub fn set_target_count(&mut self, count: usize) {
        self.settings.count = count;
    }

    /// Change difficulty. An empty book is reseeded straight away through
    /// the regular maintenance pass, so the shortfall is only filled once.
    pub fn set_difficulty<R: Rng + ?Sized>(
        &mut self,
        difficulty: f64,
        state: &ResourceState,
        rng: &mut R,
        paused: bool,
    ) -> MaintenanceReport {
        if !difficulty.is_finite() || difficulty <= 0.0 {
            debug!(difficulty, "difficulty ignored");
            return MaintenanceReport::default();
        }
        self.settings.difficulty = difficulty;
        if self.active.is_empty() && self.settings.count > 0 {
            return self.maintain(state, rng, paused);
        }
        MaintenanceReport::default()
    }

    /// Set reward multiplier bounds in either order.
    pub fn set_reward_range(&mut self, a: f64, b: f64) {
        if a.is_finite() && b.is_finite() {
            self.settings.reward = RewardRange::new(a, b);
        }
    }

    pub fn set_max_resources(&mut self, max_resources: usize) {
        self.settings.max_resources = max_resources.max(1);
    }

    /// Change the escalator's reset value. The current target is left
    /// alone until the next [`ContractBook::reset`].
    pub fn set_start_target_value(&mut self, value: f64) -> bool {
        if !value.is_finite() || value <= 0.0 {
            debug!(value, "start target value ignored");
            return false;
        }
        self.settings.start_target_value = value;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use sim_core::{default_catalog, ResourceGraph, ResourceId};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn state() -> ResourceState {
        ResourceState::new(Arc::new(ResourceGraph::new(default_catalog()).unwrap()))
    }

    fn book(count: usize) -> ContractBook {
        ContractBook::new(ContractSettings {
            count,
            ..ContractSettings::default()
        })
    }

    fn manual(book: &mut ContractBook, resources: &[(&str, u32)]) -> ContractId {
        let id = ContractId(book.next_id);
        book.next_id += 1;
        let resources: BTreeMap<ResourceId, u32> = resources
            .iter()
            .map(|(n, q)| (ResourceId::from(*n), *q))
            .collect();
        book.active.push(Contract {
            id,
            label: format!("manual {}", id.0),
            value: 0.0,
            reward: 10,
            resources,
            difficulty: 1.0,
            reward_range: RewardRange::new(1.0, 1.0),
            max_resources: 3,
        });
        id
    }

    #[test]
    fn maintain_fills_and_trims() {
        let s = state();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut b = book(3);
        let r = b.maintain(&s, &mut rng, false);
        assert_eq!(r.generated.len(), 3);
        assert_eq!(b.contracts().len(), 3);
        b.set_target_count(1);
        let r = b.maintain(&s, &mut rng, false);
        assert_eq!(r.trimmed.len(), 2);
        assert_eq!(b.contracts().len(), 1);
        let ids: Vec<_> = b.contracts().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![ContractId(1)]);
    }

    #[test]
    fn maintain_is_suspended_while_paused() {
        let s = state();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut b = book(3);
        assert!(b.maintain(&s, &mut rng, true).is_empty());
        assert!(b.contracts().is_empty());
    }

    #[test]
    fn ids_increase_and_labels_are_unique() {
        let s = state();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut b = book(20);
        b.maintain(&s, &mut rng, false);
        let ids: Vec<u64> = b.contracts().iter().map(|c| c.id.0).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        let mut labels: Vec<&str> = b.contracts().iter().map(|c| c.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 20);
        assert!(b.contracts().iter().any(|c| c.label.starts_with("Contract ")));
    }

    #[test]
    fn completion_consumes_and_escalates() {
        let mut s = state();
        s.set_resource_value("iron", 100.0);
        let mut b = book(0);
        let id = manual(&mut b, &[("iron", 3)]);
        let start = b.target_value();
        let done = b.complete(id, &mut s).unwrap();
        assert_eq!(done.id, id);
        assert_eq!(s.value("iron"), Some(85.0));
        assert!((b.target_value() - start * 1.1).abs() < 1e-9);
        assert_eq!(b.stats().completed, 1);
        assert_eq!(b.stats().total_rewards, 10);
        assert!(b.contracts().is_empty());
        assert_eq!(
            s.action_log().last().unwrap().origin,
            ChangeOrigin::ContractCompleted
        );
    }

    #[test]
    fn completion_floors_at_two_and_ignores_dependency_floor() {
        let mut s = state();
        let mut b = book(0);
        let id = manual(&mut b, &[("steel", 30)]);
        b.complete(id, &mut s);
        assert_eq!(s.value("steel"), Some(2.0));
        assert!(s.value("steel").unwrap() < s.min_of("steel").unwrap());
    }

    #[test]
    fn decay_inflates_without_reward() {
        let mut s = state();
        s.set_resource_value("iron", 100.0);
        let mut b = book(0);
        let id = manual(&mut b, &[("iron", 3)]);
        let start = b.target_value();
        b.decay(id, &mut s).unwrap();
        assert_eq!(s.value("iron"), Some(115.0));
        assert_eq!(b.target_value(), start);
        assert_eq!(b.stats().decayed, 1);
        assert_eq!(b.stats().total_rewards, 0);
    }

    #[test]
    fn removed_ids_are_noops() {
        let mut s = state();
        let mut b = book(0);
        let id = manual(&mut b, &[("iron", 1)]);
        assert!(b.complete(id, &mut s).is_some());
        let values = s.values().to_vec();
        assert!(b.complete(id, &mut s).is_none());
        assert!(b.decay(id, &mut s).is_none());
        assert!(b.decay(ContractId(999), &mut s).is_none());
        assert_eq!(s.values(), &values[..]);
        assert_eq!(b.stats().completed, 1);
    }

    #[test]
    fn reset_restores_start_value_and_reseeds() {
        let mut s = state();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut b = book(2);
        b.maintain(&s, &mut rng, false);
        let first = b.contracts()[0].id;
        b.complete(first, &mut s);
        assert!(b.target_value() > b.settings().start_target_value);
        let r = b.reset(&s, &mut rng, false);
        assert_eq!(r.generated.len(), 2);
        assert_eq!(b.target_value(), b.settings().start_target_value);
        let r = b.reset(&s, &mut rng, true);
        assert!(r.is_empty());
        assert!(b.contracts().is_empty());
    }

    #[test]
    fn difficulty_change_reseeds_empty_book_once() {
        let s = state();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut b = book(2);
        let r = b.set_difficulty(2.0, &s, &mut rng, true);
        assert!(r.is_empty());
        let r = b.set_difficulty(2.0, &s, &mut rng, false);
        assert_eq!(r.generated.len(), 2);
        assert!(b.contracts().iter().all(|c| c.difficulty == 2.0));
        // Already populated: nothing more is generated.
        assert!(b.set_difficulty(3.0, &s, &mut rng, false).is_empty());
        assert_eq!(b.contracts().len(), 2);
        assert!(b.set_difficulty(f64::NAN, &s, &mut rng, false).is_empty());
        assert_eq!(b.settings().difficulty, 3.0);
    }

    #[test]
    fn settings_setters_sanitize() {
        let mut b = book(1);
        b.set_reward_range(2.0, 1.0);
        assert_eq!(b.settings().reward, RewardRange::new(1.0, 2.0));
        b.set_reward_range(f64::NAN, 1.0);
        assert_eq!(b.settings().reward, RewardRange::new(1.0, 2.0));
        b.set_max_resources(0);
        assert_eq!(b.settings().max_resources, 1);
    }

    #[test]
    fn start_target_value_applies_on_reset() {
        let mut s = state();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut b = book(1);
        b.maintain(&s, &mut rng, false);
        assert!(b.set_start_target_value(80.0));
        assert_eq!(b.target_value(), 40.0);
        assert!(!b.set_start_target_value(0.0));
        assert!(!b.set_start_target_value(f64::NAN));
        assert_eq!(b.settings().start_target_value, 80.0);
        let first = b.contracts()[0].id;
        b.complete(first, &mut s);
        b.reset(&s, &mut rng, false);
        assert_eq!(b.target_value(), 80.0);
    }
}
