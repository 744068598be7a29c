//! Resource values, floors, cascades and undo.

use serde::{Deserialize, Serialize};
use sim_core::{ResourceGraph, ResourceId};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use tracing::debug;

/// Absolute floor substituted for dependency floors in ignore-minimum mode.
pub const IGNORED_FLOOR: f64 = 1.0;

/// What produced a change-group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOrigin {
    /// Interactive edit through [`ResourceState::set_resource_value`].
    Edit,
    /// Noise tick.
    Noise,
    /// Floor raised when leaving ignore-minimum mode.
    FloorReassert,
    /// Resource consumed by a completed contract.
    ContractCompleted,
    /// Resource inflated by a decayed contract.
    ContractDecayed,
}

/// One value transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub resource: ResourceId,
    pub previous: f64,
    pub next: f64,
    /// False for the primary edit, true for floor-driven follow-ups.
    pub cascading: bool,
}

/// One logical edit plus every cascade it triggered; undone as a unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeGroup {
    pub origin: ChangeOrigin,
    pub records: Vec<ChangeRecord>,
}

/// Proposed value for [`ResourceState::set_resource_value`].
#[derive(Clone, Debug, PartialEq)]
pub enum ValueInput {
    Absolute(f64),
    /// Offset from the current value.
    Delta(f64),
    /// Numeric text, e.g. from an input field.
    Text(String),
}

impl ValueInput {
    fn resolve(&self, previous: f64) -> Option<f64> {
        let v = match self {
            ValueInput::Absolute(v) => *v,
            ValueInput::Delta(d) => previous + d,
            ValueInput::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        v.is_finite().then_some(v)
    }
}

impl From<f64> for ValueInput {
    fn from(v: f64) -> Self {
        ValueInput::Absolute(v)
    }
}

impl From<&str> for ValueInput {
    fn from(s: &str) -> Self {
        ValueInput::Text(s.to_string())
    }
}

impl From<String> for ValueInput {
    fn from(s: String) -> Self {
        ValueInput::Text(s)
    }
}

/// Serializable values and histories keyed by resource name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default)]
    pub values: BTreeMap<ResourceId, f64>,
    #[serde(default)]
    pub history: BTreeMap<ResourceId, Vec<f64>>,
}

/// Read-only projection of one resource for display.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResourceView {
    pub name: ResourceId,
    pub label: String,
    pub icon: String,
    pub tier: u32,
    pub value: f64,
    /// Effective floor: the dependency floor, or [`IGNORED_FLOOR`].
    pub min: f64,
    pub history: Vec<f64>,
    pub history_low: f64,
    pub history_high: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TierView {
    pub tier: u32,
    pub resources: Vec<ResourceView>,
}

/// Floor of `idx` against a value snapshot: the base minimum for raw
/// resources, else the sum of the current component values.
pub fn compute_min(graph: &ResourceGraph, idx: usize, values: &[f64]) -> f64 {
    let comps = graph.components_of(idx);
    if comps.is_empty() {
        graph.resource(idx).base_min
    } else {
        comps
            .iter()
            .map(|&c| values.get(c).copied().unwrap_or(0.0))
            .sum()
    }
}

/// Every resource at its floor, settled bottom-up.
pub fn initial_values(graph: &ResourceGraph) -> Vec<f64> {
    let mut values = vec![0.0; graph.len()];
    for &i in graph.topological_order() {
        values[i] = compute_min(graph, i, &values);
    }
    values
}

/// Owner of the mutable simulation values.
///
/// Unless ignore-minimum mode is on, every mutator that goes through the
/// floor path leaves `value >= compute_min` for the whole graph. Malformed
/// input (unknown names, non-finite numbers) is a logged no-op.
#[derive(Clone, Debug)]
pub struct ResourceState {
    graph: Arc<ResourceGraph>,
    values: Vec<f64>,
    history: Vec<Vec<f64>>,
    log: Vec<ChangeGroup>,
    ignore_minimum: bool,
}

impl ResourceState {
    pub fn new(graph: Arc<ResourceGraph>) -> Self {
        let values = initial_values(&graph);
        let history = values.iter().map(|&v| vec![v]).collect();
        Self {
            graph,
            values,
            history,
            log: Vec::new(),
            ignore_minimum: false,
        }
    }

    pub fn graph(&self) -> &Arc<ResourceGraph> {
        &self.graph
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.graph.index_of(name).map(|i| self.values[i])
    }

    pub fn value_at(&self, idx: usize) -> f64 {
        self.values[idx]
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn history(&self, name: &str) -> Option<&[f64]> {
        self.graph.index_of(name).map(|i| self.history[i].as_slice())
    }

    /// Dependency floor of `name` against the current values.
    pub fn min_of(&self, name: &str) -> Option<f64> {
        self.graph.index_of(name).map(|i| self.min_at(i))
    }

    pub fn min_at(&self, idx: usize) -> f64 {
        compute_min(&self.graph, idx, &self.values)
    }

    /// Lowest value the noise and views treat as permitted.
    pub fn effective_floor(&self, idx: usize) -> f64 {
        if self.ignore_minimum {
            IGNORED_FLOOR
        } else {
            self.min_at(idx)
        }
    }

    pub fn action_log(&self) -> &[ChangeGroup] {
        &self.log
    }

    pub fn can_undo(&self) -> bool {
        !self.log.is_empty()
    }

    pub fn ignore_minimum(&self) -> bool {
        self.ignore_minimum
    }

    /// Set a resource from an absolute value, a delta or numeric text.
    ///
    /// The value is clamped up to the floor, and an increase cascades to
    /// dependents. Returns whether a change-group was recorded.
    pub fn set_resource_value(&mut self, name: &str, input: impl Into<ValueInput>) -> bool {
        let input = input.into();
        let Some(idx) = self.graph.index_of(name) else {
            debug!(resource = name, "set ignored: unknown resource");
            return false;
        };
        let Some(next) = input.resolve(self.values[idx]) else {
            debug!(resource = name, ?input, "set ignored: not a finite number");
            return false;
        };
        self.set_at(idx, next, ChangeOrigin::Edit)
    }

    /// Set a resource to a value derived from its current one.
    pub fn update_resource_value<F>(&mut self, name: &str, f: F) -> bool
    where
        F: FnOnce(f64) -> f64,
    {
        let Some(idx) = self.graph.index_of(name) else {
            debug!(resource = name, "update ignored: unknown resource");
            return false;
        };
        let next = f(self.values[idx]);
        if !next.is_finite() {
            debug!(resource = name, "update ignored: not a finite number");
            return false;
        }
        self.set_at(idx, next, ChangeOrigin::Edit)
    }

    pub(crate) fn set_at(&mut self, idx: usize, proposed: f64, origin: ChangeOrigin) -> bool {
        let previous = self.values[idx];
        let next = if self.ignore_minimum {
            proposed
        } else {
            proposed.max(self.min_at(idx))
        };
        if next == previous {
            return false;
        }
        self.values[idx] = next;
        self.history[idx].push(next);
        let mut records = vec![ChangeRecord {
            resource: self.graph.resource(idx).name.clone(),
            previous,
            next,
            cascading: false,
        }];
        if !self.ignore_minimum && next > previous {
            self.cascade_from(idx, &mut records);
        }
        debug!(
            resource = %records[0].resource,
            previous,
            next,
            cascaded = records.len() - 1,
            ?origin,
            "resource value set"
        );
        self.log.push(ChangeGroup { origin, records });
        true
    }

    /// Raise dependents that fell below their floor after `start` increased.
    ///
    /// Dependents are visited lowest tier first, so every component of a
    /// resource has settled before that resource is checked. Each resource
    /// is examined at most once.
    fn cascade_from(&mut self, start: usize, records: &mut Vec<ChangeRecord>) {
        let mut queued = vec![false; self.graph.len()];
        queued[start] = true;
        let mut heap = BinaryHeap::new();
        self.enqueue_dependents(start, &mut queued, &mut heap);
        while let Some(Reverse((_, i))) = heap.pop() {
            let floor = self.min_at(i);
            let previous = self.values[i];
            if previous >= floor {
                continue;
            }
            self.values[i] = floor;
            self.history[i].push(floor);
            records.push(ChangeRecord {
                resource: self.graph.resource(i).name.clone(),
                previous,
                next: floor,
                cascading: true,
            });
            self.enqueue_dependents(i, &mut queued, &mut heap);
        }
    }

    fn enqueue_dependents(
        &self,
        idx: usize,
        queued: &mut [bool],
        heap: &mut BinaryHeap<Reverse<(u32, usize)>>,
    ) {
        for &d in self.graph.dependents_of(idx) {
            if !queued[d] {
                queued[d] = true;
                heap.push(Reverse((self.graph.resource(d).tier, d)));
            }
        }
    }

    /// Write a value with no floor clamp and no cascade, still logged.
    pub fn assign_value(&mut self, name: &str, value: f64, origin: ChangeOrigin) -> bool {
        let Some(idx) = self.graph.index_of(name) else {
            debug!(resource = name, "assign ignored: unknown resource");
            return false;
        };
        if !value.is_finite() {
            return false;
        }
        let previous = self.values[idx];
        if value == previous {
            return false;
        }
        self.values[idx] = value;
        self.history[idx].push(value);
        self.log.push(ChangeGroup {
            origin,
            records: vec![ChangeRecord {
                resource: self.graph.resource(idx).name.clone(),
                previous,
                next: value,
                cascading: false,
            }],
        });
        true
    }

    /// Revert the most recent change-group, cascades first.
    pub fn undo_last_change(&mut self) -> bool {
        let Some(group) = self.log.pop() else {
            return false;
        };
        for record in group.records.iter().rev() {
            let Some(i) = self.graph.index_of(record.resource.as_str()) else {
                continue;
            };
            self.values[i] = record.previous;
            let hist = &mut self.history[i];
            if hist.last() == Some(&record.next) {
                hist.pop();
            }
        }
        debug!(origin = ?group.origin, records = group.records.len(), "change undone");
        true
    }

    /// Switch ignore-minimum mode. Leaving it raises every violating value
    /// to its floor, each as its own change-group.
    pub fn set_ignore_minimum(&mut self, on: bool) {
        if self.ignore_minimum == on {
            return;
        }
        self.ignore_minimum = on;
        if !on {
            let raised = self.settle_floors(true);
            debug!(raised, "floors re-asserted");
        }
    }

    fn settle_floors(&mut self, log: bool) -> usize {
        let mut raised = 0;
        let order = self.graph.topological_order().to_vec();
        for i in order {
            let floor = self.min_at(i);
            let previous = self.values[i];
            if previous >= floor {
                continue;
            }
            self.values[i] = floor;
            self.history[i].push(floor);
            raised += 1;
            if log {
                self.log.push(ChangeGroup {
                    origin: ChangeOrigin::FloorReassert,
                    records: vec![ChangeRecord {
                        resource: self.graph.resource(i).name.clone(),
                        previous,
                        next: floor,
                        cascading: false,
                    }],
                });
            }
        }
        raised
    }

    /// Every resource back to its floor, single-sample histories, empty log.
    pub fn reset_resources(&mut self) {
        self.values = initial_values(&self.graph);
        self.history = self.values.iter().map(|&v| vec![v]).collect();
        self.log.clear();
        debug!(resources = self.values.len(), "resources reset");
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        let mut snap = ResourceSnapshot::default();
        for (i, r) in self.graph.resources().iter().enumerate() {
            snap.values.insert(r.name.clone(), self.values[i]);
            snap.history.insert(r.name.clone(), self.history[i].clone());
        }
        snap
    }

    /// Load values and histories from a snapshot. Unknown names and
    /// non-finite values are skipped; the undo log is cleared and floors are
    /// settled without logging.
    pub fn restore(&mut self, snap: &ResourceSnapshot) {
        for (name, &v) in &snap.values {
            let Some(i) = self.graph.index_of(name.as_str()) else {
                debug!(resource = %name, "restore skipped unknown resource");
                continue;
            };
            if !v.is_finite() {
                continue;
            }
            self.values[i] = v;
            self.history[i] = snap
                .history
                .get(name)
                .filter(|h| !h.is_empty() && h.iter().all(|x| x.is_finite()))
                .cloned()
                .unwrap_or_else(|| vec![v]);
            if self.history[i].last() != Some(&v) {
                self.history[i].push(v);
            }
        }
        self.log.clear();
        if !self.ignore_minimum {
            self.settle_floors(false);
        }
    }

    pub fn view_at(&self, idx: usize) -> ResourceView {
        let r = self.graph.resource(idx);
        let history = self.history[idx].clone();
        let history_low = history.iter().copied().fold(f64::INFINITY, f64::min);
        let history_high = history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        ResourceView {
            name: r.name.clone(),
            label: r.label.clone(),
            icon: r.icon.clone(),
            tier: r.tier,
            value: self.values[idx],
            min: self.effective_floor(idx),
            history,
            history_low,
            history_high,
        }
    }

    /// Resources grouped by tier, ascending, declaration order within a tier.
    pub fn tiers(&self) -> Vec<TierView> {
        self.graph
            .by_tier()
            .into_iter()
            .map(|(tier, idxs)| TierView {
                tier,
                resources: idxs.into_iter().map(|i| self.view_at(i)).collect(),
            })
            .collect()
    }
}
