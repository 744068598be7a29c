//! Procedural contract construction.

use crate::labels::LabelPool;
use crate::{Contract, ContractId, RewardRange};
use rand::seq::SliceRandom;
use rand::Rng;
use sim_econ::ResourceState;
use std::collections::BTreeMap;
use tracing::debug;

/// Upper bound on units in one bundle.
pub const MAX_UNITS: u32 = 10_000;

/// Knobs that shape a single generated contract.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
    pub difficulty: f64,
    pub reward: RewardRange,
    /// Cap on distinct resource types.
    pub max_resources: usize,
}

/// Resources a contract may draw from. Half the time the pool is narrowed
/// to a specialist pick of one or two types (never more than `cap`);
/// otherwise every priced resource is eligible. Returns whether the pick is
/// a specialist one.
pub(crate) fn candidate_pool<R: Rng + ?Sized>(
    priced: Vec<usize>,
    cap: usize,
    rng: &mut R,
) -> (bool, Vec<usize>) {
    if !rng.gen_bool(0.5) {
        return (false, priced);
    }
    let want: usize = if rng.gen_bool(0.5) { 1 } else { 2 };
    let pick = priced
        .choose_multiple(rng, want.min(cap.max(1)))
        .copied()
        .collect();
    (true, pick)
}

/// Build one contract worth roughly `target_value * difficulty`.
///
/// Half of the contracts are specialists drawing from one or two resource
/// types; the rest may draw any resource until `max_resources` distinct
/// types are in the bundle. Units are added one at a time, at the
/// resource's current value, while they fit under the scaled target. If
/// nothing fits, the bundle gets one unit of the cheapest candidate.
pub fn generate_contract<R: Rng + ?Sized>(
    state: &ResourceState,
    target_value: f64,
    id: ContractId,
    params: &GenerationParams,
    labels: &mut LabelPool,
    rng: &mut R,
) -> Contract {
    let scaled = target_value * params.difficulty;
    let cap = params.max_resources.max(1);
    let priced: Vec<usize> = (0..state.graph().len())
        .filter(|&i| state.value_at(i) > 0.0)
        .collect();

    let (specialist, candidates) = candidate_pool(priced, cap, rng);

    let mut bundle: BTreeMap<usize, u32> = BTreeMap::new();
    let mut total = 0.0;
    let mut units = 0;
    while units < MAX_UNITS {
        let eligible: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| {
                let fits = total + state.value_at(i) <= scaled;
                fits && (bundle.len() < cap || bundle.contains_key(&i))
            })
            .collect();
        let Some(&pick) = eligible.choose(rng) else {
            break;
        };
        *bundle.entry(pick).or_insert(0) += 1;
        total += state.value_at(pick);
        units += 1;
    }
    if bundle.is_empty() {
        let cheapest = candidates
            .iter()
            .copied()
            .min_by(|&a, &b| state.value_at(a).total_cmp(&state.value_at(b)));
        if let Some(i) = cheapest {
            bundle.insert(i, 1);
        }
    }

    let value: f64 = bundle
        .iter()
        .map(|(&i, &q)| q as f64 * state.value_at(i))
        .sum();
    let range = RewardRange::new(params.reward.min, params.reward.max);
    let multiplier = if range.min < range.max {
        rng.gen_range(range.min..=range.max)
    } else {
        range.min
    };
    let reward = (value * multiplier).floor().max(0.0) as u64;
    let label = labels.allocate(id.0, rng);
    let resources = bundle
        .into_iter()
        .map(|(i, q)| (state.graph().resource(i).name.clone(), q))
        .collect();

    debug!(%id, %label, specialist, value, reward, scaled, "contract generated");
    Contract {
        id,
        label,
        value,
        reward,
        resources,
        difficulty: params.difficulty,
        reward_range: range,
        max_resources: cap,
    }
}
