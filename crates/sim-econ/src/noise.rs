//! Random ±1 drift applied to every resource on each noise tick.

use crate::state::{ChangeOrigin, ResourceState, IGNORED_FLOOR};
use rand::Rng;
use sim_core::ResourceId;
use tracing::debug;

/// Chance that a resource is left alone on a tick.
pub const NOISE_SKIP_CHANCE: f64 = 0.4;

/// Propose the next value for one resource.
///
/// With floors enforced, the chance of stepping down grows with the
/// relative distance above the floor (`0.1 + 0.8 * (value - min) / min`)
/// and the result never drops below `min`. With floors ignored, the pull is
/// toward the absolute floor (`0.5 + 0.4 * |value - min| / min`) and the
/// result never drops below [`IGNORED_FLOOR`].
pub fn noise_step<R: Rng + ?Sized>(value: f64, min: f64, ignore_minimum: bool, rng: &mut R) -> f64 {
    if rng.gen::<f64>() < NOISE_SKIP_CHANCE {
        return value;
    }
    let (p_down, floor) = if ignore_minimum {
        let spread = if min > 0.0 { (value - min).abs() / min } else { 1.0 };
        (0.5 + 0.4 * spread, IGNORED_FLOOR)
    } else {
        let above = if min > 0.0 { ((value - min) / min).max(0.0) } else { 1.0 };
        (0.1 + 0.8 * above, min)
    };
    let step = if rng.gen::<f64>() < p_down.min(1.0) {
        -1.0
    } else {
        1.0
    };
    (value + step).max(floor)
}

/// Run one noise pass over every resource, in declaration order.
///
/// Changes go through the floor path, so an upward step cascades like an
/// edit. Returns the resources that changed.
pub fn noise_tick<R: Rng + ?Sized>(state: &mut ResourceState, rng: &mut R) -> Vec<ResourceId> {
    let mut changed = Vec::new();
    let ignore = state.ignore_minimum();
    for idx in 0..state.graph().len() {
        let value = state.value_at(idx);
        let min = state.min_at(idx);
        let next = noise_step(value, min, ignore, rng);
        if next == value {
            continue;
        }
        if state.set_at(idx, next, ChangeOrigin::Noise) {
            changed.push(state.graph().resource(idx).name.clone());
        }
    }
    debug!(changed = changed.len(), "noise tick");
    changed
}
