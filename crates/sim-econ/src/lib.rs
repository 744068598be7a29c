#![deny(warnings)]

//! Resource value engine for the economy simulation.
//!
//! This crate provides:
//! - [`ResourceState`]: current values, per-resource history and the undo
//!   log, with dynamic floors that cascade to dependents
//! - [`noise_tick`]: the stochastic ±1 perturbation applied on a timer

mod noise;
mod state;

pub use noise::{noise_step, noise_tick, NOISE_SKIP_CHANCE};
pub use state::{
    compute_min, initial_values, ChangeGroup, ChangeOrigin, ChangeRecord, ResourceSnapshot,
    ResourceState, ResourceView, TierView, ValueInput, IGNORED_FLOOR,
};
