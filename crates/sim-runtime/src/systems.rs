//! ECS resources and the per-frame systems.

use bevy_ecs::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use sim_contracts::{ContractBook, ContractId, MaintenanceReport};
use sim_core::SimConfig;
use sim_econ::{noise_tick, ResourceState};

/// Resource values, history and undo log.
#[derive(Resource)]
pub struct Economy(pub ResourceState);

#[derive(Resource)]
pub struct Contracts(pub ContractBook);

#[derive(Resource)]
pub struct SimRng(pub ChaCha8Rng);

/// Timer state shared by the systems.
#[derive(Resource, Clone, Debug, PartialEq)]
pub struct SimClock {
    pub paused: bool,
    pub noise_on: bool,
    pub noise_interval_ms: u64,
    pub decay_time_ms: u64,
    /// Progress toward the next noise tick.
    pub noise_elapsed_ms: u64,
    /// Length of the frame being run.
    pub frame_ms: u64,
    /// Unpaused simulated time.
    pub elapsed_ms: u64,
}

impl SimClock {
    pub fn from_config(cfg: &SimConfig) -> Self {
        Self {
            paused: false,
            noise_on: cfg.noise_enabled,
            noise_interval_ms: cfg.noise_interval_ms,
            decay_time_ms: cfg.decay_time_ms,
            noise_elapsed_ms: 0,
            frame_ms: 0,
            elapsed_ms: 0,
        }
    }
}

/// Decay progress of the newest contract. Re-targets, and restarts, when
/// a different contract becomes the newest.
#[derive(Resource, Clone, Debug, Default, PartialEq)]
pub struct DecayTimer {
    pub contract: Option<ContractId>,
    pub elapsed_ms: u64,
}

/// Something observable that happened during a frame or a mutator call.
///
/// Buffered in `Events<SimEvent>`, which keeps the current and previous
/// frame only.
#[derive(Event, Clone, Debug, PartialEq, Serialize)]
pub enum SimEvent {
    NoiseTick { changed: usize },
    ContractGenerated { id: ContractId },
    ContractTrimmed { id: ContractId },
    ContractCompleted { id: ContractId, reward: u64 },
    ContractDecayed { id: ContractId },
    ResourcesReset,
    ContractsReset,
}

pub(crate) fn noise_system(
    mut clock: ResMut<SimClock>,
    mut economy: ResMut<Economy>,
    mut rng: ResMut<SimRng>,
    mut events: EventWriter<SimEvent>,
) {
    let clock = &mut *clock;
    if clock.paused || !clock.noise_on || clock.noise_interval_ms == 0 {
        return;
    }
    clock.noise_elapsed_ms += clock.frame_ms;
    while clock.noise_elapsed_ms >= clock.noise_interval_ms {
        clock.noise_elapsed_ms -= clock.noise_interval_ms;
        let changed = noise_tick(&mut economy.0, &mut rng.0);
        events.send(SimEvent::NoiseTick {
            changed: changed.len(),
        });
    }
}

pub(crate) fn decay_system(
    clock: Res<SimClock>,
    mut timer: ResMut<DecayTimer>,
    mut economy: ResMut<Economy>,
    mut contracts: ResMut<Contracts>,
    mut events: EventWriter<SimEvent>,
) {
    if clock.paused {
        return;
    }
    let timer = &mut *timer;
    let Some(newest) = contracts.0.newest().map(|c| c.id) else {
        *timer = DecayTimer::default();
        return;
    };
    if timer.contract != Some(newest) {
        timer.contract = Some(newest);
        timer.elapsed_ms = 0;
    }
    timer.elapsed_ms += clock.frame_ms;
    if timer.elapsed_ms >= clock.decay_time_ms {
        if contracts.0.decay(newest, &mut economy.0).is_some() {
            events.send(SimEvent::ContractDecayed { id: newest });
        }
        *timer = DecayTimer::default();
    }
}

pub(crate) fn maintenance_system(
    clock: Res<SimClock>,
    economy: Res<Economy>,
    mut contracts: ResMut<Contracts>,
    mut rng: ResMut<SimRng>,
    mut events: EventWriter<SimEvent>,
) {
    let report = contracts.0.maintain(&economy.0, &mut rng.0, clock.paused);
    for event in maintenance_events(report) {
        events.send(event);
    }
}

/// Generation events first, then trims.
pub(crate) fn maintenance_events(report: MaintenanceReport) -> impl Iterator<Item = SimEvent> {
    let generated = report
        .generated
        .into_iter()
        .map(|id| SimEvent::ContractGenerated { id });
    let trimmed = report
        .trimmed
        .into_iter()
        .map(|id| SimEvent::ContractTrimmed { id });
    generated.chain(trimmed)
}
