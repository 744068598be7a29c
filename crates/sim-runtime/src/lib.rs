#![deny(warnings)]

//! ECS runtime for the economy simulation.
//!
//! A single-threaded [`bevy_ecs`] schedule drives three cooperative
//! triggers that share one resource store: the noise interval, decay
//! progress of the newest contract, and contract-count maintenance. Every
//! public mutator on [`Simulation`] runs to completion before the next
//! frame.

mod systems;

pub use systems::{DecayTimer, SimClock, SimEvent};

use bevy_ecs::prelude::*;
use bevy_ecs::schedule::ExecutorKind;
use persistence::{load_or_default, save, versioned_key, KvStore, StoreError, SNAPSHOT_VERSION};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use sim_contracts::{Contract, ContractBook, ContractId, ContractSettings};
use sim_core::{ConfigError, ResourceGraph, Scenario, SimConfig};
use sim_econ::{noise_tick, ResourceSnapshot, ResourceState, TierView, ValueInput};
use std::sync::Arc;
use systems::{
    decay_system, maintenance_events, maintenance_system, noise_system, Contracts, Economy, SimRng,
};
use tracing::{debug, info, warn};

/// Store id of the settings snapshot.
pub const SETTINGS_ID: &str = "settings";
/// Store id of the resource snapshot.
pub const RESOURCES_ID: &str = "resources";

/// Headline numbers for a running simulation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimKpi {
    pub elapsed_ms: u64,
    pub active_contracts: usize,
    pub completed: u64,
    pub decayed: u64,
    pub total_rewards: u64,
    pub target_value: f64,
    pub undo_depth: usize,
}

/// Owned simulation: graph, values, contracts, timers and RNG.
pub struct Simulation {
    world: World,
    schedule: Schedule,
    graph: Arc<ResourceGraph>,
    rng_seed: u64,
}

impl Simulation {
    pub fn new(graph: ResourceGraph, config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let graph = Arc::new(graph);
        let mut economy = ResourceState::new(Arc::clone(&graph));
        economy.set_ignore_minimum(config.ignore_minimum);

        let mut world = World::new();
        world.insert_resource(Economy(economy));
        world.insert_resource(Contracts(ContractBook::new(ContractSettings::from(&config))));
        world.insert_resource(SimRng(ChaCha8Rng::seed_from_u64(config.rng_seed)));
        world.insert_resource(SimClock::from_config(&config));
        world.insert_resource(DecayTimer::default());
        world.init_resource::<Events<SimEvent>>();

        let mut schedule = Schedule::default();
        schedule.set_executor_kind(ExecutorKind::SingleThreaded);
        schedule.add_systems((noise_system, decay_system, maintenance_system).chain());

        let mut sim = Self {
            world,
            schedule,
            graph,
            rng_seed: config.rng_seed,
        };
        sim.maintain();
        info!(
            resources = sim.graph.len(),
            tiers = sim.graph.max_tier(),
            contracts = sim.contracts().len(),
            "simulation initialized"
        );
        Ok(sim)
    }

    /// Build the graph from a scenario and start a simulation on it.
    pub fn from_scenario(scenario: &Scenario) -> Result<Self, ConfigError> {
        Self::new(scenario.build_graph()?, scenario.settings.clone())
    }

    // ---------------------------------------------------------------------
    // Time
    // ---------------------------------------------------------------------

    /// Advance simulated time by one frame of `dt_ms`.
    ///
    /// Events older than the previous frame are dropped here, so a host that
    /// never drains does not accumulate them.
    pub fn advance(&mut self, dt_ms: u64) {
        self.world.resource_mut::<Events<SimEvent>>().update();
        {
            let mut clock = self.world.resource_mut::<SimClock>();
            clock.frame_ms = dt_ms;
            if !clock.paused {
                clock.elapsed_ms += dt_ms;
            }
        }
        self.schedule.run(&mut self.world);
    }

    /// Run `total_ms` of simulated time in frames of at most `frame_ms`.
    pub fn run_for(&mut self, total_ms: u64, frame_ms: u64) {
        let frame_ms = frame_ms.max(1);
        let mut left = total_ms;
        while left > 0 {
            let dt = left.min(frame_ms);
            self.advance(dt);
            left -= dt;
        }
    }

    /// Pausing freezes noise, decay progress and maintenance; manual edits
    /// and undo keep working.
    pub fn set_paused(&mut self, paused: bool) {
        self.world.resource_mut::<SimClock>().paused = paused;
        debug!(paused, "pause toggled");
        if !paused {
            self.maintain();
        }
    }

    pub fn paused(&self) -> bool {
        self.clock().paused
    }

    // ---------------------------------------------------------------------
    // Resources
    // ---------------------------------------------------------------------

    pub fn set_resource_value(&mut self, name: &str, input: impl Into<ValueInput>) -> bool {
        self.economy_mut().set_resource_value(name, input)
    }

    pub fn update_resource_value<F>(&mut self, name: &str, f: F) -> bool
    where
        F: FnOnce(f64) -> f64,
    {
        self.economy_mut().update_resource_value(name, f)
    }

    pub fn undo_last_change(&mut self) -> bool {
        self.economy_mut().undo_last_change()
    }

    pub fn reset_resources(&mut self) {
        self.economy_mut().reset_resources();
        self.push_event(SimEvent::ResourcesReset);
    }

    /// Flip noise on or off. Turning it on runs one tick immediately
    /// (unless paused) and restarts the interval.
    pub fn toggle_noise(&mut self) -> bool {
        let on = !self.noise_active();
        self.set_noise_enabled(on);
        on
    }

    pub fn set_noise_enabled(&mut self, on: bool) {
        let (was_on, paused) = {
            let mut clock = self.world.resource_mut::<SimClock>();
            let was_on = clock.noise_on;
            clock.noise_on = on;
            clock.noise_elapsed_ms = 0;
            (was_on, clock.paused)
        };
        if on && !was_on && !paused {
            let changed = self.world.resource_scope(|world, mut rng: Mut<SimRng>| {
                let mut economy = world.resource_mut::<Economy>();
                noise_tick(&mut economy.0, &mut rng.0)
            });
            self.push_event(SimEvent::NoiseTick {
                changed: changed.len(),
            });
        }
    }

    pub fn toggle_ignore_minimum(&mut self) -> bool {
        let on = !self.ignore_minimum();
        self.economy_mut().set_ignore_minimum(on);
        on
    }

    pub fn set_ignore_minimum(&mut self, on: bool) {
        self.economy_mut().set_ignore_minimum(on);
    }

    // ---------------------------------------------------------------------
    // Contracts
    // ---------------------------------------------------------------------

    pub fn complete_contract(&mut self, id: ContractId) -> Option<Contract> {
        let done = self.with_contracts(|book, economy, _, _| book.complete(id, economy));
        if let Some(c) = &done {
            self.push_event(SimEvent::ContractCompleted {
                id: c.id,
                reward: c.reward,
            });
            self.maintain();
        }
        done
    }

    pub fn decay_contract(&mut self, id: ContractId) -> Option<Contract> {
        let gone = self.with_contracts(|book, economy, _, _| book.decay(id, economy));
        if gone.is_some() {
            self.push_event(SimEvent::ContractDecayed { id });
            self.maintain();
        }
        gone
    }

    /// Drop all contracts and reset the escalator; reseeds unless paused.
    pub fn reset_contracts(&mut self) {
        let report = self.with_contracts(|book, economy, rng, paused| book.reset(economy, rng, paused));
        *self.world.resource_mut::<DecayTimer>() = DecayTimer::default();
        self.push_event(SimEvent::ContractsReset);
        self.record_generated(report.generated);
    }

    pub fn set_contract_count(&mut self, count: usize) {
        self.with_contracts(|book, _, _, _| book.set_target_count(count));
        self.maintain();
    }

    pub fn set_difficulty(&mut self, difficulty: f64) {
        let report = self.with_contracts(|book, economy, rng, paused| {
            book.set_difficulty(difficulty, economy, rng, paused)
        });
        self.record_generated(report.generated);
    }

    pub fn set_reward_range(&mut self, a: f64, b: f64) {
        self.with_contracts(|book, _, _, _| book.set_reward_range(a, b));
    }

    pub fn set_max_resources(&mut self, max_resources: usize) {
        self.with_contracts(|book, _, _, _| book.set_max_resources(max_resources));
    }

    /// Value the escalator returns to on a contract reset.
    pub fn set_start_target_value(&mut self, value: f64) -> bool {
        self.with_contracts(|book, _, _, _| book.set_start_target_value(value))
    }

    /// Zero is ignored.
    pub fn set_decay_time_ms(&mut self, ms: u64) {
        if ms > 0 {
            self.world.resource_mut::<SimClock>().decay_time_ms = ms;
        }
    }

    /// Zero is ignored.
    pub fn set_noise_interval_ms(&mut self, ms: u64) {
        if ms > 0 {
            self.world.resource_mut::<SimClock>().noise_interval_ms = ms;
        }
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    pub fn graph(&self) -> &Arc<ResourceGraph> {
        &self.graph
    }

    pub fn economy(&self) -> &ResourceState {
        &self.world.resource::<Economy>().0
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.economy().value(name)
    }

    /// Resources grouped by tier with floors and history.
    pub fn resource_tiers(&self) -> Vec<TierView> {
        self.economy().tiers()
    }

    pub fn contracts(&self) -> &[Contract] {
        self.book().contracts()
    }

    pub fn noise_active(&self) -> bool {
        self.clock().noise_on
    }

    pub fn ignore_minimum(&self) -> bool {
        self.economy().ignore_minimum()
    }

    pub fn can_undo(&self) -> bool {
        self.economy().can_undo()
    }

    pub fn difficulty(&self) -> f64 {
        self.book().settings().difficulty
    }

    pub fn target_value(&self) -> f64 {
        self.book().target_value()
    }

    /// Newest contract and its decay progress in `[0, 1]`.
    pub fn decay_progress(&self) -> Option<(ContractId, f64)> {
        let newest = self.book().newest()?.id;
        let timer = self.world.resource::<DecayTimer>();
        let elapsed = if timer.contract == Some(newest) {
            timer.elapsed_ms
        } else {
            0
        };
        let total = self.clock().decay_time_ms.max(1);
        Some((newest, (elapsed as f64 / total as f64).min(1.0)))
    }

    /// Current settings, as they would be persisted.
    pub fn settings(&self) -> SimConfig {
        let clock = self.clock();
        let s = self.book().settings();
        SimConfig {
            noise_interval_ms: clock.noise_interval_ms,
            decay_time_ms: clock.decay_time_ms,
            contract_count: s.count,
            difficulty: s.difficulty,
            reward_min: s.reward.min,
            reward_max: s.reward.max,
            max_resources: s.max_resources,
            start_target_value: s.start_target_value,
            rng_seed: self.rng_seed,
            noise_enabled: clock.noise_on,
            ignore_minimum: self.ignore_minimum(),
        }
    }

    pub fn kpi(&self) -> SimKpi {
        let stats = self.book().stats();
        SimKpi {
            elapsed_ms: self.clock().elapsed_ms,
            active_contracts: self.contracts().len(),
            completed: stats.completed,
            decayed: stats.decayed,
            total_rewards: stats.total_rewards,
            target_value: self.target_value(),
            undo_depth: self.economy().action_log().len(),
        }
    }

    /// Take every event recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<SimEvent> {
        self.world
            .resource_mut::<Events<SimEvent>>()
            .drain()
            .collect()
    }

    // ---------------------------------------------------------------------
    // Persistence
    // ---------------------------------------------------------------------

    pub fn save_to<S: KvStore + ?Sized>(&self, store: &mut S) -> Result<(), StoreError> {
        save(store, &versioned_key(SETTINGS_ID, SNAPSHOT_VERSION), &self.settings())?;
        save(
            store,
            &versioned_key(RESOURCES_ID, SNAPSHOT_VERSION),
            &self.economy().snapshot(),
        )?;
        info!("simulation saved");
        Ok(())
    }

    /// Apply stored resource values, then stored settings, so contracts
    /// regenerated by a settings change are priced from restored values.
    /// Missing or unreadable snapshots leave the current state in place.
    pub fn restore_from<S: KvStore + ?Sized>(&mut self, store: &S) {
        let snap: ResourceSnapshot = load_or_default(
            store,
            &versioned_key(RESOURCES_ID, SNAPSHOT_VERSION),
            ResourceSnapshot::default(),
        );
        if !snap.values.is_empty() {
            self.economy_mut().restore(&snap);
            info!(resources = snap.values.len(), "resources restored");
        }
        let current = self.settings();
        let cfg: SimConfig = load_or_default(
            store,
            &versioned_key(SETTINGS_ID, SNAPSHOT_VERSION),
            current.clone(),
        );
        match cfg.validate() {
            Ok(()) if cfg != current => self.apply_settings(&cfg),
            Ok(()) => {}
            Err(e) => warn!(error = %e, "stored settings rejected"),
        }
    }

    fn apply_settings(&mut self, cfg: &SimConfig) {
        if cfg.rng_seed != self.rng_seed {
            self.rng_seed = cfg.rng_seed;
            self.world.resource_mut::<SimRng>().0 = ChaCha8Rng::seed_from_u64(cfg.rng_seed);
        }
        self.set_noise_interval_ms(cfg.noise_interval_ms);
        self.set_decay_time_ms(cfg.decay_time_ms);
        self.set_reward_range(cfg.reward_min, cfg.reward_max);
        self.set_max_resources(cfg.max_resources);
        self.set_start_target_value(cfg.start_target_value);
        self.set_ignore_minimum(cfg.ignore_minimum);
        self.world.resource_mut::<SimClock>().noise_on = cfg.noise_enabled;
        self.set_difficulty(cfg.difficulty);
        self.set_contract_count(cfg.contract_count);
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn clock(&self) -> &SimClock {
        self.world.resource::<SimClock>()
    }

    fn book(&self) -> &ContractBook {
        &self.world.resource::<Contracts>().0
    }

    fn economy_mut(&mut self) -> &mut ResourceState {
        &mut self.world.resource_mut::<Economy>().into_inner().0
    }

    fn push_event(&mut self, event: SimEvent) {
        self.world.resource_mut::<Events<SimEvent>>().send(event);
    }

    fn record_generated(&mut self, ids: Vec<ContractId>) {
        self.world
            .resource_mut::<Events<SimEvent>>()
            .extend(ids.into_iter().map(|id| SimEvent::ContractGenerated { id }));
    }

    fn with_contracts<U>(
        &mut self,
        f: impl FnOnce(&mut ContractBook, &mut ResourceState, &mut ChaCha8Rng, bool) -> U,
    ) -> U {
        let paused = self.paused();
        self.world
            .resource_scope(|world, mut contracts: Mut<Contracts>| {
                world.resource_scope(|world, mut rng: Mut<SimRng>| {
                    let mut economy = world.resource_mut::<Economy>();
                    f(&mut contracts.0, &mut economy.0, &mut rng.0, paused)
                })
            })
    }

    /// Event-driven maintenance pass, same as the per-frame system.
    fn maintain(&mut self) {
        let report = self.with_contracts(|book, economy, rng, paused| book.maintain(economy, rng, paused));
        self.world
            .resource_mut::<Events<SimEvent>>()
            .extend(maintenance_events(report));
    }
}
