#![deny(warnings)]

//! Headless driver: load a scenario, run it for a while, print the result.

use anyhow::{Context, Result};
use persistence::FileStore;
use sim_core::{load_scenario, Scenario};
use sim_runtime::{SimEvent, Simulation};
use tracing::info;
use tracing_subscriber::EnvFilter;

const FRAME_MS: u64 = 100;

#[derive(Debug, Default)]
struct Args {
    scenario: Option<String>,
    seconds: Option<u64>,
    seed: Option<u64>,
    complete_every_ms: Option<u64>,
    state_dir: Option<String>,
}

fn parse_args() -> Args {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--scenario" => args.scenario = it.next(),
            "--seconds" => args.seconds = it.next().and_then(|s| s.parse().ok()),
            "--seed" => args.seed = it.next().and_then(|s| s.parse().ok()),
            "--complete-every" => {
                args.complete_every_ms = it.next().and_then(|s| s.parse().ok())
            }
            "--state-dir" => args.state_dir = it.next(),
            _ => {}
        }
    }
    args
}

/// Requested run length, one minute by default.
fn run_length_ms(seconds: Option<u64>) -> u64 {
    seconds.unwrap_or(60).saturating_mul(1_000)
}

fn print_state(sim: &Simulation) -> Result<()> {
    for tier in sim.resource_tiers() {
        println!("Tier {}", tier.tier);
        for r in tier.resources {
            println!(
                "  {} {:<16} {:>8.0}  (min {:.0}, range {:.0}..{:.0})",
                r.icon, r.label, r.value, r.min, r.history_low, r.history_high
            );
        }
    }
    println!("Contracts (target value {:.1})", sim.target_value());
    for c in sim.contracts() {
        let bundle: Vec<String> = c
            .resources
            .iter()
            .map(|(name, qty)| format!("{qty}x {name}"))
            .collect();
        println!(
            "  {} {:<18} value {:>7.0}  reward {:>6}  [{}]",
            c.id,
            c.label,
            c.value,
            c.reward,
            bundle.join(", ")
        );
    }
    if let Some((id, progress)) = sim.decay_progress() {
        println!("Decaying {} at {:.0}%", id, progress * 100.0);
    }
    println!("KPI {}", serde_json::to_string(&sim.kpi())?);
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = parse_args();
    info!(git_sha = env!("GIT_SHA"), ?args, "starting CLI");

    let mut scenario = match &args.scenario {
        Some(path) => load_scenario(path).with_context(|| format!("loading scenario {path}"))?,
        None => Scenario::default(),
    };
    if let Some(seed) = args.seed {
        scenario.settings.rng_seed = seed;
    }
    let mut sim = Simulation::from_scenario(&scenario).context("building simulation")?;

    let mut store = match &args.state_dir {
        Some(dir) => Some(FileStore::open(dir).with_context(|| format!("opening {dir}"))?),
        None => None,
    };
    if let Some(store) = &store {
        sim.restore_from(store);
    }

    let total_ms = run_length_ms(args.seconds);
    let mut since_completion = 0;
    let mut run = 0;
    let mut events = 0u64;
    let mut ticks = 0u64;
    while run < total_ms {
        let dt = FRAME_MS.min(total_ms - run);
        sim.advance(dt);
        run += dt;
        for event in sim.drain_events() {
            events += 1;
            if matches!(event, SimEvent::NoiseTick { .. }) {
                ticks += 1;
            }
        }
        if let Some(every) = args.complete_every_ms.filter(|&ms| ms > 0) {
            since_completion += dt;
            if since_completion >= every {
                since_completion = 0;
                if let Some(id) = sim.contracts().first().map(|c| c.id) {
                    sim.complete_contract(id);
                }
            }
        }
    }

    info!(events, noise_ticks = ticks, "run finished");

    print_state(&sim)?;

    if let Some(store) = store.as_mut() {
        sim.save_to(store).context("saving state")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_length_saturates() {
        assert_eq!(run_length_ms(None), 60_000);
        assert_eq!(run_length_ms(Some(2)), 2_000);
        assert_eq!(run_length_ms(Some(u64::MAX)), u64::MAX);
    }
}
