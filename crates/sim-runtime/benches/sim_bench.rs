use criterion::{criterion_group, criterion_main, Criterion};
use sim_core::{default_catalog, ResourceGraph, SimConfig};
use sim_runtime::Simulation;

fn bench_frames(c: &mut Criterion) {
    let graph = ResourceGraph::new(default_catalog()).expect("catalog");
    let cfg = SimConfig {
        noise_interval_ms: 100,
        decay_time_ms: 1_000,
        contract_count: 5,
        ..SimConfig::default()
    };
    let mut sim = Simulation::new(graph, cfg).expect("config");
    c.bench_function("sim_second", |b| {
        b.iter(|| {
            sim.run_for(1_000, 16);
            sim.drain_events()
        })
    });
    c.bench_function("complete_oldest", |b| {
        b.iter(|| {
            if let Some(id) = sim.contracts().first().map(|c| c.id) {
                sim.complete_contract(id);
            }
            if sim.target_value() > 10_000.0 {
                sim.reset_contracts();
                sim.reset_resources();
            }
        })
    });
}

criterion_group!(benches, bench_frames);
criterion_main!(benches);
