use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use aquarium_core::{IterationData, SharedSim, Sim, SimConfig};
use tracing::info;

fn main() -> Result<()> {
    init_tracing();

    let config = SimConfig::default();
    let sim = Sim::create(config)?;
    let shared = SharedSim::new(sim);
    let latest = Arc::new(Mutex::new(IterationData::default()));

    {
        let sim = shared.lock();
        info!(
            organisms = sim.organisms().len(),
            species = sim.species().len(),
            "starting aquarium",
        );
    }

    let runner = {
        let shared = shared.clone();
        let latest = Arc::clone(&latest);
        thread::spawn(move || shared.run_loop(&latest))
    };

    while !runner.is_finished() {
        thread::sleep(Duration::from_secs(5));
        report(&latest);
    }

    runner
        .join()
        .map_err(|_| anyhow::anyhow!("simulation loop panicked"))?;
    report(&latest);
    info!("aquarium went extinct");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn report(latest: &Mutex<IterationData>) {
    let Ok(summary) = latest.lock() else {
        return;
    };
    info!(
        iteration = summary.iteration.0,
        cells = summary.cell_count,
        alive = summary.alive_cell_count,
        toxicity = summary.waste.waste,
        species = summary.procreation.species.len(),
        "aquarium status",
    );
}
