//! Core engine for an aquarium of evolving multicellular organisms.
//!
//! A [`Sim`] owns a 2-D water column ([`Environment`]), a population of
//! [`Organism`]s built from genetically typed cells, and a
//! [`SpeciesRegistry`] of genomes. Each call to [`Sim::step`] advances one
//! tick: organisms feed from a shared pool, drift, bud new cells, mutate,
//! die, and split into daughters when their bodies lose connectivity.
//! Spatial admission areas and an escalating cell-culling valve keep the
//! population bounded.
//!
//! The engine is single-threaded by design; [`SharedSim`] wraps it in a
//! coarse mutex so a reporting thread can read summaries while a runner
//! thread advances the loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

mod cell;
mod environment;
mod genome;
mod grid;
mod organism;

pub use cell::Cell;
pub use environment::Environment;
pub use genome::{
    CellType, Diet, Species, SpeciesId, SpeciesRegistry, random_funghi, random_herbivore,
};
pub use grid::CellGraph;
pub use organism::{Organism, SPLIT_RADIUS, StepContext};

/// Monotonic simulation time, in ticks.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Tick(pub u64);

impl Tick {
    #[must_use]
    pub fn next(self) -> Tick {
        Tick(self.0 + 1)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// World-space position of an organism.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// This position displaced by an organism-local grid offset.
    #[must_use]
    pub fn offset(self, point: GridPoint) -> Position {
        Position {
            x: self.x + f64::from(point.x),
            y: self.y + f64::from(point.y),
        }
    }
}

/// Organism-local integer cell coordinate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPoint {
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Tunable parameters for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub width: u32,
    pub height: u32,
    /// The world is cut into `area_count`² admission areas, plus a
    /// staggered auxiliary grid offset by half an area.
    pub area_count: u32,
    /// Global cap on living cells; past it the culling valve engages.
    pub max_cells: usize,
    /// Cap on cells within a single organism.
    pub organism_max_cells: usize,
    pub start_organisms: usize,
    /// Ticks a corpse lingers before decaying into waste.
    pub corpse_grace_period: u64,
    /// Iterations to run unthrottled before the loop starts pacing.
    pub warmup_iterations: u64,
    pub verbose: bool,
    /// Fixed RNG seed; `None` seeds from the operating system.
    pub rng_seed: Option<u64>,
    pub organism_mutation_chance: f64,
    pub cell_procreation_chance: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            width: 10_000,
            height: 10_000,
            area_count: 5,
            max_cells: 20_000,
            organism_max_cells: 25,
            start_organisms: 25,
            corpse_grace_period: 10,
            warmup_iterations: 600,
            verbose: false,
            rng_seed: None,
            organism_mutation_chance: 0.001,
            cell_procreation_chance: 0.2,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.width == 0 || self.height == 0 {
            return Err(SimError::InvalidConfig("world dimensions must be non-zero"));
        }
        if self.area_count == 0 {
            return Err(SimError::InvalidConfig("area count must be non-zero"));
        }
        if self.width % self.area_count != 0 || self.height % self.area_count != 0 {
            return Err(SimError::InvalidConfig(
                "world dimensions must divide evenly into admission areas",
            ));
        }
        if self.max_cells == 0 {
            return Err(SimError::InvalidConfig("max cells must be non-zero"));
        }
        if self.organism_max_cells == 0 {
            return Err(SimError::InvalidConfig(
                "per-organism cell cap must be non-zero",
            ));
        }
        if self.start_organisms == 0 {
            return Err(SimError::InvalidConfig(
                "at least one seed organism is required",
            ));
        }
        if !(0.0..=1.0).contains(&self.organism_mutation_chance) {
            return Err(SimError::InvalidConfig(
                "organism mutation chance must be a probability",
            ));
        }
        if !(0.0..=1.0).contains(&self.cell_procreation_chance) {
            return Err(SimError::InvalidConfig(
                "cell procreation chance must be a probability",
            ));
        }
        Ok(())
    }

    fn rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        }
    }
}

/// Waste summary for one iteration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct WasteData {
    pub waste: f64,
    pub min_tolerance: f64,
    pub max_tolerance: f64,
}

/// Procreation summary for one iteration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcreationData {
    pub can_procreate: bool,
    pub min_cooldown: i32,
    pub max_cooldown: i32,
    pub min_height: f64,
    pub max_height: f64,
    pub species: Vec<Species>,
}

/// Snapshot of one iteration, published to readers through [`SharedSim`].
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationData {
    pub iteration: Tick,
    pub cell_count: usize,
    pub alive_cell_count: usize,
    pub waste: WasteData,
    pub procreation: ProcreationData,
}

/// The simulation state and orchestrator.
pub struct Sim {
    config: SimConfig,
    env: Environment,
    tick: Tick,
    organisms: Vec<Organism>,
    registry: SpeciesRegistry,
    next_organism_id: u64,
    rng: SmallRng,
}

impl Sim {
    /// Builds a world from the config and seeds the starting population,
    /// uniformly placed over the central 80% of the column.
    pub fn create(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        let mut rng = config.rng();
        let env = Environment::new(config.width, config.height);
        let mut registry = SpeciesRegistry::new();
        let mut organisms = Vec::with_capacity(config.start_organisms);

        for index in 0..config.start_organisms {
            let species = if rng.random::<f32>() > 0.5 {
                random_herbivore(&mut rng)
            } else {
                random_funghi(&mut rng)
            };
            let id = registry.register(species, Tick(0));
            if let Some(species) = registry.get(id) {
                let position = Position {
                    x: f64::from(config.width) * rng.random::<f64>() * 0.8
                        + f64::from(config.width) / 10.0,
                    y: f64::from(config.height) * rng.random::<f64>() * 0.8
                        + f64::from(config.height) / 10.0,
                };
                organisms.push(Organism::seed(index as u64, species, position, Tick(0), &mut rng));
            }
        }

        let next_organism_id = organisms.len() as u64;
        Ok(Self {
            config,
            env,
            tick: Tick(0),
            organisms,
            registry,
            next_organism_id,
            rng,
        })
    }

    /// Advances the world one tick and returns its summary.
    pub fn step(&mut self) -> IterationData {
        self.tick = self.tick.next();
        let _span = tracing::debug_span!("step", iteration = self.tick.0).entered();

        let mut data = IterationData {
            iteration: self.tick,
            cell_count: self.cell_count(),
            alive_cell_count: self.alive_cell_count(),
            ..IterationData::default()
        };
        data.waste.waste = self.env.toxicity();
        data.procreation.can_procreate = data.alive_cell_count < self.config.max_cells;
        self.collect_species_stats(&mut data);

        let areas = self.admission_areas();

        let organisms = std::mem::take(&mut self.organisms);
        let mut next = Vec::with_capacity(organisms.len() * 2);
        let mut waste = 0.0;
        let mut min_height = f64::from(self.config.height);
        let mut max_height = 0.0_f64;

        for mut organism in organisms {
            if organism.is_alive() {
                min_height = min_height.min(organism.position.y);
                max_height = max_height.max(organism.position.y);
            }

            let admitted = self.admits(&areas, organism.position);
            let ctx = StepContext {
                env: &self.env,
                tick: self.tick,
                admitted,
                cell_cap: self.config.organism_max_cells,
                mutation_chance: self.config.organism_mutation_chance,
                procreation_chance: self.config.cell_procreation_chance,
            };
            let spawned = organism.step(&ctx, &mut self.registry, &mut self.rng);
            for mut daughter in spawned {
                daughter.id = self.next_organism_id;
                self.next_organism_id += 1;
                daughter.born_at = self.tick;
                next.push(daughter);
            }

            waste += self.rot_and_accrue(&mut organism);
            if !organism.cells.is_empty() {
                next.push(organism);
            }
        }

        self.organisms = next;
        self.env.change_toxicity(waste);

        if self.alive_cell_count() > self.config.max_cells {
            self.kill_oldest_cells();
        }
        self.cleanup_species();

        data.procreation.min_height = min_height;
        data.procreation.max_height = max_height;
        data.procreation.species = self.registry.snapshot();

        if self.config.verbose {
            info!(
                iteration = self.tick.0,
                organisms = self.organisms.len(),
                alive = self.alive_count(),
                cells = self.alive_cell_count(),
                toxicity = self.env.toxicity(),
                species = self.registry.len(),
                "iteration complete",
            );
        } else {
            debug!(
                iteration = self.tick.0,
                organisms = self.organisms.len(),
                cells = self.alive_cell_count(),
                "iteration complete",
            );
        }

        data
    }

    /// Waste tolerance and procreation cooldown extremes over every
    /// registered genome.
    fn collect_species_stats(&self, data: &mut IterationData) {
        let mut seen = false;
        let mut min_tolerance = f64::INFINITY;
        let mut max_tolerance = f64::NEG_INFINITY;
        let mut min_cooldown = i32::MAX;
        let mut max_cooldown = i32::MIN;

        for (_, species) in self.registry.iter() {
            for cell_type in &species.types {
                seen = true;
                min_tolerance = min_tolerance.min(cell_type.tolerance());
                max_tolerance = max_tolerance.max(cell_type.tolerance());
                min_cooldown = min_cooldown.min(cell_type.cooldown());
                max_cooldown = max_cooldown.max(cell_type.cooldown());
            }
        }

        if seen {
            data.waste.min_tolerance = min_tolerance;
            data.waste.max_tolerance = max_tolerance;
            data.procreation.min_cooldown = min_cooldown;
            data.procreation.max_cooldown = max_cooldown;
        }
    }

    /// Accrues living-cell waste and decays corpses past the grace
    /// period, dropping them from the body. Returns the waste total.
    fn rot_and_accrue(&self, organism: &mut Organism) -> f64 {
        let Some(species) = self.registry.get(organism.species) else {
            return 0.0;
        };
        let tick = self.tick;
        let grace = self.config.corpse_grace_period;
        let env = &self.env;
        let position = organism.position;
        let mut waste = 0.0;

        organism.cells.retain(|cell| {
            if cell.alive {
                if let Some(cell_type) = species.type_by_id(cell.cell_type) {
                    let world = position.offset(cell.position);
                    waste += cell_type.waste(env.toxicity_at_depth(world.y));
                }
                return true;
            }
            match cell.died_at {
                Some(died) if tick.0.saturating_sub(died.0) > grace => {
                    if let Some(cell_type) = species.type_by_id(cell.cell_type) {
                        waste += cell_type.waste_after_death();
                    }
                    false
                }
                _ => true,
            }
        });

        waste
    }

    /// Admission flags: `area_count`² primary areas followed by the
    /// `(area_count − 1)`² staggered auxiliary areas. An area admits while
    /// its live-organism count is under an even share of `max_cells`.
    fn admission_areas(&self) -> Vec<bool> {
        let n = self.config.area_count as usize;
        let aux_n = n.saturating_sub(1);
        let mut counts = vec![0_usize; n * n + aux_n * aux_n];

        for organism in &self.organisms {
            if !organism.is_alive() {
                continue;
            }
            let position = self.fit_to_boundary(organism.position);
            let (px, py) = self.primary_index(position);
            counts[py * n + px] += 1;
            if let Some((ax, ay)) = self.aux_index(position) {
                counts[n * n + ay * aux_n + ax] += 1;
            }
        }

        let cap = self.config.max_cells / (n * n);
        counts.into_iter().map(|count| count < cap).collect()
    }

    /// An organism's position admits growth only if its primary area and,
    /// where one covers it, its staggered auxiliary area both admit.
    fn admits(&self, areas: &[bool], position: Position) -> bool {
        let n = self.config.area_count as usize;
        let position = self.fit_to_boundary(position);
        let (px, py) = self.primary_index(position);
        let mut admitted = areas[py * n + px];
        if let Some((ax, ay)) = self.aux_index(position) {
            admitted = admitted && areas[n * n + ay * (n - 1) + ax];
        }
        admitted
    }

    fn primary_index(&self, position: Position) -> (usize, usize) {
        let n = self.config.area_count as usize;
        let area_width = f64::from(self.config.width) / n as f64;
        let area_height = f64::from(self.config.height) / n as f64;
        let px = ((position.x / area_width) as usize).min(n - 1);
        let py = ((position.y / area_height) as usize).min(n - 1);
        (px, py)
    }

    fn aux_index(&self, position: Position) -> Option<(usize, usize)> {
        let n = self.config.area_count as usize;
        if n < 2 {
            return None;
        }
        let area_width = f64::from(self.config.width) / n as f64;
        let area_height = f64::from(self.config.height) / n as f64;
        let x = position.x - area_width / 2.0;
        let y = position.y - area_height / 2.0;
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let ax = (x / area_width) as usize;
        let ay = (y / area_height) as usize;
        if ax >= n - 1 || ay >= n - 1 {
            return None;
        }
        Some((ax, ay))
    }

    fn fit_to_boundary(&self, position: Position) -> Position {
        Position {
            x: position.x.clamp(0.0, f64::from(self.config.width) - 1.0),
            y: position.y.clamp(0.0, f64::from(self.config.height) - 1.0),
        }
    }

    /// Population safety valve: sweeps an escalating remaining-lifespan
    /// threshold over every living cell until the global cap holds,
    /// culling the cells closest to natural death first.
    fn kill_oldest_cells(&mut self) {
        let mut threshold: i64 = 5;
        // Lifespans cap at 160 ticks, so the sweep always terminates.
        while self.alive_cell_count() > self.config.max_cells && threshold <= 165 {
            for organism in &mut self.organisms {
                let Some(species) = self.registry.get(organism.species) else {
                    continue;
                };
                for cell in &mut organism.cells {
                    if !cell.alive {
                        continue;
                    }
                    let Some(cell_type) = species.type_by_id(cell.cell_type) else {
                        continue;
                    };
                    let remaining = cell.born_at.0 as i64 + i64::from(cell_type.lifespan())
                        - self.tick.0 as i64;
                    if remaining < threshold {
                        cell.die(self.tick);
                    }
                }
            }
            threshold += 5;
        }
    }

    /// Recounts each species against the surviving organisms and drops
    /// the ones nothing references any more.
    fn cleanup_species(&mut self) {
        let mut counts: HashMap<SpeciesId, usize> = HashMap::with_capacity(self.registry.len());
        for organism in &self.organisms {
            *counts.entry(organism.species).or_insert(0) += 1;
        }
        self.registry.apply_census(&counts);
    }

    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    #[must_use]
    pub fn iteration(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn organisms(&self) -> &[Organism] {
        &self.organisms
    }

    #[must_use]
    pub fn species(&self) -> &SpeciesRegistry {
        &self.registry
    }

    /// Number of living organisms.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.organisms.iter().filter(|o| o.is_alive()).count()
    }

    /// Total cells in the world, corpses included.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.organisms.iter().map(|o| o.cells.len()).sum()
    }

    #[must_use]
    pub fn alive_cell_count(&self) -> usize {
        self.organisms.iter().map(Organism::alive_cell_count).sum()
    }
}

/// Coarse-mutex handle shared between the simulation loop and readers.
#[derive(Clone)]
pub struct SharedSim {
    inner: Arc<Mutex<Sim>>,
}

impl SharedSim {
    #[must_use]
    pub fn new(sim: Sim) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sim)),
        }
    }

    /// Locks the simulation for direct access. A poisoned lock is
    /// recovered; the engine holds no invariants across a panic that the
    /// next step would not rebuild.
    pub fn lock(&self) -> MutexGuard<'_, Sim> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the simulation until extinction, publishing each summary into
    /// `latest`. After the warm-up iterations the loop paces itself to
    /// one tick per second unless verbose mode asks for full speed.
    pub fn run_loop(&self, latest: &Mutex<IterationData>) {
        let (warmup, paced) = {
            let sim = self.lock();
            (sim.config().warmup_iterations, !sim.config().verbose)
        };

        loop {
            let (data, extinct) = {
                let mut sim = self.lock();
                let data = sim.step();
                let extinct = sim.cell_count() == 0;
                (data, extinct)
            };
            let iteration = data.iteration;
            *latest.lock().unwrap_or_else(PoisonError::into_inner) = data;

            if extinct {
                info!(iteration = iteration.0, "population extinct, stopping");
                break;
            }
            if paced && iteration.0 > warmup {
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
}
