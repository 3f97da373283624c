//! Multicellular organisms: shared feeding, budding, drift, mutation, and
//! splitting into daughter organisms when the body loses connectivity.

use std::f64::consts::TAU;

use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::environment::Environment;
use crate::genome::{CellType, Species, SpeciesRegistry};
use crate::grid::CellGraph;
use crate::{GridPoint, Position, Tick};

/// Cell offsets live in `[-SPLIT_RADIUS, SPLIT_RADIUS]` on both axes, so a
/// body always fits the split window.
pub const SPLIT_RADIUS: i32 = 5;

const SPLIT_WINDOW: usize = (SPLIT_RADIUS * 2 + 1) as usize;

/// Per-tick inputs an organism needs; assembled by the simulation from its
/// config and admission grid.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub env: &'a Environment,
    pub tick: Tick,
    /// Whether the organism's area accepts new organisms and cells.
    pub admitted: bool,
    /// Hard cap on cells per organism.
    pub cell_cap: usize,
    pub mutation_chance: f64,
    pub procreation_chance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organism {
    pub id: u64,
    pub angle: f64,
    pub position: Position,
    pub cells: Vec<Cell>,
    pub species: crate::genome::SpeciesId,
    pub born_at: Tick,
    pub died_at: Option<Tick>,
    pub(crate) last_cell_id: u32,
}

impl Organism {
    /// A fresh single-celled organism of the species' first type.
    #[must_use]
    pub fn seed(
        id: u64,
        species: &Species,
        position: Position,
        tick: Tick,
        rng: &mut SmallRng,
    ) -> Self {
        let cell = Cell::new(0, &species.types[0], GridPoint::default(), tick);
        Self {
            id,
            angle: rng.random_range(0.0..TAU),
            position,
            cells: vec![cell],
            species: species.id,
            born_at: tick,
            died_at: None,
            last_cell_id: 0,
        }
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.cells.iter().any(|cell| cell.alive)
    }

    #[must_use]
    pub fn alive_cell_count(&self) -> usize {
        self.cells.iter().filter(|cell| cell.alive).count()
    }

    pub fn die(&mut self, tick: Tick) {
        for cell in &mut self.cells {
            cell.die(tick);
        }
    }

    /// Runs one tick of life. Returns daughter organisms broken off by
    /// splitting; an empty vec otherwise.
    pub fn step(
        &mut self,
        ctx: &StepContext<'_>,
        registry: &mut SpeciesRegistry,
        rng: &mut SmallRng,
    ) -> Vec<Organism> {
        if !self.is_alive() {
            return Vec::new();
        }
        let age = ctx.tick.0.saturating_sub(self.born_at.0);

        if let Some(species) = registry.get(self.species) {
            self.eat(ctx.env, species, ctx.tick);
            self.wander(species, rng);
        }

        if rng.random::<f64>() < ctx.mutation_chance {
            self.mutate(registry, ctx.tick, rng);
        }

        if age > 200 + ctx.tick.0 / 3200 {
            // Senescence: past the age ceiling the whole body risks
            // collapse every tick.
            if rng.random::<f64>() > 0.66 {
                self.die(ctx.tick);
            }
        } else if let Some(species) = registry.get(self.species) {
            if ctx.admitted {
                self.procreate(ctx, species, rng);
            }
            self.kill_cells(ctx.env, species, ctx.tick);
        }

        if self.alive_cell_count() == 0 {
            self.died_at = Some(ctx.tick);
            return Vec::new();
        }

        self.split(ctx, rng)
    }

    /// The four-pass feeding protocol over one shared pool:
    /// produce, refund upkeep, top up reproducers, bank the surplus.
    /// Returns the food left unconsumed.
    pub fn eat(&mut self, env: &Environment, species: &Species, tick: Tick) -> i32 {
        let depth = self.position.y;
        let mut pool = 0;

        for cell in &mut self.cells {
            if !cell.alive {
                continue;
            }
            if let Some(cell_type) = species.type_by_id(cell.cell_type) {
                pool += cell.food_produced(cell_type, env, tick, depth);
            }
            pool += cell.capacity;
            cell.capacity = 0;
        }

        for cell in &mut self.cells {
            if !cell.alive || pool <= 0 {
                continue;
            }
            if let Some(cell_type) = species.type_by_id(cell.cell_type) {
                let burned = cell.consume(cell_type);
                pool -= cell.eat(cell_type, burned);
            }
        }

        for cell in &mut self.cells {
            if !cell.alive || pool <= 0 {
                continue;
            }
            if species.produced_by(cell.cell_type).is_empty() {
                continue;
            }
            if let Some(cell_type) = species.type_by_id(cell.cell_type) {
                pool -= cell.eat(cell_type, pool);
            }
        }

        for cell in &mut self.cells {
            if !cell.alive || pool <= 0 {
                continue;
            }
            if let Some(cell_type) = species.type_by_id(cell.cell_type) {
                pool -= cell.store(cell_type, pool);
            }
        }

        pool
    }

    /// Idle drift: occasionally re-rolls the heading, then moves by
    /// total mobility over total mass.
    fn wander(&mut self, species: &Species, rng: &mut SmallRng) {
        if rng.random::<f32>() > 0.9 {
            self.angle = rng.random_range(0.0..TAU);
        }

        let mut mobility = 0;
        let mut mass = 0;
        for cell in &self.cells {
            if let Some(cell_type) = species.type_by_id(cell.cell_type) {
                mobility += cell_type.mobility_rate();
                mass += cell_type.mass();
            }
        }
        if mass == 0 {
            return;
        }
        let scale = f64::from(mobility * 10) / f64::from(mass);
        self.position.x += self.angle.cos() * scale;
        self.position.y += self.angle.sin() * scale;
    }

    /// Lets sated cells bud children into free grid slots, up to the
    /// per-organism cell cap.
    fn procreate(&mut self, ctx: &StepContext<'_>, species: &Species, rng: &mut SmallRng) {
        let initial = self.cells.len();
        for index in 0..initial {
            if self.cells.len() >= ctx.cell_cap {
                return;
            }
            if !self.cells[index].alive {
                continue;
            }
            let Some(type_index) = species.type_index(self.cells[index].cell_type) else {
                continue;
            };
            let cell_type = &species.types[type_index];
            if !self.cells[index].can_procreate(cell_type, ctx.tick) {
                continue;
            }
            if rng.random::<f64>() >= ctx.procreation_chance {
                continue;
            }
            let produced = &species.produces[type_index];
            if produced.is_empty() {
                continue;
            }
            let candidates: Vec<&CellType> =
                produced.iter().map(|&i| &species.types[i]).collect();

            let origin = self.cells[index].position;
            let Some(slot) = self.free_slot(origin, cell_type.can_connect(), rng) else {
                continue;
            };
            let mut child = self.cells[index].procreate(ctx.tick, &candidates, rng);
            self.last_cell_id += 1;
            child.id = self.last_cell_id;
            child.position = slot;
            self.cells.push(child);
        }
    }

    /// Finds an unoccupied slot near `origin` inside the split window.
    /// Connecting types bud flush against the parent; the rest bud a
    /// detached cell one ring out. The search starts at a random offset
    /// so growth has no preferred direction.
    fn free_slot(&self, origin: GridPoint, connect: bool, rng: &mut SmallRng) -> Option<GridPoint> {
        const ADJACENT: [(i32, i32); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];
        const DETACHED: [(i32, i32); 8] = [
            (0, -2),
            (2, 0),
            (0, 2),
            (-2, 0),
            (1, 1),
            (1, -1),
            (-1, 1),
            (-1, -1),
        ];

        let offsets: &[(i32, i32)] = if connect { &ADJACENT } else { &DETACHED };
        let start = rng.random_range(0..offsets.len());
        for step in 0..offsets.len() {
            let (dx, dy) = offsets[(start + step) % offsets.len()];
            let candidate = GridPoint {
                x: origin.x + dx,
                y: origin.y + dy,
            };
            if candidate.x.abs() > SPLIT_RADIUS || candidate.y.abs() > SPLIT_RADIUS {
                continue;
            }
            if self.cells.iter().all(|cell| cell.position != candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Registers a mutated copy of the genome and adopts it. Cells keep
    /// their type ids, which resolve against the new genome.
    fn mutate(&mut self, registry: &mut SpeciesRegistry, tick: Tick, rng: &mut SmallRng) {
        let Some(current) = registry.get(self.species) else {
            return;
        };
        let next = current.mutate(rng);
        self.species = registry.register(next, tick);
    }

    fn kill_cells(&mut self, env: &Environment, species: &Species, tick: Tick) {
        let position = self.position;
        for cell in &mut self.cells {
            if !cell.alive {
                continue;
            }
            if let Some(cell_type) = species.type_by_id(cell.cell_type) {
                if cell.should_die(cell_type, env, tick, position) {
                    cell.die(tick);
                }
            }
        }
    }

    /// Flood-fills the body and breaks disconnected islands off into
    /// daughter organisms. The largest island keeps this organism; each
    /// daughter is re-centred on its bounding box and renumbered. When
    /// the area is full, split-off bodies die at birth.
    pub fn split(&mut self, ctx: &StepContext<'_>, rng: &mut SmallRng) -> Vec<Organism> {
        if self.cells.len() <= 1 {
            return Vec::new();
        }

        let mut graph = CellGraph::new(SPLIT_WINDOW, SPLIT_WINDOW);
        for (index, cell) in self.cells.iter().enumerate() {
            let x = (cell.position.x + SPLIT_RADIUS).clamp(0, SPLIT_WINDOW as i32 - 1) as usize;
            let y = (cell.position.y + SPLIT_RADIUS).clamp(0, SPLIT_WINDOW as i32 - 1) as usize;
            graph.occupy(x, y, index);
        }
        let mut islands = graph.islands();
        if islands.len() <= 1 {
            return Vec::new();
        }

        // A slot collision can shadow a cell out of the graph entirely;
        // fold any stray back into the first island so no cell is lost.
        let mut assigned = vec![false; self.cells.len()];
        for island in &islands {
            for &index in island {
                assigned[index] = true;
            }
        }
        for (index, assigned) in assigned.iter().enumerate() {
            if !assigned {
                islands[0].push(index);
            }
        }

        let mut largest = 0;
        for index in 1..islands.len() {
            if islands[index].len() > islands[largest].len() {
                largest = index;
            }
        }

        let mut slots: Vec<Option<Cell>> =
            std::mem::take(&mut self.cells).into_iter().map(Some).collect();
        let mut spawned = Vec::with_capacity(islands.len() - 1);

        for (island_index, island) in islands.iter().enumerate() {
            let mut cells: Vec<Cell> =
                island.iter().filter_map(|&index| slots[index].take()).collect();
            if island_index == largest {
                self.cells = cells;
                continue;
            }

            let mut min = GridPoint {
                x: i32::MAX,
                y: i32::MAX,
            };
            let mut max = GridPoint {
                x: i32::MIN,
                y: i32::MIN,
            };
            for cell in &cells {
                min.x = min.x.min(cell.position.x);
                min.y = min.y.min(cell.position.y);
                max.x = max.x.max(cell.position.x);
                max.y = max.y.max(cell.position.y);
            }
            let center = GridPoint {
                x: (min.x + max.x).div_euclid(2),
                y: (min.y + max.y).div_euclid(2),
            };

            for (index, cell) in cells.iter_mut().enumerate() {
                cell.position.x -= center.x;
                cell.position.y -= center.y;
                cell.id = index as u32;
                if !ctx.admitted {
                    cell.die(ctx.tick);
                }
            }

            let last_cell_id = cells.len().saturating_sub(1) as u32;
            spawned.push(Organism {
                id: 0,
                angle: rng.random_range(0.0..TAU),
                position: self.position.offset(center),
                cells,
                species: self.species,
                born_at: ctx.tick,
                died_at: None,
                last_cell_id,
            });
        }

        spawned
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use crate::genome::{Diet, SpeciesId};

    use super::*;

    fn seeded() -> SmallRng {
        SmallRng::seed_from_u64(0xaa01)
    }

    fn herbivore_type(id: u32) -> CellType {
        CellType {
            id,
            diets: vec![Diet::Herbivore],
            points: 0,
            size: 0,
            herbivore: 100,
            carnivore: 0,
            funghi: 0,
            time_to_die: 0,
            waste_tolerance: 40,
            max_satiation: -50,
            consumption: 4,
            max_capacity: 200,
            connects: 0,
            procreation_cd: 0,
            mobility: 20,
        }
    }

    fn single_type_species() -> Species {
        Species {
            id: SpeciesId::default(),
            emerged_at: Tick(0),
            extinct: false,
            count: 1,
            points: 0,
            starting_points: 0,
            types: vec![herbivore_type(0)],
            produces: vec![vec![0]],
        }
    }

    fn organism_with_cells(species: &Species, positions: &[(i32, i32)]) -> Organism {
        let cells = positions
            .iter()
            .enumerate()
            .map(|(index, &(x, y))| {
                let mut cell = Cell::new(
                    index as u32,
                    &species.types[0],
                    GridPoint { x, y },
                    Tick(0),
                );
                cell.satiation = 0;
                cell
            })
            .collect::<Vec<_>>();
        let last_cell_id = cells.len().saturating_sub(1) as u32;
        Organism {
            id: 0,
            angle: 0.0,
            position: Position { x: 0.0, y: 0.0 },
            cells,
            species: species.id,
            born_at: Tick(0),
            died_at: None,
            last_cell_id,
        }
    }

    fn context<'a>(env: &'a Environment, tick: Tick, admitted: bool) -> StepContext<'a> {
        StepContext {
            env,
            tick,
            admitted,
            cell_cap: 25,
            mutation_chance: 0.001,
            procreation_chance: 0.2,
        }
    }

    #[test]
    fn eating_returns_the_exact_leftover() {
        let env = Environment::new(10, 10);
        let species = single_type_species();
        let mut organism =
            organism_with_cells(&species, &[(0, 0), (1, 0), (2, 0), (3, 0)]);

        // Four cells produce 980 food each at full surface light. Upkeep
        // refunds cost 48, topping up the reproducers takes 1600, and
        // storage banks 800.
        let leftover = organism.eat(&env, &species, Tick(0));

        assert_eq!(leftover, 1472);
        for cell in &organism.cells {
            assert_eq!(cell.satiation, species.types[0].satiation_cap());
            assert_eq!(cell.capacity, species.types[0].max_capacity);
        }
    }

    #[test]
    fn eating_never_overfills_satiation_or_storage() {
        let env = Environment::new(10, 10);
        let species = single_type_species();
        let mut organism = organism_with_cells(&species, &[(0, 0), (1, 0)]);

        for tick in 0..50 {
            organism.eat(&env, &species, Tick(tick));
            for cell in &organism.cells {
                assert!(cell.satiation <= species.types[0].satiation_cap());
                assert!(cell.capacity <= species.types[0].max_capacity);
            }
        }
    }

    #[test]
    fn dead_cells_do_not_feed() {
        let env = Environment::new(10, 10);
        let species = single_type_species();
        let mut organism = organism_with_cells(&species, &[(0, 0), (1, 0)]);
        organism.cells[1].die(Tick(0));
        organism.cells[1].satiation = 5;

        organism.eat(&env, &species, Tick(0));
        assert_eq!(organism.cells[1].satiation, 5);
        assert_eq!(organism.cells[1].capacity, 0);
    }

    #[test]
    fn splitting_breaks_off_the_stray_cell() {
        let mut rng = seeded();
        let env = Environment::new(100, 100);
        let species = single_type_species();
        let mut organism =
            organism_with_cells(&species, &[(0, 0), (1, 0), (1, 1), (2, 2)]);
        let ctx = context(&env, Tick(1), true);

        let spawned = organism.split(&ctx, &mut rng);

        assert_eq!(spawned.len(), 1);
        assert_eq!(organism.cells.len(), 3);

        let daughter = &spawned[0];
        assert_eq!(daughter.cells.len(), 1);
        assert_eq!(daughter.cells[0].position, GridPoint { x: 0, y: 0 });
        assert_eq!(daughter.cells[0].id, 0);
        assert_eq!(daughter.position, Position { x: 2.0, y: 2.0 });
        assert!(daughter.cells[0].alive);
    }

    #[test]
    fn connected_bodies_do_not_split() {
        let mut rng = seeded();
        let env = Environment::new(100, 100);
        let species = single_type_species();
        let mut organism = organism_with_cells(&species, &[(0, 0), (1, 0), (1, 1)]);
        let ctx = context(&env, Tick(1), true);

        assert!(organism.split(&ctx, &mut rng).is_empty());
        assert_eq!(organism.cells.len(), 3);
    }

    #[test]
    fn denied_admission_kills_split_offspring() {
        let mut rng = seeded();
        let env = Environment::new(100, 100);
        let species = single_type_species();
        let mut organism = organism_with_cells(&species, &[(0, 0), (3, 3)]);
        let ctx = context(&env, Tick(7), false);

        let spawned = organism.split(&ctx, &mut rng);
        assert_eq!(spawned.len(), 1);
        assert!(!spawned[0].cells[0].alive);
        assert_eq!(spawned[0].cells[0].died_at, Some(Tick(7)));
    }

    #[test]
    fn procreation_respects_the_cell_cap() {
        let mut rng = seeded();
        let env = Environment::new(100, 100);
        let species = single_type_species();
        let mut organism = organism_with_cells(&species, &[(0, 0)]);
        let mut ctx = context(&env, Tick(1), true);
        ctx.cell_cap = 3;
        ctx.procreation_chance = 1.0;

        for tick in 1..100 {
            ctx.tick = Tick(tick);
            for cell in &mut organism.cells {
                cell.satiation = species.types[0].satiation_cap();
                cell.procreated_at = None;
            }
            organism.procreate(&ctx, &species, &mut rng);
        }

        assert_eq!(organism.cells.len(), 3);
    }

    #[test]
    fn detached_buds_land_one_ring_out() {
        let mut rng = seeded();
        let env = Environment::new(100, 100);
        let species = single_type_species();
        let mut organism = organism_with_cells(&species, &[(0, 0)]);
        organism.cells[0].satiation = species.types[0].satiation_cap();
        let mut ctx = context(&env, Tick(1), true);
        ctx.procreation_chance = 1.0;

        organism.procreate(&ctx, &species, &mut rng);

        assert_eq!(organism.cells.len(), 2);
        let child = &organism.cells[1];
        assert_eq!(child.id, 1);
        let distance = child.position.x.abs() + child.position.y.abs();
        assert_eq!(distance, 2);
    }

    #[test]
    fn organisms_can_bud_secondary_types() {
        let mut rng = seeded();
        let env = Environment::new(100, 100);
        let mut species = single_type_species();
        species.types.push(herbivore_type(1));
        species.produces = vec![vec![0, 1], vec![]];

        let mut organism = organism_with_cells(&species, &[(0, 0)]);
        let mut ctx = context(&env, Tick(1), true);
        ctx.cell_cap = 50;
        ctx.procreation_chance = 1.0;

        for tick in 1..50 {
            ctx.tick = Tick(tick);
            for cell in &mut organism.cells {
                cell.satiation = species.types[0].satiation_cap();
                cell.procreated_at = None;
            }
            organism.procreate(&ctx, &species, &mut rng);
        }

        assert!(organism.cells.iter().any(|cell| cell.cell_type == 1));
    }

    #[test]
    fn mutation_registers_a_new_species() {
        let mut rng = seeded();
        let mut registry = SpeciesRegistry::new();
        let id = registry.register(single_type_species(), Tick(0));
        let species = registry.get(id).expect("registered species").clone();
        let mut organism = organism_with_cells(&species, &[(0, 0)]);
        organism.species = id;

        organism.mutate(&mut registry, Tick(9), &mut rng);

        assert_ne!(organism.species, id);
        let next = registry.get(organism.species).expect("mutated species");
        assert_eq!(next.emerged_at, Tick(9));
        assert_eq!(next.count, 1);
        // The original genome is untouched.
        assert_eq!(registry.get(id).map(|s| s.points), Some(0));
    }

    #[test]
    fn wandering_moves_by_mobility_over_mass() {
        let mut rng = seeded();
        let species = single_type_species();
        let mut organism = organism_with_cells(&species, &[(0, 0)]);
        organism.position = Position { x: 50.0, y: 50.0 };

        organism.wander(&species, &mut rng);

        // One cell: mobility 100, mass 100, displacement 10.
        let dx = organism.position.x - 50.0;
        let dy = organism.position.y - 50.0;
        let distance = (dx * dx + dy * dy).sqrt();
        assert!((distance - 10.0).abs() < 1e-9);
    }

    #[test]
    fn dead_organisms_do_not_step() {
        let mut rng = seeded();
        let env = Environment::new(100, 100);
        let mut registry = SpeciesRegistry::new();
        let id = registry.register(single_type_species(), Tick(0));
        let species = registry.get(id).expect("registered species").clone();
        let mut organism = organism_with_cells(&species, &[(0, 0)]);
        organism.species = id;
        organism.die(Tick(1));
        let before = organism.clone();
        let ctx = context(&env, Tick(2), true);

        let spawned = organism.step(&ctx, &mut registry, &mut rng);

        assert!(spawned.is_empty());
        assert_eq!(organism, before);
    }
}
