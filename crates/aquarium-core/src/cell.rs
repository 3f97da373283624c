//! A single cell inside an organism.
//!
//! Cells live on an organism-local integer grid; world coordinates are the
//! organism position plus the local offset. A dead cell stays in place as a
//! corpse until the simulation prunes it into waste.

use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::environment::Environment;
use crate::genome::CellType;
use crate::{GridPoint, Position, Tick};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: u32,
    pub position: GridPoint,
    /// Id of this cell's [`CellType`] within its species genome.
    pub cell_type: u32,
    pub alive: bool,
    pub hp: i32,
    pub born_at: Tick,
    pub died_at: Option<Tick>,
    pub procreated_at: Option<Tick>,
    pub satiation: i32,
    pub capacity: i32,
}

impl Cell {
    #[must_use]
    pub fn new(id: u32, cell_type: &CellType, position: GridPoint, tick: Tick) -> Self {
        Self {
            id,
            position,
            cell_type: cell_type.id,
            alive: true,
            hp: cell_type.max_hp(),
            born_at: tick,
            died_at: None,
            procreated_at: None,
            satiation: 20,
            capacity: 0,
        }
    }

    #[must_use]
    pub fn age(&self, tick: Tick) -> u64 {
        tick.0.saturating_sub(self.born_at.0)
    }

    #[must_use]
    pub fn left_to_full(&self, cell_type: &CellType) -> i32 {
        (cell_type.satiation_cap() - self.satiation).max(0)
    }

    #[must_use]
    pub fn is_full(&self, cell_type: &CellType) -> bool {
        self.satiation >= cell_type.satiation_cap()
    }

    /// Food this cell contributes to the shared pool this tick: light
    /// photosynthesis for herbivores plus filtered waste for funghi,
    /// both sampled at the cell's world depth.
    #[must_use]
    pub fn food_produced(
        &self,
        cell_type: &CellType,
        env: &Environment,
        tick: Tick,
        organism_depth: f64,
    ) -> i32 {
        let depth = organism_depth + f64::from(self.position.y);
        let mut food = 0;
        if cell_type.herbivore > 0 {
            food += (f64::from(cell_type.herbivore) * env.light_at_depth(depth, tick)) as i32;
        }
        if env.toxicity() > 0.0 {
            food += cell_type.processed_waste(env.toxicity_at_depth(depth)) as i32;
        }
        food.max(0)
    }

    /// Burns upkeep out of satiation; returns the amount burned so the
    /// organism can try to refund it from the pool.
    pub fn consume(&mut self, cell_type: &CellType) -> i32 {
        let cost = cell_type.upkeep();
        self.satiation -= cost;
        cost
    }

    /// Absorbs food up to the satiation cap; returns the amount taken.
    pub fn eat(&mut self, cell_type: &CellType, food: i32) -> i32 {
        let absorbed = food.clamp(0, self.left_to_full(cell_type));
        self.satiation += absorbed;
        absorbed
    }

    /// Banks surplus food into internal storage; returns the amount kept.
    pub fn store(&mut self, cell_type: &CellType, food: i32) -> i32 {
        let free = (cell_type.max_capacity - self.capacity).max(0);
        let stored = food.clamp(0, free);
        self.capacity += stored;
        stored
    }

    /// Full and off cooldown.
    #[must_use]
    pub fn can_procreate(&self, cell_type: &CellType, tick: Tick) -> bool {
        if !self.is_full(cell_type) {
            return false;
        }
        match self.procreated_at {
            None => true,
            Some(at) => tick.0.saturating_sub(at.0) > cell_type.cooldown() as u64,
        }
    }

    /// Buds a child of a random candidate type, splitting this cell's
    /// satiation with it. The caller assigns the child's id and position.
    pub fn procreate(
        &mut self,
        tick: Tick,
        candidates: &[&CellType],
        rng: &mut SmallRng,
    ) -> Cell {
        let half = self.satiation / 2;
        self.satiation = half;
        self.procreated_at = Some(tick);

        let child_type = candidates[rng.random_range(0..candidates.len())];
        Cell {
            id: 0,
            position: GridPoint::default(),
            cell_type: child_type.id,
            alive: true,
            hp: child_type.max_hp(),
            born_at: tick,
            died_at: None,
            procreated_at: Some(tick),
            satiation: half,
            capacity: 0,
        }
    }

    /// Deterministic death check: old age, intolerable local toxicity,
    /// no hit points, drifting out of the world, or starvation past the
    /// first tick of life.
    #[must_use]
    pub fn should_die(
        &self,
        cell_type: &CellType,
        env: &Environment,
        tick: Tick,
        organism_position: Position,
    ) -> bool {
        let age = self.age(tick);
        if age >= cell_type.lifespan() as u64 {
            return true;
        }
        let world = organism_position.offset(self.position);
        if env.toxicity_at_depth(world.y) > cell_type.tolerance() {
            return true;
        }
        if self.hp <= 0 {
            return true;
        }
        if !env.contains(world) {
            return true;
        }
        self.satiation <= 0 && age > 0
    }

    pub fn die(&mut self, tick: Tick) {
        if self.alive {
            self.alive = false;
            self.died_at = Some(tick);
        }
    }
}
