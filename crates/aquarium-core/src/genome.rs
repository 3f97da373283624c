//! Genetics: cell types, species genomes, and the species registry.
//!
//! A genome is a list of [`CellType`]s plus a `produces` adjacency list
//! saying which types each type can bud. Raw gene values are investment
//! points; the derived getters translate them into simulation quantities.
//! Mutation spends points and is re-rolled until the genome validates and
//! the invested total covers the budget.

use std::fmt;

use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};

use crate::Tick;

new_key_type! {
    /// Stable handle into the [`SpeciesRegistry`]. Organisms and summaries
    /// hold these instead of references, so a species can be retired
    /// without dangling pointers.
    pub struct SpeciesId;
}

/// Food source a cell type can live off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Diet {
    Herbivore,
    Funghi,
}

impl fmt::Display for Diet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diet::Herbivore => write!(f, "herbivore"),
            Diet::Funghi => write!(f, "funghi"),
        }
    }
}

/// One heritable cell blueprint. Fields hold raw gene investments; use the
/// derived getters for gameplay values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellType {
    pub id: u32,
    pub diets: Vec<Diet>,
    /// Point budget this type has earned through mutation.
    pub points: i32,
    pub size: i32,
    pub herbivore: i32,
    pub carnivore: i32,
    pub funghi: i32,
    pub time_to_die: i32,
    pub waste_tolerance: i32,
    pub max_satiation: i32,
    pub consumption: i32,
    pub max_capacity: i32,
    pub connects: i32,
    pub procreation_cd: i32,
    pub mobility: i32,
}

impl CellType {
    #[must_use]
    pub fn body_size(&self) -> i32 {
        self.size + 10
    }

    /// Types with enough connectivity bud adjacent cells; the rest bud
    /// detached offspring at distance two.
    #[must_use]
    pub fn can_connect(&self) -> bool {
        self.connects >= 10
    }

    #[must_use]
    pub fn mobility_rate(&self) -> i32 {
        self.mobility * 5
    }

    #[must_use]
    pub fn cooldown(&self) -> i32 {
        10 - self.procreation_cd / 10
    }

    #[must_use]
    pub fn tolerance(&self) -> f64 {
        f64::from(self.waste_tolerance) / 4.0
    }

    #[must_use]
    pub fn satiation_cap(&self) -> i32 {
        350 - self.max_satiation
    }

    #[must_use]
    pub fn lifespan(&self) -> i32 {
        40 + self.time_to_die / 5
    }

    #[must_use]
    pub fn max_hp(&self) -> i32 {
        self.body_size() * 23
    }

    #[must_use]
    pub fn mass(&self) -> i32 {
        self.body_size() * 10
    }

    /// Food burned per tick to stay alive. Larger, hungrier bodies with
    /// low consumption investment burn more.
    #[must_use]
    pub fn upkeep(&self) -> i32 {
        (self.satiation_cap() as f32 / 20.0
            * self.body_size() as f32 / 10.0
            * (10 - self.consumption) as f32 / 10.0) as i32
    }

    /// Waste a funghi-feeding type filters out of the water at the given
    /// local toxicity.
    #[must_use]
    pub fn processed_waste(&self, toxicity: f64) -> f64 {
        if toxicity > 0.0 && self.funghi > 0 {
            let waste = f64::from(self.funghi) * 0.75 * (toxicity - 0.5);
            if waste > 0.0 {
                return waste;
            }
        }
        0.0
    }

    /// Net waste emitted per tick by a living cell of this type.
    #[must_use]
    pub fn waste(&self, toxicity: f64) -> f64 {
        let mut waste = f64::from(self.body_size());
        if toxicity > 0.0 {
            waste -= self.processed_waste(toxicity);
        }
        waste / 6e8
    }

    /// Waste released when a corpse of this type decays.
    #[must_use]
    pub fn waste_after_death(&self) -> f64 {
        f64::from(self.body_size()) / 6e8
    }

    #[must_use]
    pub fn invested_points(&self) -> i32 {
        self.max_capacity
            + self.size
            + self.herbivore
            + self.funghi
            + self.time_to_die
            + self.max_satiation
            + self.consumption
            + self.procreation_cd
            + self.waste_tolerance
            + self.mobility
            + self.connects
    }

    #[must_use]
    pub fn has_diet(&self, diet: Diet) -> bool {
        self.diets.contains(&diet)
    }

    /// Diet investment weighted by how many food sources the type keeps
    /// open. Used to cap runaway diet stacking during mutation.
    #[must_use]
    pub fn diet_points(&self) -> i32 {
        let mut diets = self.diets.len() as i32;
        let mut diet_points = 0;
        if self.carnivore > 0 {
            diets += 1;
            diet_points += self.carnivore;
        }
        if self.herbivore > 0 {
            diets += 1;
            diet_points += self.herbivore;
        }
        if self.funghi > 0 {
            diets += 1;
            diet_points += self.funghi;
        }
        diet_points * diets
    }

    /// Clamps out-of-range genes in place. Returns true when the genome
    /// was already valid; at most one gene is repaired per call.
    pub fn validate(&mut self) -> bool {
        if self.carnivore < 0 {
            self.carnivore = 0;
            return false;
        }
        if self.herbivore < 0 {
            self.herbivore = 0;
            return false;
        }
        if self.funghi < 0 {
            self.funghi = 0;
            return false;
        }
        if self.consumption > 4 {
            self.consumption = 4;
            return false;
        }
        if self.time_to_die > 600 {
            self.time_to_die = 600;
            return false;
        }
        if self.procreation_cd > 50 {
            self.procreation_cd = 50;
            return false;
        }
        if self.max_satiation > 250 {
            self.max_satiation = 250;
            return false;
        }
        if self.size < -3 {
            self.size = -3;
            return false;
        }
        if self.waste_tolerance < 0 {
            self.waste_tolerance = 0;
            return false;
        }
        if self.mobility < 0 {
            self.mobility = 0;
            return false;
        }
        if self.connects > 10 {
            self.connects = 10;
            return false;
        }
        true
    }

    /// Reshuffles which food sources the type lives off: a single diet
    /// usually switches outright, rarely splits its investment in two;
    /// mixed diets collapse back into one.
    pub fn mutate_diet(&mut self, rng: &mut SmallRng) {
        if self.diets.len() == 1 {
            if rng.random::<f32>() > 0.9 {
                if self.has_diet(Diet::Herbivore) {
                    self.herbivore /= 2;
                    self.funghi = self.herbivore;
                } else if self.has_diet(Diet::Funghi) {
                    self.funghi /= 2;
                    self.herbivore = self.funghi;
                }
                self.diets = vec![Diet::Herbivore, Diet::Funghi];
            } else if self.has_diet(Diet::Herbivore) {
                self.diets = vec![Diet::Funghi];
                self.funghi = self.herbivore;
                self.herbivore = 0;
            } else if self.has_diet(Diet::Funghi) {
                self.diets = vec![Diet::Herbivore];
                self.herbivore = self.funghi;
                self.funghi = 0;
            }
        } else if rng.random::<f32>() > 0.5 {
            self.herbivore += self.funghi;
            self.funghi = 0;
            self.diets = vec![Diet::Herbivore];
        } else {
            self.funghi += self.herbivore;
            self.herbivore = 0;
            self.diets = vec![Diet::Funghi];
        }
    }

    /// Nudges one random gene and re-rolls until the result validates and
    /// its invested points cover the budget. Diet genes move in steps of
    /// four; diet increases are rejected once diet investment saturates.
    #[must_use]
    pub fn mutate_once(&self, rng: &mut SmallRng) -> CellType {
        let mut next = self.clone();
        loop {
            let mut attr = rng.random::<f64>();
            let value: i32 = if rng.random::<f32>() > 0.9 { -1 } else { 1 };

            while attr < 0.21 && next.diet_points() >= 100 && value > 0 {
                attr = rng.random::<f64>();
            }

            if attr < 0.21 {
                let delta = value * 4;
                if self.diets.len() > 1 {
                    if rng.random::<f32>() > 0.5 {
                        next.herbivore += delta;
                    } else {
                        next.funghi += delta;
                    }
                } else {
                    if self.has_diet(Diet::Herbivore) {
                        next.herbivore += delta;
                    }
                    if self.has_diet(Diet::Funghi) {
                        next.funghi += delta;
                    }
                }
            } else if attr < 0.35 {
                next.max_capacity += value;
            } else if attr < 0.41 {
                next.connects += value;
            } else if attr < 0.61 {
                next.consumption += value;
            } else if attr < 0.63 {
                next.time_to_die += value;
            } else if attr < 0.73 {
                next.procreation_cd += value;
            } else if attr < 0.85 {
                next.waste_tolerance += value;
            } else if attr < 0.90 {
                next.max_satiation -= value;
            } else if attr < 0.95 {
                next.mobility += value;
            } else {
                next.size += value;
            }

            if next.validate() && next.invested_points() >= next.points {
                return next;
            }
        }
    }

    /// Full mutation step: one point of budget, then either a rare diet
    /// reshuffle with a burst of gene nudges, or a short geometric run of
    /// single nudges.
    #[must_use]
    pub fn mutate(&self, rng: &mut SmallRng) -> CellType {
        let mut next = self.clone();
        next.points += 1;

        if rng.random::<f32>() > 0.95 {
            next.mutate_diet(rng);
            let nudges = rng.random_range(10..20);
            for _ in 0..nudges {
                next = next.mutate_once(rng);
            }
        } else {
            loop {
                next = next.mutate_once(rng);
                if rng.random::<f32>() <= 0.5 {
                    break;
                }
            }
        }
        next
    }
}

/// A genome shared by every organism of the species, plus census data
/// maintained by the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub id: SpeciesId,
    pub emerged_at: Tick,
    pub extinct: bool,
    pub count: usize,
    pub points: i32,
    pub starting_points: i32,
    pub types: Vec<CellType>,
    pub produces: Vec<Vec<usize>>,
}

impl Species {
    /// Display name: dominant diet, emergence tick, and registry slot.
    #[must_use]
    pub fn name(&self) -> String {
        let (herbivore, funghi) = self
            .types
            .iter()
            .fold((0, 0), |(h, f), t| (h + t.herbivore, f + t.funghi));
        let diet = if herbivore > funghi { "H" } else { "F" };
        format!("{diet}-{}-{:?}", self.emerged_at.0, self.id)
    }

    #[must_use]
    pub fn type_index(&self, type_id: u32) -> Option<usize> {
        self.types.iter().position(|t| t.id == type_id)
    }

    #[must_use]
    pub fn type_by_id(&self, type_id: u32) -> Option<&CellType> {
        self.types.iter().find(|t| t.id == type_id)
    }

    /// Buddable successor types for the given type id.
    #[must_use]
    pub fn produced_by(&self, type_id: u32) -> &[usize] {
        match self.type_index(type_id) {
            Some(index) => &self.produces[index],
            None => &[],
        }
    }

    /// Derives a mutated genome: one random type is nudged, and once the
    /// species has banked thirty points over its starting budget per
    /// existing type, a connecting tail type buds a brand new cell type
    /// wired into `produces`.
    #[must_use]
    pub fn mutate(&self, rng: &mut SmallRng) -> Species {
        let mut next = self.clone();
        next.points += 1;

        let index = rng.random_range(0..next.types.len());
        next.types[index] = next.types[index].mutate(rng);

        let allowed_types = (next.points - next.starting_points) / 30 + 1;
        let connects = next.types.last().is_some_and(CellType::can_connect);
        if allowed_types > next.types.len() as i32 && connects {
            let mut fresh = next.types[index].clone();
            fresh.id = next.types.iter().map(|t| t.id).max().unwrap_or(0) + 1;
            fresh = fresh.mutate(rng);

            let new_index = next.types.len();
            next.produces.push(Vec::new());
            next.produces[index].push(new_index);
            next.types.push(fresh);
        }
        next
    }
}

/// Owns every living species. Keys are stable for the lifetime of the
/// simulation even as extinct species are dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeciesRegistry {
    species: SlotMap<SpeciesId, Species>,
}

impl SpeciesRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a species, stamping its id, emergence tick, and an
    /// initial census of one.
    pub fn register(&mut self, species: Species, tick: Tick) -> SpeciesId {
        self.species.insert_with_key(|key| {
            let mut entry = species;
            entry.id = key;
            entry.emerged_at = tick;
            entry.count = 1;
            entry.extinct = false;
            entry
        })
    }

    #[must_use]
    pub fn get(&self, id: SpeciesId) -> Option<&Species> {
        self.species.get(id)
    }

    #[must_use]
    pub fn get_mut(&mut self, id: SpeciesId) -> Option<&mut Species> {
        self.species.get_mut(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.species.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SpeciesId, &Species)> {
        self.species.iter()
    }

    /// Applies a fresh census: species with no remaining organisms are
    /// marked extinct and dropped from the registry.
    pub fn apply_census(&mut self, counts: &std::collections::HashMap<SpeciesId, usize>) {
        self.species.retain(|id, species| {
            species.count = counts.get(&id).copied().unwrap_or(0);
            species.extinct = species.count == 0;
            !species.extinct
        });
    }

    /// Clones every registered species, for summaries.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Species> {
        self.species.values().cloned().collect()
    }
}

/// Starter genome living off light.
#[must_use]
pub fn random_herbivore(rng: &mut SmallRng) -> Species {
    let mut cell_type = CellType {
        id: 0,
        diets: vec![Diet::Herbivore],
        points: 0,
        size: rng.random_range(0..20),
        herbivore: rng.random_range(5..25),
        carnivore: 0,
        funghi: 0,
        time_to_die: 30,
        waste_tolerance: rng.random_range(16..64),
        max_satiation: rng.random_range(0..100),
        consumption: rng.random_range(0..=4),
        max_capacity: rng.random_range(0..30),
        connects: rng.random_range(0..=10),
        procreation_cd: rng.random_range(8..12),
        mobility: 20,
    };
    cell_type.points = cell_type.invested_points();
    species_from_type(cell_type)
}

/// Starter genome living off dissolved waste. Tolerates dirtier water
/// than the herbivore starter.
#[must_use]
pub fn random_funghi(rng: &mut SmallRng) -> Species {
    let mut cell_type = CellType {
        id: 0,
        diets: vec![Diet::Funghi],
        points: 0,
        size: rng.random_range(0..20),
        herbivore: 0,
        carnivore: 0,
        funghi: rng.random_range(5..25),
        time_to_die: 30,
        waste_tolerance: rng.random_range(32..96),
        max_satiation: rng.random_range(0..100),
        consumption: rng.random_range(0..=4),
        max_capacity: rng.random_range(0..30),
        connects: rng.random_range(0..=10),
        procreation_cd: rng.random_range(8..12),
        mobility: 20,
    };
    cell_type.points = cell_type.invested_points();
    species_from_type(cell_type)
}

fn species_from_type(cell_type: CellType) -> Species {
    let points = cell_type.points;
    Species {
        id: SpeciesId::default(),
        emerged_at: Tick(0),
        extinct: false,
        count: 0,
        points,
        starting_points: points,
        types: vec![cell_type],
        produces: vec![vec![0]],
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;

    use super::*;

    fn seeded() -> SmallRng {
        SmallRng::seed_from_u64(0x5eed)
    }

    fn starter_type() -> CellType {
        let mut rng = seeded();
        random_herbivore(&mut rng).types[0].clone()
    }

    #[test]
    fn validate_is_a_noop_on_valid_genomes() {
        let mut cell_type = starter_type();
        let before = cell_type.clone();
        assert!(cell_type.validate());
        assert_eq!(cell_type, before);
    }

    #[test]
    fn validate_repairs_out_of_range_genes() {
        let mut cell_type = starter_type();
        cell_type.consumption = 10;
        cell_type.connects = 99;
        while !cell_type.validate() {}
        assert_eq!(cell_type.consumption, 4);
        assert_eq!(cell_type.connects, 10);
    }

    #[test]
    fn mutations_stay_within_validated_bounds() {
        let mut rng = seeded();
        let mut cell_type = starter_type();
        for _ in 0..200 {
            cell_type = cell_type.mutate(&mut rng);
            assert!(cell_type.consumption <= 4);
            assert!(cell_type.time_to_die <= 600);
            assert!(cell_type.procreation_cd <= 50);
            assert!(cell_type.max_satiation <= 250);
            assert!(cell_type.size >= -3);
            assert!(cell_type.waste_tolerance >= 0);
            assert!(cell_type.mobility >= 0);
            assert!(cell_type.connects <= 10);
            assert!(cell_type.herbivore >= 0);
            assert!(cell_type.funghi >= 0);
            assert!(cell_type.invested_points() >= cell_type.points);
        }
    }

    #[test]
    fn mutation_leaves_the_source_untouched() {
        let mut rng = seeded();
        let cell_type = starter_type();
        let before = cell_type.clone();
        let mut mutated = cell_type.mutate(&mut rng);
        mutated.mutate_diet(&mut rng);
        assert_eq!(cell_type, before);
    }

    #[test]
    fn diet_reshuffle_preserves_total_investment_on_switch() {
        let mut rng = seeded();
        let mut cell_type = starter_type();
        let invested = cell_type.herbivore;
        // A herbivore either splits in two or switches to funghi; either
        // way nothing is lost beyond integer halving.
        cell_type.mutate_diet(&mut rng);
        assert!(cell_type.herbivore + cell_type.funghi >= invested - 1);
    }

    #[test]
    fn species_buds_a_new_type_once_points_allow() {
        let mut rng = seeded();
        let mut species = random_herbivore(&mut rng);
        species.types[0].connects = 10;
        species.starting_points = species.points;
        species.points += 59;

        let next = species.mutate(&mut rng);
        assert_eq!(next.types.len(), 2);
        assert_eq!(next.produces.len(), 2);
        assert!(next.produces[0].contains(&1));
        assert_ne!(next.types[1].id, next.types[0].id);
    }

    #[test]
    fn species_without_connecting_tail_stays_single_typed() {
        let mut rng = seeded();
        let mut species = random_herbivore(&mut rng);
        species.types[0].connects = 0;
        species.points += 100;

        let next = species.mutate(&mut rng);
        assert_eq!(next.types.len(), 1);
    }

    #[test]
    fn registry_census_drops_empty_species() {
        let mut rng = seeded();
        let mut registry = SpeciesRegistry::new();
        let kept = registry.register(random_herbivore(&mut rng), Tick(1));
        let dropped = registry.register(random_funghi(&mut rng), Tick(1));

        let mut counts = HashMap::new();
        counts.insert(kept, 3usize);
        registry.apply_census(&counts);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(kept).map(|s| s.count), Some(3));
        assert!(registry.get(dropped).is_none());
    }

    #[test]
    fn species_name_reflects_dominant_diet() {
        let mut rng = seeded();
        let mut registry = SpeciesRegistry::new();
        let herb = registry.register(random_herbivore(&mut rng), Tick(42));
        let funghi = registry.register(random_funghi(&mut rng), Tick(42));

        let herb = registry.get(herb).expect("registered herbivore");
        let funghi = registry.get(funghi).expect("registered funghi");
        assert!(herb.name().starts_with("H-42-"));
        assert!(funghi.name().starts_with("F-42-"));
    }
}
