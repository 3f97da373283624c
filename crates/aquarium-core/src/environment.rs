//! The water column: a 2-D world with depth-dependent light and a single
//! well-mixed toxicity level.

use serde::{Deserialize, Serialize};

use crate::{Position, Tick};

/// Shared world state outside any organism.
///
/// Light falls off with depth and follows a day/night cycle; toxicity is a
/// single scalar for the whole column, scaled by depth when sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    toxicity: f64,
    width: u32,
    height: u32,
}

impl Environment {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            toxicity: 0.0,
            width,
            height,
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn toxicity(&self) -> f64 {
        self.toxicity
    }

    /// Adds waste to the column. The total never goes below zero.
    pub fn change_toxicity(&mut self, delta: f64) {
        self.toxicity = (self.toxicity + delta).max(0.0);
    }

    /// Toxicity sampled at a depth: heavier water near the bottom carries
    /// more waste, from `toxicity/2` at the surface up to `toxicity` at the
    /// floor.
    #[must_use]
    pub fn toxicity_at_depth(&self, depth: f64) -> f64 {
        self.toxicity / 2.0 * (depth / f64::from(self.height) + 1.0)
    }

    /// Light level at a depth for the given tick.
    ///
    /// Ten ticks make an hour and 24 hours make a day; light peaks at
    /// midnight-distance from hour 12 and attenuates linearly with depth,
    /// with a 0.2 ambient floor.
    #[must_use]
    pub fn light_at_depth(&self, depth: f64, tick: Tick) -> f64 {
        let hour = ((tick.0 / 10) % 24) as f64;
        (hour - 12.0).abs() * (1.0 - depth / f64::from(self.height)) * 0.8 + 0.2
    }

    /// Whether a world position lies inside the column.
    #[must_use]
    pub fn contains(&self, position: Position) -> bool {
        position.x >= 0.0
            && position.x <= f64::from(self.width)
            && position.y >= 0.0
            && position.y <= f64::from(self.height)
    }
}
