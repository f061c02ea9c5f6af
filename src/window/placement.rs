//! Placement tokens - where an item shows up on screen
//!
//! Best-effort spread only: coordinates are random, the central band is kept
//! clear and a few attempts are made to stay away from items already on the
//! chosen side. Overlaps are tolerated.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// Normalized display position, both axes in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub side: Side,
    pub x: f32,
    pub y: f32,
}

impl Placement {
    fn distance(&self, other: &Placement) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Horizontal band (fraction of width) reserved for the central visual
const CENTER_BAND: (f32, f32) = (0.35, 0.65);

/// Outer margins so items never touch the edges
const EDGE_MARGIN: f32 = 0.05;

/// Candidates closer than this to an occupied slot are re-rolled
const MIN_SPACING: f32 = 0.12;

const MAX_ATTEMPTS: usize = 8;

pub struct PlacementPolicy {
    rng: StdRng,
}

impl PlacementPolicy {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic placements for tests and replays
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Choose a placement given the placements of currently active items
    ///
    /// The side with fewer active items wins; ties are broken randomly.
    pub fn place(&mut self, occupied: &[Placement]) -> Placement {
        let left = occupied.iter().filter(|p| p.side == Side::Left).count();
        let right = occupied.len() - left;

        let side = match left.cmp(&right) {
            std::cmp::Ordering::Less => Side::Left,
            std::cmp::Ordering::Greater => Side::Right,
            std::cmp::Ordering::Equal => {
                if self.rng.gen_bool(0.5) {
                    Side::Left
                } else {
                    Side::Right
                }
            }
        };

        let same_side: Vec<&Placement> = occupied.iter().filter(|p| p.side == side).collect();

        let mut candidate = self.candidate(side);
        for _ in 1..MAX_ATTEMPTS {
            if same_side.iter().all(|p| p.distance(&candidate) >= MIN_SPACING) {
                break;
            }
            candidate = self.candidate(side);
        }
        candidate
    }

    fn candidate(&mut self, side: Side) -> Placement {
        let (lo, hi) = match side {
            Side::Left => (EDGE_MARGIN, CENTER_BAND.0),
            Side::Right => (CENTER_BAND.1, 1.0 - EDGE_MARGIN),
        };

        Placement {
            side,
            x: self.rng.gen_range(lo..hi),
            y: self.rng.gen_range(EDGE_MARGIN..1.0 - EDGE_MARGIN),
        }
    }
}

impl Default for PlacementPolicy {
    fn default() -> Self {
        Self::new()
    }
}
