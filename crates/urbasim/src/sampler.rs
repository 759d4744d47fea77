//! Weighted draws: cells from a weight raster, values from a distribution.
//!
//! Every random decision of a run goes through [`Sampler`], which owns the
//! generator. Production seeds a `ChaCha8Rng` once; tests plug in a
//! fixed-sequence generator.

use crate::distribution::Distribution;
use crate::grid::{Cell, Grid};
use rand::distributions::{Distribution as _, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Draws on the first row or column are not allocation targets.
#[inline]
pub fn is_sentinel((row, col): Cell) -> bool {
    row == 0 || col == 0
}

#[derive(Debug, Clone)]
pub struct Sampler<R> {
    rng: R,
    heat: Grid<u32>,
}

impl Sampler<ChaCha8Rng> {
    /// Deterministic sampler for a `rows x cols` run.
    pub fn seeded(seed: u64, rows: usize, cols: usize) -> Self {
        Self::new(ChaCha8Rng::seed_from_u64(seed), rows, cols)
    }
}

impl<R: Rng> Sampler<R> {
    pub fn new(rng: R, rows: usize, cols: usize) -> Self {
        Self {
            rng,
            heat: Grid::new(rows, cols),
        }
    }

    /// Draws a cell with probability proportional to its weight and records it
    /// in the heat map. `None` when no cell carries a positive weight.
    pub fn choose_cell(&mut self, weights: &Grid<f64>) -> Option<Cell> {
        let index = WeightedIndex::new(weights.iter().map(|&w| w.max(0.0))).ok()?;
        let cell = weights.cell_of(index.sample(&mut self.rng));
        self.heat[cell] += 1;
        Some(cell)
    }

    /// Draws a value proportional to its weight; 0 for empty or zero-sum tables.
    pub fn choose_value(&mut self, distribution: &Distribution) -> u32 {
        if distribution.is_degenerate() {
            return 0;
        }
        let entries = distribution.entries();
        match WeightedIndex::new(entries.iter().map(|&(_, w)| w)) {
            Ok(index) => entries[index.sample(&mut self.rng)].0,
            Err(_) => 0,
        }
    }

    pub fn heat_map(&self) -> &Grid<u32> {
        &self.heat
    }

    pub fn into_heat_map(self) -> Grid<u32> {
        self.heat
    }
}
