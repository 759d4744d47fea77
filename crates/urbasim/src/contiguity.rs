use crate::config::ContiguityConfig;
use crate::grid::{Cell, Grid};
use itertools::iproduct;

/// Mean of the built flags over the odd-sized window centered on `cell`.
/// `None` when the window does not fit inside the grid.
pub fn local_built_fraction(built: &Grid<bool>, (row, col): Cell, window: usize) -> Option<f64> {
    let half = window / 2;
    if window == 0
        || row < half
        || col < half
        || row + half >= built.rows()
        || col + half >= built.cols()
    {
        return None;
    }

    let built_count = iproduct!(row - half..=row + half, col - half..=col + half)
        .filter(|&c| built[c])
        .count();
    Some(built_count as f64 / (window * window) as f64)
}

/// Gate applied to cells that are not built yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContiguityGate {
    enabled: bool,
    window: usize,
    min: f64,
    max: f64,
}

impl ContiguityGate {
    pub fn new(enabled: bool, window: usize, min: f64, max: f64) -> Self {
        Self {
            enabled,
            window,
            min,
            max,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 1, 0.0, 1.0)
    }

    /// A new cell opens only when its neighbourhood fraction lies strictly
    /// between the band limits.
    pub fn accepts(&self, built: &Grid<bool>, cell: Cell) -> bool {
        if !self.enabled {
            return true;
        }
        local_built_fraction(built, cell, self.window)
            .is_some_and(|fraction| self.min < fraction && fraction < self.max)
    }
}

impl From<&ContiguityConfig> for ContiguityGate {
    fn from(cfg: &ContiguityConfig) -> Self {
        Self::new(cfg.enabled, cfg.window, cfg.min, cfg.max)
    }
}
