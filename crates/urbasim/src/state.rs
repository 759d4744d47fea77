//! Grid store: read-only layers and the mutable urbanization state of a run.

use crate::grid::{Cell, Grid};

/// Layers that stay fixed for the whole run.
#[derive(Debug, Clone)]
pub struct Layers {
    pub cell_size: f64,
    pub projection: Option<String>,
    pub district: Grid<u32>,
    /// Base interest in [0, 1], already zero on statically excluded cells.
    pub interest: Grid<f64>,
    /// Historical artificialization ratio in [0, 1].
    pub artif_ratio: Grid<f64>,
    pub zoning_priority: Grid<bool>,
    pub ecology: Grid<f64>,
}

impl Layers {
    pub fn shape(&self) -> (usize, usize) {
        self.district.shape()
    }

    /// Cell area in m².
    pub fn cell_area(&self) -> f64 {
        self.cell_size * self.cell_size
    }
}

/// Mutable grids owned by the run.
#[derive(Debug, Clone, PartialEq)]
pub struct UrbanState {
    /// Ground (m²) still buildable.
    pub capacity: Grid<u32>,
    pub built: Grid<bool>,
    pub ground: Grid<u32>,
    pub ground_res: Grid<u32>,
    pub floor: Grid<u32>,
    pub population: Grid<u32>,
    /// Cells first built during the run.
    pub expansion: Grid<bool>,
    /// Cells densified by the yearly forced pass.
    pub forced_densification: Grid<bool>,
    /// Cells of the existing stock densified in the final year.
    pub old_densification: Grid<bool>,
}

/// Totals committed at year-close.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CommitStats {
    pub ground: u64,
    pub floor: u64,
    pub population: u64,
    pub new_cells: usize,
    /// Σ new ground ÷ cell area × (1 − ecology).
    pub impact: f64,
}

impl UrbanState {
    /// Empty state with the given capacity; no baseline stock.
    pub fn with_capacity(capacity: Grid<u32>) -> Self {
        let (rows, cols) = capacity.shape();
        Self {
            capacity,
            built: Grid::new(rows, cols),
            ground: Grid::new(rows, cols),
            ground_res: Grid::new(rows, cols),
            floor: Grid::new(rows, cols),
            population: Grid::new(rows, cols),
            expansion: Grid::new(rows, cols),
            forced_densification: Grid::new(rows, cols),
            old_densification: Grid::new(rows, cols),
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.capacity.shape()
    }

    /// Folds a year's provisional allocations into the persistent grids.
    pub fn commit(&mut self, provisional: &Provisional, layers: &Layers) -> CommitStats {
        let mut stats = CommitStats::default();
        let cell_area = layers.cell_area();

        for i in 0..self.capacity.len() {
            let cell = self.capacity.cell_of(i);
            let ground = provisional.ground[cell];

            if provisional.built[cell] && !self.built[cell] {
                self.built[cell] = true;
                self.expansion[cell] = true;
                stats.new_cells += 1;
            }
            if provisional.forced[cell] {
                self.forced_densification[cell] = true;
            }
            if provisional.old[cell] {
                self.old_densification[cell] = true;
            }

            self.capacity[cell] = self.capacity[cell].saturating_sub(ground);
            self.ground[cell] = self.ground[cell].saturating_add(ground);
            self.ground_res[cell] = self.ground_res[cell].saturating_add(provisional.ground_res[cell]);
            self.floor[cell] = self.floor[cell].saturating_add(provisional.floor[cell]);
            self.population[cell] = self.population[cell].saturating_add(provisional.population[cell]);

            stats.ground += u64::from(ground);
            stats.floor += u64::from(provisional.floor[cell]);
            stats.population += u64::from(provisional.population[cell]);
            if ground > 0 && cell_area > 0.0 {
                stats.impact += f64::from(ground) / cell_area * (1.0 - layers.ecology[cell]);
            }
        }
        stats
    }

    /// People living on cells first built during the run.
    pub fn expansion_population(&self) -> u64 {
        self.expansion
            .cells()
            .filter(|&(_, new)| new)
            .map(|(cell, _)| u64::from(self.population[cell]))
            .sum()
    }

    /// Built ground over cell area.
    pub fn artificialization_rate(&self, cell_area: f64) -> Grid<f64> {
        self.ground.map(|g| {
            if cell_area > 0.0 {
                f64::from(g) / cell_area
            } else {
                0.0
            }
        })
    }
}

/// Allocations of the year in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct Provisional {
    pub built: Grid<bool>,
    pub ground: Grid<u32>,
    pub ground_res: Grid<u32>,
    pub floor: Grid<u32>,
    pub population: Grid<u32>,
    pub forced: Grid<bool>,
    pub old: Grid<bool>,
}

impl Provisional {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            built: Grid::new(rows, cols),
            ground: Grid::new(rows, cols),
            ground_res: Grid::new(rows, cols),
            floor: Grid::new(rows, cols),
            population: Grid::new(rows, cols),
            forced: Grid::new(rows, cols),
            old: Grid::new(rows, cols),
        }
    }

    /// Persistent built flags with this year's cells OR'd in.
    pub fn reference_built(&self, state: &UrbanState) -> Grid<bool> {
        state.built.zip_map(&self.built, |a, b| a || b)
    }

    pub fn remaining_capacity(&self, state: &UrbanState, cell: Cell) -> u32 {
        state.capacity[cell].saturating_sub(self.ground[cell])
    }
}
