//! Interest weights: the static base grid built once at setup and the
//! yearly eligibility mask derived from it.

use crate::grid::Grid;
use crate::state::{Layers, UrbanState};

/// Weighted sum of amenity layers, scaled to [0, 1] by its maximum.
/// Without layers every cell is equally attractive.
pub fn combine_amenities(layers: &[(f64, &Grid<f64>)], rows: usize, cols: usize) -> Grid<f64> {
    if layers.is_empty() {
        return Grid::filled(rows, cols, 1.0);
    }

    let mut sum: Grid<f64> = Grid::new(rows, cols);
    for &(weight, layer) in layers {
        sum = sum.zip_map(layer, |acc, v| acc + weight * v);
    }
    let max = sum.max();
    if max <= 0.0 {
        return Grid::new(rows, cols);
    }
    sum.map(|v| (v / max).clamp(0.0, 1.0))
}

/// Zeroes cells outside any district or covered by one of the exclusion masks.
pub fn base_interest(amenity: &Grid<f64>, district: &Grid<u32>, exclusions: &[&Grid<bool>]) -> Grid<f64> {
    let mut interest = amenity.zip_map(district, |v, d| if d == 0 { 0.0 } else { v });
    for mask in exclusions {
        interest = interest.zip_map(mask, |v, excluded| if excluded { 0.0 } else { v });
    }
    interest
}

/// Interest of the year: the base grid without over-artificialized or
/// exhausted cells, optionally restricted to priority zoning.
pub fn year_mask(
    layers: &Layers,
    state: &UrbanState,
    exclusion_ratio: f64,
    zoning_priority: bool,
) -> Grid<f64> {
    let (rows, cols) = layers.shape();
    let mut mask = Grid::new(rows, cols);
    for (cell, weight) in layers.interest.cells() {
        let eligible = weight > 0.0
            && layers.artif_ratio[cell] <= exclusion_ratio
            && state.capacity[cell] > 0
            && (!zoning_priority || layers.zoning_priority[cell]);
        if eligible {
            mask[cell] = weight;
        }
    }
    mask
}
