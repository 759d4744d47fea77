//! Cell-level allocation: open or extend a footprint, turn it into floor
//! area, densify existing residential stock.

use crate::contiguity::ContiguityGate;
use crate::distribution::{Distribution, DistributionTables, DistrictNorms};
use crate::grid::{Cell, Grid};
use crate::sampler::Sampler;
use rand::Rng;

const SINGLE_FLOOR: u32 = 1;

pub struct Allocator<'a> {
    tables: &'a DistributionTables,
    norms: &'a DistrictNorms,
    gate: ContiguityGate,
    /// Without distributions a footprint takes the whole remaining capacity
    /// and every building has one floor.
    use_distributions: bool,
    single_floor: Distribution,
}

impl<'a> Allocator<'a> {
    pub fn new(
        tables: &'a DistributionTables,
        norms: &'a DistrictNorms,
        gate: ContiguityGate,
        use_distributions: bool,
    ) -> Self {
        Self {
            tables,
            norms,
            gate,
            use_distributions,
            single_floor: Distribution::constant(SINGLE_FLOOR),
        }
    }

    pub fn norms(&self) -> &DistrictNorms {
        self.norms
    }

    /// Ground area (m²) to build on `cell`, capped at `remaining_capacity`.
    ///
    /// `new_cell_reference` is given for cells not built yet: the built grid
    /// including this year's allocations, against which contiguity is checked.
    /// Returns 0 when the cell is rejected for this draw.
    pub fn expand<R: Rng>(
        &self,
        sampler: &mut Sampler<R>,
        district: u32,
        cell: Cell,
        remaining_capacity: u32,
        new_cell_reference: Option<&Grid<bool>>,
    ) -> u32 {
        if remaining_capacity == 0 {
            return 0;
        }
        if let Some(reference) = new_cell_reference
            && !self.gate.accepts(reference, cell)
        {
            return 0;
        }

        if !self.use_distributions {
            return remaining_capacity;
        }
        match self.tables.footprints(district) {
            Some(footprints) => sampler.choose_value(footprints).min(remaining_capacity),
            None => 0,
        }
    }

    /// Floor area (m²) of `ground` built with a sampled floor count; 0 when the
    /// drawn count is 0.
    pub fn build<R: Rng>(&self, sampler: &mut Sampler<R>, district: u32, ground: u32) -> u32 {
        let floors = match self.floor_table(district) {
            Some(table) => sampler.choose_value(table),
            None => 0,
        };
        clamp_area(u64::from(ground) * u64::from(floors))
    }

    /// Additional floor area (m²) from raising the floor count of an already
    /// built residential cell. 0 when the cell cannot gain a floor or the gain
    /// does not house at least one more person.
    pub fn reshape<R: Rng>(
        &self,
        sampler: &mut Sampler<R>,
        district: u32,
        ground_res: u32,
        floor: u32,
    ) -> u32 {
        if ground_res == 0 {
            return 0;
        }
        let Some(table) = self.floor_table(district) else {
            return 0;
        };
        let Some(max_floors) = table.max_value() else {
            return 0;
        };

        let average = f64::from(floor) / f64::from(ground_res);
        if f64::from(max_floors) <= average {
            return 0;
        }
        let candidate = sampler.choose_value(table);
        if f64::from(candidate) <= average {
            return 0;
        }

        let target = u64::from(ground_res) * u64::from(candidate);
        let increment = target.saturating_sub(u64::from(floor));
        match self.norms.m2_per_person(district) {
            Some(m2) if increment as f64 >= m2 => clamp_area(increment),
            _ => 0,
        }
    }

    fn floor_table(&self, district: u32) -> Option<&Distribution> {
        if self.use_distributions {
            self.tables.floors(district)
        } else {
            Some(&self.single_floor)
        }
    }
}

fn clamp_area(area: u64) -> u32 {
    u32::try_from(area).unwrap_or(u32::MAX)
}
