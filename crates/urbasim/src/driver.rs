//! One simulated year: open-cell phase, fallback densification, year-close.

use crate::allocator::Allocator;
use crate::grid::{Cell, Grid};
use crate::interest::year_mask;
use crate::sampler::{Sampler, is_sentinel};
use crate::state::{CommitStats, Layers, Provisional, UrbanState};
use log::{debug, info};
use rand::Rng;
use serde::Serialize;

/// Run-wide switches read by the driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverSettings {
    pub exclusion_ratio: f64,
    pub zoning_priority: bool,
    pub build_non_residential: bool,
    pub force_densify: bool,
    pub densify_old: bool,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            exclusion_ratio: 1.0,
            zoning_priority: false,
            build_non_residential: false,
            force_densify: false,
            densify_old: false,
        }
    }
}

/// Targets of a year, carried deficits included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearTargets {
    pub year: i32,
    pub population: u64,
    /// Ground area (m²) that may be consumed; negative after an overshoot.
    pub area: i64,
    pub is_final: bool,
}

/// Diagnostics of a closed year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct YearOutcome {
    pub year: i32,
    pub population_target: u64,
    pub area_budget: i64,
    pub housed: u64,
    pub consumed: u64,
    pub draws: u64,
    pub new_cells: usize,
    pub densified_cells: usize,
    pub densified_population: u64,
    pub priority_exhausted: bool,
    pub unmet_population: u64,
    pub unmet_area: i64,
    pub floor_added: u64,
    pub impact: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DensifyPolicy {
    /// Cells that went from unbuilt to built this year.
    Forced,
    /// The whole residential stock, final year only.
    Old,
}

pub struct Driver<'a> {
    layers: &'a Layers,
    allocator: Allocator<'a>,
    settings: DriverSettings,
    /// Cleared for good once the priority zones run out of eligible cells.
    priority_active: bool,
}

impl<'a> Driver<'a> {
    pub fn new(layers: &'a Layers, allocator: Allocator<'a>, settings: DriverSettings) -> Self {
        Self {
            layers,
            allocator,
            settings,
            priority_active: settings.zoning_priority,
        }
    }

    pub fn zoning_priority_active(&self) -> bool {
        self.priority_active
    }

    /// Runs one year against `state` and commits the result.
    pub fn run_year<R: Rng>(
        &mut self,
        state: &mut UrbanState,
        sampler: &mut Sampler<R>,
        targets: YearTargets,
    ) -> YearOutcome {
        let (rows, cols) = state.shape();
        let mut provisional = Provisional::new(rows, cols);
        let mut outcome = YearOutcome {
            year: targets.year,
            population_target: targets.population,
            area_budget: targets.area,
            ..Default::default()
        };

        self.open_cells(state, sampler, &mut provisional, targets, &mut outcome);

        if outcome.housed < targets.population {
            let policy = if targets.is_final && self.settings.densify_old {
                Some(DensifyPolicy::Old)
            } else if self.settings.force_densify {
                Some(DensifyPolicy::Forced)
            } else {
                None
            };
            if let Some(policy) = policy {
                self.densify(state, sampler, &mut provisional, policy, targets, &mut outcome);
            }
        }

        let stats: CommitStats = state.commit(&provisional, self.layers);
        outcome.new_cells = stats.new_cells;
        outcome.floor_added = stats.floor;
        outcome.impact = stats.impact;
        outcome.unmet_population = targets.population.saturating_sub(outcome.housed);
        outcome.unmet_area = targets.area - outcome.consumed as i64;

        debug!(
            "{}: housed {}/{} people, consumed {}/{} m2 in {} draws",
            targets.year,
            outcome.housed,
            targets.population,
            outcome.consumed,
            targets.area,
            outcome.draws
        );
        outcome
    }

    fn open_cells<R: Rng>(
        &mut self,
        state: &UrbanState,
        sampler: &mut Sampler<R>,
        provisional: &mut Provisional,
        targets: YearTargets,
        outcome: &mut YearOutcome,
    ) {
        let exclusion = self.settings.exclusion_ratio;
        let mut mask = year_mask(self.layers, state, exclusion, self.priority_active);
        let mut rejected: Grid<bool> = Grid::new(state.capacity.rows(), state.capacity.cols());
        let mut reference = provisional.reference_built(state);

        while (outcome.consumed as i64) < targets.area && outcome.housed < targets.population {
            let Some(cell) = sampler.choose_cell(&mask) else {
                if !self.priority_active {
                    break;
                }
                self.priority_active = false;
                outcome.priority_exhausted = true;
                info!(
                    "Zoning priority exhausted in {}; all eligible cells open from now on",
                    targets.year
                );
                mask = year_mask(self.layers, state, exclusion, false);
                for (c, gone) in rejected.cells() {
                    if gone || provisional.remaining_capacity(state, c) == 0 {
                        mask[c] = 0.0;
                    }
                }
                continue;
            };
            outcome.draws += 1;

            if is_sentinel(cell) {
                reject(&mut mask, &mut rejected, cell);
                continue;
            }
            let remaining = provisional.remaining_capacity(state, cell);
            if remaining == 0 {
                reject(&mut mask, &mut rejected, cell);
                continue;
            }

            let district = self.layers.district[cell];
            let is_new = !reference[cell];
            let ground = self.allocator.expand(
                sampler,
                district,
                cell,
                remaining,
                is_new.then_some(&reference),
            );
            if ground == 0 {
                reject(&mut mask, &mut rejected, cell);
                continue;
            }

            let ground_res = if self.settings.build_non_residential {
                let share = self.allocator.norms().residential_share(district);
                (f64::from(ground) * share.clamp(0.0, 1.0)).round() as u32
            } else {
                ground
            };
            let floor = self.allocator.build(sampler, district, ground_res);
            if floor == 0 {
                reject(&mut mask, &mut rejected, cell);
                continue;
            }

            provisional.built[cell] = true;
            reference[cell] = true;
            provisional.ground[cell] += ground;
            provisional.ground_res[cell] += ground_res;
            provisional.floor[cell] = provisional.floor[cell].saturating_add(floor);
            outcome.consumed += u64::from(ground);
            outcome.housed += self.house(provisional, cell, district, targets.population - outcome.housed);

            if provisional.remaining_capacity(state, cell) == 0 {
                mask[cell] = 0.0;
            }
        }
    }

    fn densify<R: Rng>(
        &mut self,
        state: &UrbanState,
        sampler: &mut Sampler<R>,
        provisional: &mut Provisional,
        policy: DensifyPolicy,
        targets: YearTargets,
        outcome: &mut YearOutcome,
    ) {
        let (rows, cols) = state.shape();
        let mut mask: Grid<f64> = Grid::new(rows, cols);
        for (cell, this_year) in provisional.ground_res.cells() {
            let stock = match policy {
                DensifyPolicy::Forced => {
                    this_year > 0 && provisional.built[cell] && !state.built[cell]
                }
                DensifyPolicy::Old => this_year > 0 || state.ground_res[cell] > 0,
            };
            if stock {
                mask[cell] = 1.0;
            }
        }
        debug!(
            "{}: {:?} densification over {} cells",
            targets.year,
            policy,
            mask.iter().filter(|&&w| w > 0.0).count()
        );

        let mut densified: Grid<bool> = Grid::new(rows, cols);
        while outcome.housed < targets.population {
            let Some(cell) = sampler.choose_cell(&mask) else {
                break;
            };
            outcome.draws += 1;
            if is_sentinel(cell) {
                mask[cell] = 0.0;
                continue;
            }

            let district = self.layers.district[cell];
            let ground_res = state.ground_res[cell].saturating_add(provisional.ground_res[cell]);
            let floor = state.floor[cell].saturating_add(provisional.floor[cell]);
            let extra = self.allocator.reshape(sampler, district, ground_res, floor);
            if extra == 0 {
                mask[cell] = 0.0;
                continue;
            }

            provisional.floor[cell] = provisional.floor[cell].saturating_add(extra);
            match policy {
                DensifyPolicy::Forced => provisional.forced[cell] = true,
                DensifyPolicy::Old => provisional.old[cell] = true,
            }
            densified[cell] = true;
            let people = self.house(provisional, cell, district, targets.population - outcome.housed);
            outcome.housed += people;
            outcome.densified_population += people;
        }
        outcome.densified_cells = densified.count();
    }

    /// Recomputes the cell's provisional population from its provisional
    /// floor area and returns the increment, capped at `need`.
    fn house(&self, provisional: &mut Provisional, cell: Cell, district: u32, need: u64) -> u64 {
        let Some(m2) = self.allocator.norms().m2_per_person(district) else {
            return 0;
        };
        let capacity = (f64::from(provisional.floor[cell]) / m2).floor() as u64;
        let increment = capacity
            .saturating_sub(u64::from(provisional.population[cell]))
            .min(need);
        provisional.population[cell] += increment as u32;
        increment
    }
}

fn reject(mask: &mut Grid<f64>, rejected: &mut Grid<bool>, cell: Cell) {
    mask[cell] = 0.0;
    rejected[cell] = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contiguity::ContiguityGate;
    use crate::distribution::{
        Distribution, DistrictDistributions, DistrictNorm, DistrictNorms, DistributionTables,
        FitPair,
    };

    const N: usize = 12;

    fn layers() -> Layers {
        Layers {
            cell_size: 10.0,
            projection: None,
            district: Grid::filled(N, N, 1),
            interest: Grid::filled(N, N, 1.0),
            artif_ratio: Grid::new(N, N),
            zoning_priority: Grid::new(N, N),
            ecology: Grid::new(N, N),
        }
    }

    fn tables(footprint: u32, floors: &[(u32, f64)]) -> DistributionTables {
        let mut tables = DistributionTables::new();
        tables.set(
            1,
            DistrictDistributions {
                floors: FitPair {
                    fitted: Distribution::from_pairs(floors.iter().copied()),
                    unfit: Distribution::default(),
                },
                footprints: FitPair {
                    fitted: Distribution::constant(footprint),
                    unfit: Distribution::default(),
                },
            },
        );
        tables
    }

    fn norms(m2: f64, share: f64) -> DistrictNorms {
        let mut norms = DistrictNorms::new();
        norms.insert(
            1,
            DistrictNorm {
                m2_per_person: m2,
                residential_share: share,
            },
        );
        norms
    }

    fn targets(year: i32, population: u64, area: i64) -> YearTargets {
        YearTargets {
            year,
            population,
            area,
            is_final: false,
        }
    }

    #[test]
    fn test_single_year_houses_target() {
        let layers = layers();
        let t = tables(50, &[(2, 1.0)]);
        let n = norms(25.0, 1.0);
        let alloc = Allocator::new(&t, &n, ContiguityGate::disabled(), true);
        let mut driver = Driver::new(&layers, alloc, DriverSettings::default());
        let mut state = UrbanState::with_capacity(Grid::filled(N, N, 50));
        let mut sampler = Sampler::seeded(42, N, N);

        let outcome = driver.run_year(&mut state, &mut sampler, targets(2016, 100, 10_000));

        assert_eq!(outcome.housed, 100);
        assert_eq!(outcome.unmet_population, 0);
        assert_eq!(outcome.new_cells, 25);
        assert_eq!(outcome.consumed, 25 * 50);
        assert_eq!(outcome.unmet_area, 10_000 - 1250);
        assert_eq!(state.built.count(), 25);
        for (cell, built) in state.built.cells() {
            if built {
                assert_eq!(state.floor[cell], 100);
                assert_eq!(state.population[cell], 4);
                assert_eq!(state.capacity[cell], 0);
                assert!(cell.0 > 0 && cell.1 > 0);
            }
        }
    }

    #[test]
    fn test_area_budget_stops_year() {
        let layers = layers();
        let t = tables(50, &[(2, 1.0)]);
        let n = norms(25.0, 1.0);
        let alloc = Allocator::new(&t, &n, ContiguityGate::disabled(), true);
        let mut driver = Driver::new(&layers, alloc, DriverSettings::default());
        let mut state = UrbanState::with_capacity(Grid::filled(N, N, 50));
        let mut sampler = Sampler::seeded(1, N, N);

        let outcome = driver.run_year(&mut state, &mut sampler, targets(2016, 1000, 120));
        // Three 50 m² footprints reach the 120 m² budget.
        assert_eq!(outcome.consumed, 150);
        assert_eq!(outcome.unmet_area, -30);
        assert_eq!(outcome.housed, 12);
        assert_eq!(outcome.unmet_population, 988);
    }

    #[test]
    fn test_exhausted_mask_carries_deficit() {
        let layers = layers();
        let t = tables(50, &[(2, 1.0)]);
        let n = norms(25.0, 1.0);
        let alloc = Allocator::new(&t, &n, ContiguityGate::disabled(), true);
        let mut driver = Driver::new(&layers, alloc, DriverSettings::default());
        let mut capacity = Grid::new(N, N);
        capacity[(3, 3)] = 50;
        capacity[(0, 5)] = 50;
        let mut state = UrbanState::with_capacity(capacity);
        let mut sampler = Sampler::seeded(5, N, N);

        let outcome = driver.run_year(&mut state, &mut sampler, targets(2016, 40, 10_000));
        assert_eq!(outcome.housed, 4);
        assert_eq!(outcome.unmet_population, 36);
        // First row is never built.
        assert!(!state.built[(0, 5)]);
        assert!(state.built[(3, 3)]);
    }

    #[test]
    fn test_zoning_priority_is_one_way() {
        let mut layers = layers();
        layers.zoning_priority[(4, 4)] = true;
        let t = tables(50, &[(2, 1.0)]);
        let n = norms(25.0, 1.0);
        let alloc = Allocator::new(&t, &n, ContiguityGate::disabled(), true);
        let settings = DriverSettings {
            zoning_priority: true,
            ..Default::default()
        };
        let mut driver = Driver::new(&layers, alloc, settings);
        let mut state = UrbanState::with_capacity(Grid::filled(N, N, 50));
        let mut sampler = Sampler::seeded(9, N, N);

        // One priority cell covers the first year.
        let first = driver.run_year(&mut state, &mut sampler, targets(2016, 4, 10_000));
        assert!(state.built[(4, 4)]);
        assert_eq!(state.built.count(), 1);
        assert!(!first.priority_exhausted);
        assert!(driver.zoning_priority_active());

        let second = driver.run_year(&mut state, &mut sampler, targets(2017, 8, 10_000));
        assert!(second.priority_exhausted);
        assert_eq!(second.housed, 8);
        assert!(!driver.zoning_priority_active());

        let third = driver.run_year(&mut state, &mut sampler, targets(2018, 8, 10_000));
        assert!(!third.priority_exhausted);
        assert!(!driver.zoning_priority_active());
    }

    #[test]
    fn test_forced_densification() {
        let layers = layers();
        let t = tables(50, &[(1, 1.0), (3, 1.0)]);
        let n = norms(25.0, 1.0);
        let alloc = Allocator::new(&t, &n, ContiguityGate::disabled(), true);
        let settings = DriverSettings {
            force_densify: true,
            ..Default::default()
        };
        let mut driver = Driver::new(&layers, alloc, settings);
        let mut state = UrbanState::with_capacity(Grid::filled(N, N, 50));
        let mut sampler = Sampler::seeded(11, N, N);

        // Ten footprints cannot house 100 people; one-floor cells gain floors.
        let outcome = driver.run_year(&mut state, &mut sampler, targets(2016, 100, 500));
        assert_eq!(outcome.consumed, 500);
        assert!(outcome.densified_population > 0);
        assert!(outcome.housed <= 100);
        assert_eq!(state.population.total(), outcome.housed);
        for (cell, forced) in state.forced_densification.cells() {
            if forced {
                assert!(state.expansion[cell]);
                assert_eq!(state.floor[cell], 150);
            }
        }
        assert_eq!(state.old_densification.count(), 0);
    }

    #[test]
    fn test_forced_densification_skips_extended_old_cells() {
        let mut layers = layers();
        layers.interest = Grid::new(N, N);
        layers.interest[(2, 2)] = 1.0;
        let t = tables(50, &[(1, 1.0), (3, 1.0)]);
        let n = norms(25.0, 1.0);
        let settings = DriverSettings {
            force_densify: true,
            ..Default::default()
        };
        // One baseline building with room for one more footprint.
        let mut capacity = Grid::new(N, N);
        capacity[(2, 2)] = 50;

        for seed in 0..20 {
            let alloc = Allocator::new(&t, &n, ContiguityGate::disabled(), true);
            let mut driver = Driver::new(&layers, alloc, settings);
            let mut state = UrbanState::with_capacity(capacity.clone());
            state.built[(2, 2)] = true;
            state.ground[(2, 2)] = 50;
            state.ground_res[(2, 2)] = 50;
            state.floor[(2, 2)] = 50;
            let mut sampler = Sampler::seeded(seed, N, N);

            let outcome = driver.run_year(&mut state, &mut sampler, targets(2016, 100, 1000));
            assert_eq!(outcome.consumed, 50, "seed {seed}");
            assert_eq!(outcome.densified_cells, 0, "seed {seed}");
            assert!(!state.forced_densification[(2, 2)], "seed {seed}");
            assert!(!state.expansion[(2, 2)]);
        }
    }

    #[test]
    fn test_old_stock_densified_in_final_year() {
        let layers = layers();
        let t = tables(50, &[(3, 1.0)]);
        let n = norms(25.0, 1.0);
        let alloc = Allocator::new(&t, &n, ContiguityGate::disabled(), true);
        let settings = DriverSettings {
            densify_old: true,
            ..Default::default()
        };
        let mut driver = Driver::new(&layers, alloc, settings);
        // No capacity left; two single-floor buildings from the baseline.
        let mut state = UrbanState::with_capacity(Grid::new(N, N));
        for cell in [(2, 2), (5, 7)] {
            state.built[cell] = true;
            state.ground[cell] = 50;
            state.ground_res[cell] = 50;
            state.floor[cell] = 50;
            state.population[cell] = 2;
        }
        let mut sampler = Sampler::seeded(3, N, N);

        let not_final = driver.run_year(&mut state, &mut sampler, targets(2016, 8, 1000));
        assert_eq!(not_final.housed, 0);

        let mut last = targets(2017, 8, 1000);
        last.is_final = true;
        let outcome = driver.run_year(&mut state, &mut sampler, last);
        assert_eq!(outcome.housed, 8);
        assert_eq!(outcome.densified_cells, 2);
        assert_eq!(outcome.consumed, 0);
        assert_eq!(state.floor[(2, 2)], 150);
        assert_eq!(state.population[(5, 7)], 6);
        assert_eq!(state.old_densification.count(), 2);
    }

    #[test]
    fn test_non_residential_share() {
        let layers = layers();
        let t = tables(50, &[(2, 1.0)]);
        let n = norms(25.0, 0.5);
        let alloc = Allocator::new(&t, &n, ContiguityGate::disabled(), true);
        let settings = DriverSettings {
            build_non_residential: true,
            ..Default::default()
        };
        let mut driver = Driver::new(&layers, alloc, settings);
        let mut state = UrbanState::with_capacity(Grid::filled(N, N, 50));
        let mut sampler = Sampler::seeded(2, N, N);

        let outcome = driver.run_year(&mut state, &mut sampler, targets(2016, 20, 10_000));
        assert_eq!(outcome.housed, 20);
        // 25 m² residential × 2 floors houses 2 people per cell.
        assert_eq!(state.built.count(), 10);
        assert_eq!(state.ground.total(), 500);
        assert_eq!(state.ground_res.total(), 250);
    }

    #[test]
    fn test_population_never_exceeds_target() {
        let layers = layers();
        // 3 floors × 50 m² houses 6 people per cell; 100 is not a multiple of 6.
        let t = tables(50, &[(3, 1.0)]);
        let n = norms(25.0, 1.0);
        let alloc = Allocator::new(&t, &n, ContiguityGate::disabled(), true);
        let mut driver = Driver::new(&layers, alloc, DriverSettings::default());
        let mut state = UrbanState::with_capacity(Grid::filled(N, N, 50));
        let mut sampler = Sampler::seeded(4, N, N);

        let outcome = driver.run_year(&mut state, &mut sampler, targets(2016, 100, 100_000));
        assert_eq!(outcome.housed, 100);
        assert_eq!(state.population.total(), 100);
    }
}
