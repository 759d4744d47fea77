//! Run setup and the annual loop.

use crate::allocator::Allocator;
use crate::budget::{self, BudgetPlan, History};
use crate::config::{Config, Scenario};
use crate::contiguity::ContiguityGate;
use crate::csv_reader::{
    check_shape, read_distribution_csv, read_districts_csv, read_history_csv, read_raster,
    to_counts, to_mask,
};
use crate::distribution::{DistributionKind, DistributionTables, DistrictNorms};
use crate::driver::{Driver, DriverSettings, YearOutcome, YearTargets};
use crate::error::Result;
use crate::export;
use crate::grid::Grid;
use crate::interest::{base_interest, combine_amenities};
use crate::report::{RunLog, RunSummary};
use crate::sampler::Sampler;
use crate::state::{Layers, UrbanState};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Everything read from disk before the first year.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub layers: Layers,
    pub state: UrbanState,
    pub tables: DistributionTables,
    pub norms: DistrictNorms,
    pub history: History,
}

impl Inputs {
    /// Reads and validates every layer and table named in `config`.
    pub fn load(config: &Config) -> Result<Self> {
        let reader = LayerReader::new(config)?;
        let (rows, cols) = reader.shape;
        info!("Grid: {} rows x {} cols, cell size {} m", rows, cols, config.grid.cell_size);

        let ground = match reader.optional(&config.inputs.ground, "ground")? {
            Some(g) => to_counts(&g),
            None => Grid::new(rows, cols),
        };
        let ground_res = match reader.optional(&config.inputs.ground_res, "ground_res")? {
            Some(g) => to_counts(&g),
            None => ground.clone(),
        };
        let floor = reader
            .optional(&config.inputs.floor, "floor")?
            .map_or_else(|| Grid::new(rows, cols), |g| to_counts(&g));
        let population = reader
            .optional(&config.inputs.population, "population")?
            .map_or_else(|| Grid::new(rows, cols), |g| to_counts(&g));
        let built = match reader.optional(&config.inputs.built, "built")? {
            Some(b) => to_mask(&b).zip_map(&ground, |b, g| b || g > 0),
            None => ground.map(|g| g > 0),
        };

        let raw_capacity = to_counts(&reader.required(&config.inputs.capacity, "capacity")?);
        let saturation = config.constraints.saturation_pct / 100.0;
        let capacity = raw_capacity.zip_map(&ground, |cap, g| {
            let cap = (f64::from(cap) * saturation).floor() as u32;
            cap.saturating_sub(g)
        });

        let mut exclusions = Vec::new();
        for (file, name) in [
            (&config.inputs.restriction, "restriction"),
            (&config.inputs.zoning_restriction, "zoning_restriction"),
        ] {
            if let Some(mask) = reader.optional(file, name)? {
                exclusions.push(to_mask(&mask));
            }
        }

        let mut amenities = Vec::with_capacity(config.inputs.amenities.len());
        for layer in &config.inputs.amenities {
            amenities.push((layer.weight, reader.required(&layer.file, &layer.name)?));
        }
        let weighted: Vec<(f64, &Grid<f64>)> = amenities.iter().map(|(w, g)| (*w, g)).collect();
        let amenity = combine_amenities(&weighted, rows, cols);
        let exclusion_refs: Vec<&Grid<bool>> = exclusions.iter().collect();
        let interest = base_interest(&amenity, &reader.district, &exclusion_refs);

        let zoning_priority = match reader.optional(&config.inputs.zoning_priority, "zoning_priority")? {
            Some(mask) => to_mask(&mask),
            None => {
                if config.policy.zoning_priority {
                    warn!("Zoning priority is on but no priority layer is configured");
                }
                Grid::new(rows, cols)
            }
        };
        let artif_ratio = reader
            .optional(&config.inputs.artif_ratio, "artif_ratio")?
            .unwrap_or_else(|| Grid::new(rows, cols));
        let ecology = reader
            .optional(&config.inputs.ecology, "ecology")?
            .map_or_else(|| Grid::new(rows, cols), |g| g.map(|v| v.clamp(0.0, 1.0)));

        let mut tables = DistributionTables::new();
        read_distribution_csv(
            config.inputs.resolve(&config.inputs.floors_table),
            DistributionKind::Floors,
            &mut tables,
        )?;
        read_distribution_csv(
            config.inputs.resolve(&config.inputs.footprints_table),
            DistributionKind::Footprints,
            &mut tables,
        )?;
        let degenerate = tables.degenerate_districts();
        if !degenerate.is_empty() {
            warn!("Districts without usable distributions: {:?}", degenerate);
        }

        let mut norms = read_districts_csv(config.inputs.resolve(&config.inputs.districts_table))?;
        if let Some(cap) = config.constraints.max_m2_per_person {
            norms.cap_m2_per_person(cap);
        }

        let districts: BTreeSet<u32> = reader.district.iter().copied().filter(|&d| d > 0).collect();
        let missing: Vec<u32> = districts
            .iter()
            .copied()
            .filter(|&d| tables.get(d).is_none() || norms.m2_per_person(d).is_none())
            .collect();
        if !missing.is_empty() {
            warn!("Districts missing from the lookup tables, never built: {:?}", missing);
        }
        debug!(
            "{} districts on the grid, {} distribution tables, {} norms",
            districts.len(),
            tables.len(),
            norms.len()
        );

        let points = read_history_csv(config.inputs.resolve(&config.inputs.history_table))?;
        let history = History::from_points(&points)?;

        let state = UrbanState {
            capacity,
            built,
            ground,
            ground_res,
            floor,
            population,
            ..UrbanState::with_capacity(Grid::new(rows, cols))
        };
        info!(
            "Baseline: {} built cells, {} inhabitants, {} m2 buildable",
            state.built.count(),
            state.population.total(),
            state.capacity.total()
        );

        Ok(Self {
            layers: Layers {
                cell_size: config.grid.cell_size,
                projection: config.grid.projection.clone(),
                district: reader.district,
                interest,
                artif_ratio,
                zoning_priority,
                ecology,
            },
            state,
            tables,
            norms,
            history,
        })
    }
}

/// Reads rasters relative to the input directory and checks them against
/// the district grid's shape.
struct LayerReader<'a> {
    config: &'a Config,
    district: Grid<u32>,
    shape: (usize, usize),
}

impl<'a> LayerReader<'a> {
    fn new(config: &'a Config) -> Result<Self> {
        let district = to_counts(&read_raster(
            config.inputs.resolve(&config.inputs.district),
            "district",
        )?);
        let shape = district.shape();
        Ok(Self {
            config,
            district,
            shape,
        })
    }

    fn required(&self, file: &Path, name: &str) -> Result<Grid<f64>> {
        let grid = read_raster(self.config.inputs.resolve(file), name)?;
        check_shape(&grid, name, self.shape.0, self.shape.1)?;
        Ok(grid)
    }

    fn optional(&self, file: &Option<PathBuf>, name: &str) -> Result<Option<Grid<f64>>> {
        file.as_deref().map(|f| self.required(f, name)).transpose()
    }
}

/// Budget plan from the history table alone.
pub fn plan_from_config(config: &Config) -> Result<(History, BudgetPlan)> {
    let points = read_history_csv(config.inputs.resolve(&config.inputs.history_table))?;
    let history = History::from_points(&points)?;
    let plan = plan_for(config, &history)?;
    Ok((history, plan))
}

fn plan_for(config: &Config, history: &History) -> Result<BudgetPlan> {
    budget::plan(
        history,
        config.scenario()?,
        config.scenario.growth_rate,
        config.scenario.max_growth_rate,
        config.run.final_year,
    )
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub summary: RunSummary,
    pub outcomes: Vec<YearOutcome>,
    pub state: UrbanState,
    pub heat_map: Grid<u32>,
}

pub struct Simulation {
    config: Config,
    scenario: Scenario,
    inputs: Inputs,
    plan: BudgetPlan,
}

impl Simulation {
    /// Loads every input and plans the budget; nothing is written.
    pub fn setup(config: &Config) -> Result<Self> {
        let scenario = config.scenario()?;
        let inputs = Inputs::load(config)?;
        let plan = plan_for(config, &inputs.history)?;
        info!(
            "Scenario {}: growth rate {:.4}, {} people and {} m2 planned over {} years",
            scenario,
            plan.growth_rate,
            plan.total_population(),
            plan.total_area(),
            plan.years.len()
        );
        Ok(Self {
            config: config.clone(),
            scenario,
            inputs,
            plan,
        })
    }

    pub fn plan(&self) -> &BudgetPlan {
        &self.plan
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.run.output_dir
    }

    /// Runs every planned year and writes the outputs.
    pub fn run(self, log: &mut RunLog) -> Result<RunOutput> {
        let Simulation {
            config,
            scenario,
            inputs,
            plan,
        } = self;
        let Inputs {
            layers,
            mut state,
            tables,
            norms,
            ..
        } = inputs;
        let output_dir = config.run.output_dir.clone();

        let settings = DriverSettings {
            exclusion_ratio: config.constraints.exclusion_ratio,
            zoning_priority: config.policy.zoning_priority,
            build_non_residential: config.policy.build_non_residential,
            force_densify: config.policy.force_densify,
            densify_old: config.policy.densify_old,
        };
        let allocator = Allocator::new(
            &tables,
            &norms,
            ContiguityGate::from(&config.contiguity),
            config.allocation.use_distributions,
        );
        let mut driver = Driver::new(&layers, allocator, settings);
        let (rows, cols) = layers.shape();
        let mut sampler = Sampler::seeded(config.run.seed, rows, cols);

        log.line(&format!(
            "Scenario {} from {} to {}, seed {}",
            scenario,
            plan.first_year().unwrap_or_default(),
            plan.final_year().unwrap_or_default(),
            config.run.seed
        ))?;

        let final_year = plan.final_year();
        let mut carry_population: u64 = 0;
        let mut carry_area: i64 = 0;
        let mut outcomes = Vec::with_capacity(plan.years.len());

        for (&year, budget) in &plan.years {
            let targets = YearTargets {
                year,
                population: u64::from(budget.population) + carry_population,
                area: i64::from(budget.area) + carry_area,
                is_final: Some(year) == final_year,
            };
            let outcome = driver.run_year(&mut state, &mut sampler, targets);
            carry_population = outcome.unmet_population;
            carry_area = outcome.unmet_area;
            log.year(&outcome)?;

            if config.run.snapshots {
                let dir = export::snapshot_dir(&output_dir, year);
                export::write_layers(&state, &layers, &dir)?;
                debug!("Snapshot written to {}", dir.display());
            }
            outcomes.push(outcome);
        }

        let summary = RunSummary::from_outcomes(
            &scenario.to_string(),
            config.run.seed,
            plan.growth_rate,
            (plan.total_population(), plan.total_area()),
            state.expansion_population(),
            &outcomes,
        );

        export::write_layers(&state, &layers, &output_dir)?;
        export::write_heatmap(sampler.heat_map(), &output_dir)?;
        export::write_years(&outcomes, &output_dir)?;
        export::write_metadata(&layers, &output_dir)?;
        export::write_json(&summary, &output_dir, "summary.json")?;
        log.summary(&summary)?;
        info!("Outputs written to {}", output_dir.display());

        Ok(RunOutput {
            summary,
            outcomes,
            state,
            heat_map: sampler.into_heat_map(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UrbaSimError;
    use std::fmt::Write as _;
    use tempfile::TempDir;

    const N: usize = 8;

    fn raster(f: impl Fn(usize, usize) -> String) -> String {
        let mut out = String::new();
        for r in 0..N {
            let row: Vec<String> = (0..N).map(|c| f(r, c)).collect();
            writeln!(out, "{}", row.join(",")).unwrap();
        }
        out
    }

    fn fixture(dir: &Path) -> Config {
        let write = |name: &str, content: String| std::fs::write(dir.join(name), content).unwrap();
        write("district.csv", raster(|_, _| "1".into()));
        write("capacity.csv", raster(|_, _| "100".into()));
        write(
            "ground.csv",
            raster(|r, c| if (r, c) == (4, 4) { "40".into() } else { "0".into() }),
        );
        write(
            "restriction.csv",
            raster(|r, _| if r == 7 { "1".into() } else { "0".into() }),
        );
        write(
            "floors.csv",
            "district,value,fitted,unfit\n1,2,1,1\n".into(),
        );
        write(
            "footprints.csv",
            "district,value,fitted,unfit\n1,50,1,1\n".into(),
        );
        write(
            "districts.csv",
            "district,m2_per_person,residential_share\n1,25,1\n".into(),
        );
        write(
            "history.csv",
            "year,population,ground_area\n2010,1000,50000\n2015,1100,55000\n".into(),
        );

        let toml = format!(
            r#"
            [run]
            final_year = 2018
            output_dir = "{out}"

            [scenario]
            name = "stable"

            [constraints]
            saturation_pct = 50

            [contiguity]
            enabled = false

            [inputs]
            dir = "{dir}"
            district = "district.csv"
            capacity = "capacity.csv"
            ground = "ground.csv"
            restriction = "restriction.csv"
            floors_table = "floors.csv"
            footprints_table = "footprints.csv"
            districts_table = "districts.csv"
            history_table = "history.csv"
            "#,
            out = dir.join("out").display(),
            dir = dir.display()
        );
        let config = Config::from_toml_str(&toml).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_load_applies_saturation_and_exclusions() {
        let temp_dir = TempDir::new().unwrap();
        let config = fixture(temp_dir.path());
        let inputs = Inputs::load(&config).unwrap();

        assert_eq!(inputs.layers.shape(), (N, N));
        // floor(100 * 50%) - existing ground
        assert_eq!(inputs.state.capacity[(1, 1)], 50);
        assert_eq!(inputs.state.capacity[(4, 4)], 10);
        assert!(inputs.state.built[(4, 4)]);
        assert_eq!(inputs.state.ground_res[(4, 4)], 40);
        assert_eq!(inputs.layers.interest[(7, 3)], 0.0);
        assert_eq!(inputs.layers.interest[(3, 3)], 1.0);
        assert_eq!(inputs.history.last.year, 2015);
    }

    #[test]
    fn test_load_rejects_shape_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let config = fixture(temp_dir.path());
        std::fs::write(temp_dir.path().join("capacity.csv"), "1,2\n3,4\n").unwrap();
        let err = Inputs::load(&config).unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_setup_rejects_growth_above_ceiling() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = fixture(temp_dir.path());
        config.scenario.max_growth_rate = 0.01;
        let err = Simulation::setup(&config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_plan_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = fixture(temp_dir.path());
        let (history, plan) = plan_from_config(&config).unwrap();
        assert_eq!(history.first.year, 2010);
        assert_eq!(plan.first_year(), Some(2016));
        assert_eq!(plan.final_year(), Some(2018));
    }

    #[test]
    fn test_run_writes_outputs_and_carries_deficit() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = fixture(temp_dir.path());
        config.run.snapshots = true;

        let simulation = Simulation::setup(&config).unwrap();
        let planned: Vec<_> = simulation.plan().years.values().copied().collect();
        let out = simulation.output_dir().to_path_buf();
        let mut log = RunLog::create(&out).unwrap();
        let output = simulation.run(&mut log).unwrap();

        assert_eq!(output.outcomes.len(), 3);
        let mut carry = 0;
        for (outcome, budget) in output.outcomes.iter().zip(&planned) {
            assert_eq!(outcome.population_target, u64::from(budget.population) + carry);
            assert!(outcome.housed <= outcome.population_target);
            carry = outcome.unmet_population;
        }
        assert_eq!(output.summary.housed, output.state.population.total());
        assert_eq!(output.heat_map.total(), output.outcomes.iter().map(|o| o.draws).sum::<u64>());
        // Restricted row never built.
        assert!(output.state.built.row(7).iter().all(|&b| !b));

        for name in ["urbanized.csv", "heatmap.csv", "years.csv", "summary.json", "metadata.json", "run.log"] {
            assert!(out.join(name).exists(), "{name} missing");
        }
        assert!(out.join("snapshots").join("2017").join("population.csv").exists());
    }

    #[test]
    fn test_failure_mid_run_keeps_snapshots_and_skips_summary() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = fixture(temp_dir.path());
        config.run.snapshots = true;
        let out = config.run.output_dir.clone();
        // A plain file where the 2017 snapshot directory should go.
        std::fs::create_dir_all(out.join("snapshots")).unwrap();
        std::fs::write(out.join("snapshots").join("2017"), "blocked").unwrap();

        let simulation = Simulation::setup(&config).unwrap();
        let mut log = RunLog::create(&out).unwrap();
        let err = simulation.run(&mut log).unwrap_err();
        assert!(matches!(err, UrbaSimError::CreateDir { .. }));

        assert!(out.join("snapshots").join("2016").join("population.csv").exists());
        assert!(!out.join("summary.json").exists());
        assert!(!out.join("urbanized.csv").exists());
        assert!(!out.join("years.csv").exists());

        let err = anyhow::Error::from(err).context("Simulation aborted");
        log.failure(&err).unwrap();
        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("2016: housed"));
        assert!(content.contains("Error: Simulation aborted"));
        assert!(content.contains("caused by: Failed to create directory"));
    }
}
