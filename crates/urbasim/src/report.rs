//! Run log file and end-of-run metrics.

use crate::driver::YearOutcome;
use crate::error::{Result, UrbaSimError};
use chrono::Local;
use log::info;
use serde::Serialize;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Final metrics, written to `summary.json` and the run log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub scenario: String,
    pub seed: u64,
    pub first_year: i32,
    pub final_year: i32,
    pub growth_rate: f64,
    pub population_target: u64,
    pub housed: u64,
    /// Deficit left after the final year.
    pub unhoused: u64,
    pub area_budget: u64,
    pub consumed: u64,
    /// Budget left after the final year; negative after an overshoot.
    pub unbuilt_area: i64,
    pub new_cells: usize,
    /// People living on cells first built during the run, per such cell.
    pub average_new_occupancy: f64,
    pub densified_cells: usize,
    pub densified_population: u64,
    pub impact: f64,
    pub priority_exhausted_in: Option<i32>,
    pub finished_at: String,
}

impl RunSummary {
    /// Folds the yearly outcomes; `planned` are the budgets before carry-over,
    /// `new_cell_population` the people living on newly built cells at the end.
    pub fn from_outcomes(
        scenario: &str,
        seed: u64,
        growth_rate: f64,
        planned: (u64, u64),
        new_cell_population: u64,
        outcomes: &[YearOutcome],
    ) -> Self {
        let housed: u64 = outcomes.iter().map(|o| o.housed).sum();
        let densified_population: u64 = outcomes.iter().map(|o| o.densified_population).sum();
        let new_cells: usize = outcomes.iter().map(|o| o.new_cells).sum();
        let last = outcomes.last();

        let average_new_occupancy = if new_cells > 0 {
            new_cell_population as f64 / new_cells as f64
        } else {
            0.0
        };

        Self {
            scenario: scenario.to_string(),
            seed,
            first_year: outcomes.first().map_or(0, |o| o.year),
            final_year: last.map_or(0, |o| o.year),
            growth_rate,
            population_target: planned.0,
            housed,
            unhoused: last.map_or(planned.0, |o| o.unmet_population),
            area_budget: planned.1,
            consumed: outcomes.iter().map(|o| o.consumed).sum(),
            unbuilt_area: last.map_or(planned.1 as i64, |o| o.unmet_area),
            new_cells,
            average_new_occupancy,
            densified_cells: outcomes.iter().map(|o| o.densified_cells).sum(),
            densified_population,
            impact: outcomes.iter().map(|o| o.impact).sum(),
            priority_exhausted_in: outcomes
                .iter()
                .find(|o| o.priority_exhausted)
                .map(|o| o.year),
            finished_at: Local::now().to_rfc3339(),
        }
    }
}

/// `run.log` in the output directory; every line is mirrored to the logger.
pub struct RunLog {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl RunLog {
    pub fn create(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| UrbaSimError::CreateDir {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = dir.join("run.log");
        let file = File::create(&path).map_err(|e| UrbaSimError::CreateFile {
            path: path.clone(),
            source: e,
        })?;

        let mut log = Self {
            writer: BufWriter::new(file),
            path,
        };
        let started = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(log.writer, "# urbasim run started {started}")?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(&mut self, message: &str) -> Result<()> {
        info!("{message}");
        writeln!(self.writer, "{message}")?;
        Ok(())
    }

    pub fn year(&mut self, outcome: &YearOutcome) -> Result<()> {
        self.line(&format!(
            "{}: housed {}/{} people, consumed {}/{} m2, {} new cells, {} densified, unmet population {}, unmet area {}",
            outcome.year,
            outcome.housed,
            outcome.population_target,
            outcome.consumed,
            outcome.area_budget,
            outcome.new_cells,
            outcome.densified_cells,
            outcome.unmet_population,
            outcome.unmet_area
        ))?;
        if outcome.priority_exhausted {
            self.line(&format!(
                "{}: zoning priority exhausted, disabled for the rest of the run",
                outcome.year
            ))?;
        }
        Ok(())
    }

    pub fn summary(&mut self, summary: &RunSummary) -> Result<()> {
        self.line(&format!(
            "Scenario {} (seed {}), {}..={}",
            summary.scenario, summary.seed, summary.first_year, summary.final_year
        ))?;
        self.line(&format!(
            "Housed {} of {} people, unhoused {}",
            summary.housed, summary.population_target, summary.unhoused
        ))?;
        self.line(&format!(
            "Consumed {} of {} m2, unbuilt area {} m2",
            summary.consumed, summary.area_budget, summary.unbuilt_area
        ))?;
        self.line(&format!(
            "New cells {}, average new occupancy {:.2} people/cell",
            summary.new_cells, summary.average_new_occupancy
        ))?;
        self.line(&format!("Environmental impact {:.4}", summary.impact))?;
        self.flush()
    }

    /// Records a fatal error and its causes without touching the console.
    pub fn failure(&mut self, error: &anyhow::Error) -> Result<()> {
        writeln!(self.writer, "Error: {error}")?;
        for cause in error.chain().skip(1) {
            writeln!(self.writer, "  caused by: {cause}")?;
        }
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
