use crate::{
    constants::{
        DEFAULT_CONTIGUITY_MAX, DEFAULT_CONTIGUITY_MIN, DEFAULT_CONTIGUITY_WINDOW,
        DEFAULT_MAX_GROWTH_RATE, DEFAULT_OUTPUT_DIR, DEFAULT_SEED, ENV_OUTPUT_DIR,
    },
    error::{Result, UrbaSimError},
};
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    str::FromStr,
};
use strum_macros::{Display, EnumString};

/// Per-capita ground consumption policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Scenario {
    /// Compounds at the historical trend rate.
    #[strum(to_string = "trend", serialize = "trend-following")]
    Trend,
    /// Held at the last observed value.
    Stable,
    /// Decays linearly towards a quarter of its start value.
    Reducing,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub grid: GridConfig,
    pub inputs: InputsConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub constraints: ConstraintsConfig,
    #[serde(default)]
    pub contiguity: ContiguityConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_final_year")]
    pub final_year: i32,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Write every layer at each year-close.
    #[serde(default)]
    pub snapshots: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            final_year: default_final_year(),
            output_dir: default_output_dir(),
            snapshots: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GridConfig {
    /// Cell side in metres.
    #[serde(default = "default_cell_size")]
    pub cell_size: f64,
    #[serde(default)]
    pub projection: Option<String>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: default_cell_size(),
            projection: None,
        }
    }
}

/// Input files, relative to `dir` unless absolute.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputsConfig {
    #[serde(default)]
    pub dir: PathBuf,
    pub district: PathBuf,
    pub capacity: PathBuf,
    #[serde(default)]
    pub restriction: Option<PathBuf>,
    #[serde(default)]
    pub zoning_restriction: Option<PathBuf>,
    #[serde(default)]
    pub zoning_priority: Option<PathBuf>,
    #[serde(default)]
    pub artif_ratio: Option<PathBuf>,
    #[serde(default)]
    pub ecology: Option<PathBuf>,
    #[serde(default)]
    pub built: Option<PathBuf>,
    #[serde(default)]
    pub ground: Option<PathBuf>,
    #[serde(default)]
    pub ground_res: Option<PathBuf>,
    #[serde(default)]
    pub floor: Option<PathBuf>,
    #[serde(default)]
    pub population: Option<PathBuf>,
    pub floors_table: PathBuf,
    pub footprints_table: PathBuf,
    pub districts_table: PathBuf,
    pub history_table: PathBuf,
    #[serde(default)]
    pub amenities: Vec<AmenityLayer>,
}

impl InputsConfig {
    pub fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.dir.join(file)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AmenityLayer {
    pub name: String,
    pub file: PathBuf,
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_scenario")]
    pub name: String,
    /// Overrides the growth rate derived from history.
    #[serde(default)]
    pub growth_rate: Option<f64>,
    #[serde(default = "default_max_growth_rate")]
    pub max_growth_rate: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            name: default_scenario(),
            growth_rate: None,
            max_growth_rate: default_max_growth_rate(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub zoning_priority: bool,
    #[serde(default)]
    pub build_non_residential: bool,
    /// Densify cells built this year when the target is missed.
    #[serde(default)]
    pub force_densify: bool,
    /// Densify the whole residential stock in the final year.
    #[serde(default)]
    pub densify_old: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConstraintsConfig {
    #[serde(default = "default_saturation_pct")]
    pub saturation_pct: f64,
    /// Cells whose historical artificialization ratio exceeds this are excluded.
    #[serde(default = "default_exclusion_ratio")]
    pub exclusion_ratio: f64,
    #[serde(default)]
    pub max_m2_per_person: Option<f64>,
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        Self {
            saturation_pct: default_saturation_pct(),
            exclusion_ratio: default_exclusion_ratio(),
            max_m2_per_person: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContiguityConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_contiguity_min")]
    pub min: f64,
    #[serde(default = "default_contiguity_max")]
    pub max: f64,
}

impl Default for ContiguityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: default_window(),
            min: default_contiguity_min(),
            max: default_contiguity_max(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllocationConfig {
    #[serde(default = "default_true")]
    pub use_distributions: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            use_distributions: true,
        }
    }
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}
fn default_final_year() -> i32 {
    2040
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}
fn default_cell_size() -> f64 {
    50.0
}
fn default_scenario() -> String {
    Scenario::Trend.to_string()
}
fn default_max_growth_rate() -> f64 {
    DEFAULT_MAX_GROWTH_RATE
}
fn default_saturation_pct() -> f64 {
    100.0
}
fn default_exclusion_ratio() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}
fn default_window() -> usize {
    DEFAULT_CONTIGUITY_WINDOW
}
fn default_contiguity_min() -> f64 {
    DEFAULT_CONTIGUITY_MIN
}
fn default_contiguity_max() -> f64 {
    DEFAULT_CONTIGUITY_MAX
}

impl Config {
    /// Reads, applies environment overrides and validates a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            UrbaSimError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses without validating.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `URBASIM_OUTPUT_DIR` replaces the configured output directory.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(output_dir) = env::var(ENV_OUTPUT_DIR)
            && !output_dir.trim().is_empty()
        {
            let path = PathBuf::from(output_dir.trim());

            // If the path already exists but is not a directory, reject early.
            if path.exists() && !path.is_dir() {
                return Err(UrbaSimError::Config(format!(
                    "Output path is not a directory: {}",
                    path.display()
                )));
            }
            self.run.output_dir = path;
        }
        Ok(())
    }

    pub fn scenario(&self) -> Result<Scenario> {
        Scenario::from_str(self.scenario.name.trim())
            .map_err(|_| UrbaSimError::UnknownScenario(self.scenario.name.clone()))
    }

    pub fn validate(&self) -> Result<()> {
        self.scenario()?;

        let c = &self.contiguity;
        if !(0.0..=1.0).contains(&c.min) || !(0.0..=1.0).contains(&c.max) {
            return Err(UrbaSimError::Config(format!(
                "contiguity band must lie in [0, 1], got [{}, {}]",
                c.min, c.max
            )));
        }
        if c.min >= c.max {
            return Err(UrbaSimError::Config(format!(
                "contiguity band is inverted: min {} >= max {}",
                c.min, c.max
            )));
        }
        if c.window < 3 || c.window % 2 == 0 {
            return Err(UrbaSimError::Config(format!(
                "contiguity window must be an odd size >= 3, got {}",
                c.window
            )));
        }

        let s = &self.scenario;
        if let Some(rate) = s.growth_rate
            && rate > s.max_growth_rate
        {
            return Err(UrbaSimError::GrowthRateTooHigh {
                rate,
                ceiling: s.max_growth_rate,
            });
        }

        let k = &self.constraints;
        if !(0.0..=100.0).contains(&k.saturation_pct) {
            return Err(UrbaSimError::Config(format!(
                "saturation_pct must be between 0 and 100, got {}",
                k.saturation_pct
            )));
        }
        if !(0.0..=1.0).contains(&k.exclusion_ratio) {
            return Err(UrbaSimError::Config(format!(
                "exclusion_ratio must be between 0 and 1, got {}",
                k.exclusion_ratio
            )));
        }
        if let Some(cap) = k.max_m2_per_person
            && cap <= 0.0
        {
            return Err(UrbaSimError::Config(format!(
                "max_m2_per_person must be positive, got {}",
                cap
            )));
        }

        if self.grid.cell_size <= 0.0 {
            return Err(UrbaSimError::Config(format!(
                "cell_size must be positive, got {}",
                self.grid.cell_size
            )));
        }
        if let Some(layer) = self.inputs.amenities.iter().find(|a| a.weight < 0.0) {
            return Err(UrbaSimError::Config(format!(
                "amenity layer '{}' has a negative weight",
                layer.name
            )));
        }
        Ok(())
    }
}
