/// Run defaults
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const ENV_OUTPUT_DIR: &str = "URBASIM_OUTPUT_DIR";

/// Growth rate ceiling (annual, 3 %)
pub const DEFAULT_MAX_GROWTH_RATE: f64 = 0.03;

/// Reducing scenario: per-capita ground consumption ends at this share of its start value
pub const REDUCING_FLOOR_SHARE: f64 = 0.25;

/// Contiguity defaults (window in cells, fraction band)
pub const DEFAULT_CONTIGUITY_WINDOW: usize = 3;
pub const DEFAULT_CONTIGUITY_MIN: f64 = 0.0;
pub const DEFAULT_CONTIGUITY_MAX: f64 = 1.0;

/// Expected headers of the lookup tables
pub const DISTRIBUTION_HEADERS: [&str; 4] = ["district", "value", "fitted", "unfit"];
pub const DISTRICT_HEADERS: [&str; 3] = ["district", "m2_per_person", "residential_share"];
pub const HISTORY_HEADERS: [&str; 3] = ["year", "population", "ground_area"];

/// Output layer names
pub const LAYER_URBANIZED: &str = "urbanized";
pub const LAYER_GROUND: &str = "ground_area";
pub const LAYER_GROUND_RES: &str = "ground_area_res";
pub const LAYER_FLOOR: &str = "floor_area";
pub const LAYER_POPULATION: &str = "population";
pub const LAYER_ARTIF_RATE: &str = "artificialization_rate";
pub const LAYER_EXPANSION: &str = "expansion";
pub const LAYER_FORCED_DENSIFICATION: &str = "densification_forced";
pub const LAYER_OLD_DENSIFICATION: &str = "densification_old";
pub const LAYER_HEATMAP: &str = "heatmap";
