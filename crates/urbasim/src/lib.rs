pub mod allocator;
pub mod budget;
pub mod config;
pub mod constants;
pub mod contiguity;
pub mod csv_reader;
pub mod distribution;
pub mod driver;
pub mod error;
pub mod export;
pub mod grid;
pub mod interest;
pub mod report;
pub mod sampler;
pub mod simulation;
pub mod state;

pub use allocator::Allocator;
pub use budget::{BudgetPlan, History, HistoryPoint, YearBudget, plan};
pub use config::{Config, Scenario};
pub use constants::{DEFAULT_SEED, ENV_OUTPUT_DIR};
pub use contiguity::{ContiguityGate, local_built_fraction};
pub use distribution::{Distribution, DistributionTables, DistrictNorms};
pub use driver::{Driver, DriverSettings, YearOutcome, YearTargets};
pub use error::{Result, UrbaSimError};
pub use grid::{Cell, Grid};
pub use report::{RunLog, RunSummary};
pub use sampler::Sampler;
pub use simulation::{Inputs, RunOutput, Simulation, plan_from_config};
pub use state::{Layers, Provisional, UrbanState};
