use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};
use std::{io::Write, path::PathBuf};
use urbasim::{Config, RunLog, Simulation, UrbaSimError};

#[derive(Parser)]
#[command(author, version, about = "Simulate urban land consumption on a raster grid", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Random seed (overrides [run].seed)
    #[arg(long)]
    seed: Option<u64>,

    /// Last simulated year (overrides [run].final_year)
    #[arg(long)]
    final_year: Option<i32>,

    /// trend, stable or reducing (overrides [scenario].name)
    #[arg(long)]
    scenario: Option<String>,

    /// Output directory (overrides [run].output_dir and URBASIM_OUTPUT_DIR)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

fn main() {
    // Initialize logger - defaults to RUST_LOG if set, otherwise INFO
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    let args = Args::parse();

    let simulation = match prepare(&args) {
        Ok(simulation) => simulation,
        Err(e) => exit_with(&e, None),
    };

    info!("Output directory: {}", simulation.output_dir().display());
    let mut run_log = match RunLog::create(simulation.output_dir()) {
        Ok(log) => log,
        Err(e) => exit_with(&anyhow::Error::from(e), None),
    };

    match simulation.run(&mut run_log).context("Simulation aborted") {
        Ok(output) => {
            info!(
                "Done: housed {} of {} people on {} new cells",
                output.summary.housed, output.summary.population_target, output.summary.new_cells
            );
            debug!("Run log: {}", run_log.path().display());
            std::process::exit(0);
        }
        Err(e) => exit_with(&e, Some(&mut run_log)),
    }
}

/// Loads the configuration, applies CLI overrides and reads every input.
fn prepare(args: &Args) -> Result<Simulation> {
    let mut config = Config::load_from_file(&args.config)?;
    if let Some(seed) = args.seed {
        config.run.seed = seed;
    }
    if let Some(year) = args.final_year {
        config.run.final_year = year;
    }
    if let Some(ref name) = args.scenario {
        config.scenario.name = name.clone();
    }
    if let Some(ref dir) = args.output_dir {
        config.run.output_dir = dir.clone();
    }
    config.validate()?;
    info!("Loaded configuration from {}", args.config.display());

    let simulation = Simulation::setup(&config)
        .with_context(|| format!("Failed to prepare inputs from {}", config.inputs.dir.display()))?;
    Ok(simulation)
}

fn exit_with(e: &anyhow::Error, run_log: Option<&mut RunLog>) -> ! {
    error!("Error: {e}");
    for cause in e.chain().skip(1) {
        error!("  caused by: {cause}");
    }

    let is_configuration = e
        .chain()
        .filter_map(|cause| cause.downcast_ref::<UrbaSimError>())
        .any(UrbaSimError::is_configuration);

    // Provide helpful hints for common errors
    use std::io::ErrorKind;
    for cause in e.chain().skip(1) {
        if let Some(ioe) = cause.downcast_ref::<std::io::Error>() {
            match ioe.kind() {
                ErrorKind::PermissionDenied => {
                    error!("Hint: Run in a writable directory or set URBASIM_OUTPUT_DIR.");
                    break;
                }
                ErrorKind::NotFound => {
                    error!("Hint: Check [inputs].dir in the configuration file.");
                    break;
                }
                ErrorKind::Other if format!("{ioe}").contains("No space left") => {
                    error!("Hint: Check available disk space.");
                    break;
                }
                _ => {}
            }
        }
    }

    if let Some(log) = run_log {
        let _ = log.failure(e);
    }
    let _ = std::io::stderr().flush();
    std::process::exit(if is_configuration { 2 } else { 1 });
}
