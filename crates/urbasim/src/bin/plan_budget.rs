use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use urbasim::{Config, plan_from_config};

#[derive(Parser)]
#[command(author, version, about = "Print the yearly population and area budgets of a scenario", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// trend, stable or reducing (overrides [scenario].name)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Last planned year (overrides [run].final_year)
    #[arg(long)]
    final_year: Option<i32>,

    /// Emit JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
    let args = Args::parse();

    let mut config = Config::load_from_file(&args.config)?;
    if let Some(name) = args.scenario {
        config.scenario.name = name;
    }
    if let Some(year) = args.final_year {
        config.run.final_year = year;
    }
    config.validate()?;

    let (history, plan) = plan_from_config(&config).context("Failed to plan the budget")?;
    info!(
        "Reference years {} and {}, growth rate {:.4}, consumption trend {:.4}",
        history.first.year, history.last.year, plan.growth_rate, plan.consumption_trend
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("{:>6} {:>12} {:>14} {:>10}", "year", "population", "area_m2", "m2/person");
    for (year, budget) in &plan.years {
        let per_capita = if budget.population > 0 {
            f64::from(budget.area) / f64::from(budget.population)
        } else {
            0.0
        };
        println!(
            "{:>6} {:>12} {:>14} {:>10.1}",
            year, budget.population, budget.area, per_capita
        );
    }
    println!(
        "{:>6} {:>12} {:>14}",
        "total",
        plan.total_population(),
        plan.total_area()
    );
    Ok(())
}
