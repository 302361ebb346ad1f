use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod batch;
mod config;
mod crosswalk;
mod db;
mod error;
mod estimator;
mod models;
mod sink;
mod smoothing;
mod source;

use config::{EstimatorConfig, PipelineConfig};
use crosswalk::{Crosswalk, RegionLookup};
use sink::{CsvDirSink, EstimateSink};

#[derive(Parser)]
#[command(name = "rt-estimates")]
#[command(about = "State and district Rt estimation from daily case counts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Import case counts from CSV files into the database
    Import {
        #[arg(long, required = true)]
        csv: Vec<PathBuf>,
    },
    /// Estimate Rt for a state and its districts
    Estimate {
        /// State code or name, e.g. MH or Maharashtra
        #[arg(long)]
        state: String,
        /// Case-count CSV files; reads from the database when omitted
        #[arg(long)]
        cases: Vec<PathBuf>,
        /// Region crosswalk CSV; the built-in state table is used when omitted
        #[arg(long)]
        crosswalk: Option<PathBuf>,
        #[arg(long, default_value = "estimates")]
        out: PathBuf,
        #[arg(long, default_value_t = config::DEFAULT_GAMMA)]
        gamma: f64,
        #[arg(long, default_value_t = config::DEFAULT_CI)]
        ci: f64,
        #[arg(long, default_value_t = config::DEFAULT_SMOOTHING_WINDOW)]
        smoothing: usize,
        #[arg(long, default_value_t = config::DEFAULT_LOOKBACK)]
        lookback: usize,
        #[arg(long, default_value_t = config::DEFAULT_CUTOFF)]
        cutoff: usize,
        /// Treat counts as cumulative totals instead of daily increments
        #[arg(long)]
        totals: bool,
        /// Additional districts to skip
        #[arg(long)]
        exclude: Vec<String>,
        /// Also write the estimates to the database
        #[arg(long)]
        store: bool,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rt_estimates=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let mut imported = 0u64;
            for path in &csv {
                let records = source::load_records(path)?;
                let affected = db::import_records(&pool, &records).await?;
                println!("Imported {affected} case counts from {}.", path.display());
                imported += affected;
            }
            println!("{imported} case counts imported in total.");
        }
        Commands::Estimate {
            state,
            cases,
            crosswalk,
            out,
            gamma,
            ci,
            smoothing,
            lookback,
            cutoff,
            totals,
            exclude,
            store,
        } => {
            let lookup = match crosswalk {
                Some(path) => Crosswalk::from_path(&path)?,
                None => Crosswalk::builtin()?,
            };
            let state_code = match lookup.state_name(&state) {
                Some(_) => state.trim().to_uppercase(),
                None => lookup
                    .state_code(&state)
                    .with_context(|| format!("unknown state {state}"))?
                    .to_string(),
            };
            let state_name = lookup
                .state_name(&state_code)
                .with_context(|| format!("unknown state code {state_code}"))?
                .to_string();

            let mut pipeline = PipelineConfig {
                estimator: EstimatorConfig {
                    gamma,
                    ci,
                    smoothing_window: smoothing,
                    totals,
                    ..EstimatorConfig::default()
                },
                lookback,
                cutoff,
                ..PipelineConfig::default()
            };
            pipeline.excluded_districts.extend(exclude);

            let pool = if store || cases.is_empty() {
                Some(connect().await?)
            } else {
                None
            };

            let table = match &pool {
                Some(pool) if cases.is_empty() => db::fetch_cases(pool, &state_name).await?,
                _ => source::load_case_table(&cases)?,
            };

            if table.is_empty() {
                anyhow::bail!("no case counts found for {state_name}");
            }

            let report = batch::estimate_state(&table, &lookup, &state_code, &pipeline)?;

            let mut sink = CsvDirSink::new(&out)?;
            sink.publish(&report)?;

            if let Err(err) = &report.state_result {
                println!("State-level estimate for {state_name} failed: {err}");
            }
            println!(
                "Run {}: {} districts estimated, {} failed.",
                report.run_id,
                report.succeeded().count(),
                report.failed().count()
            );
            for (district, rt) in report.top_districts(pipeline.top_n) {
                println!("- {district}: Rt {rt:.2}");
            }
            for path in sink.written() {
                println!("Wrote {}.", path.display());
            }

            if store {
                if let Some(pool) = &pool {
                    let stored = db::store_report(pool, &report).await?;
                    println!("Stored {stored} estimate rows.");
                }
            }
        }
    }

    Ok(())
}
