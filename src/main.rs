use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod engine;
mod error;
mod estimator;
mod features;
mod models;
mod report;
mod risk;
mod source;
mod store;
mod trainer;
mod trend;

use config::EngineConfig;
use engine::Engine;
use error::EngineError;
use source::MemorySource;

#[derive(Parser)]
#[command(name = "grade-forecast")]
#[command(about = "Student performance forecasting and risk analysis", long_about = None)]
struct Cli {
    /// Read records from a CSV extract instead of Postgres
    #[arg(long, global = true)]
    csv: Option<PathBuf>,

    #[command(flatten)]
    engine: EngineConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on the current records
    Train {
        #[arg(long, default_value = engine::DEFAULT_KIND)]
        kind: String,
        /// Per-course model with trends, evaluated and saved as an artifact
        #[arg(long)]
        advanced: bool,
    },
    /// Predict a student's performance
    Predict {
        #[arg(long)]
        student: i64,
        #[arg(long)]
        course: Option<i64>,
    },
    /// Predict and write a markdown report
    Report {
        #[arg(long)]
        student: i64,
        #[arg(long)]
        course: Option<i64>,
        #[arg(long, default_value = "forecast.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 20)]
        history_limit: usize,
    },
}

async fn load_source(csv: Option<&PathBuf>) -> anyhow::Result<MemorySource> {
    let records = match csv {
        Some(path) => db::load_csv(path)?,
        None => {
            let database_url = std::env::var("DATABASE_URL")
                .context("DATABASE_URL must be set when --csv is not given")?;
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await
                .context("failed to connect to Postgres")?;
            db::fetch_records(&pool).await?
        }
    };
    let source = MemorySource::new(records);
    info!(records = source.len(), "loaded academic records");
    Ok(source)
}

/// Prints a success payload, or the structured error for data shortfalls.
fn emit<T: Serialize>(result: Result<T, EngineError>) -> anyhow::Result<ExitCode> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(EngineError::Data(data)) => {
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let source = load_source(cli.csv.as_ref()).await?;
    let engine = Engine::new(source, cli.engine);

    match cli.command {
        Commands::Train { kind, advanced } => {
            if advanced {
                emit(engine.train_advanced(&kind).map(|(report, _)| report))
            } else {
                emit(engine.train(&kind).map(|(report, _)| report))
            }
        }
        Commands::Predict { student, course } => emit(engine.predict(None, student, course).map(|prediction| {
            info!(model = %prediction.model.id(), student, "prediction served");
            prediction.report
        })),
        Commands::Report {
            student,
            course,
            out,
            history_limit,
        } => {
            let recent = engine.history().recent(history_limit)?;
            match engine.predict(None, student, course) {
                Ok(prediction) => {
                    info!(model = %prediction.model.id(), earlier = recent.len(), "building report");
                    let markdown = report::build_report(&prediction.report, &recent);
                    std::fs::write(&out, markdown)
                        .with_context(|| format!("failed to write {}", out.display()))?;
                    println!("Report written to {}.", out.display());
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => emit::<()>(Err(err)),
            }
        }
    }
}
