//! `marcmig-worker` -- runs the configured migration streams.
//!
//! Reads the run configuration named by `MIGRATION_CONFIG`, runs every
//! configured stream in turn, and exits non-zero if any stream failed.
//! Per-record failures never affect the exit code; they are in each
//! stream's `migration_errors.csv`.
//!
//! # Environment variables
//!
//! | Variable            | Required | Default | Description                              |
//! |---------------------|----------|---------|------------------------------------------|
//! | `MIGRATION_CONFIG`  | yes      | --      | Path of the YAML run configuration       |
//! | `MIGRATION_DRY_RUN` | no       | `false` | Transform and log, persist nothing       |
//! | `MIGRATION_STREAMS` | no       | all     | Comma-separated streams to run           |
//! | `LOG_FORMAT`        | no       | `text`  | `json` for structured log lines          |
//! | `RUST_LOG`          | no       | `info`  | Tracing filter                           |

mod config;

use std::process::ExitCode;

use marcmig_pipeline::{RunConfig, Runner};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::WorkerConfig;

const DEFAULT_FILTER: &str = "marcmig_worker=info,marcmig_pipeline=info,marcmig_reports=info";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(false);
            tracing::error!(error = %e, "Invalid worker configuration");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.json_logs);

    match run(config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Migration aborted");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Returns whether every stream completed.
async fn run(config: WorkerConfig) -> anyhow::Result<bool> {
    let run_config = RunConfig::from_path(&config.run_config)?;

    tracing::info!(
        config = %config.run_config.display(),
        dry_run = config.dry_run,
        streams = ?run_config.streams.keys().collect::<Vec<_>>(),
        concurrency = run_config.concurrency,
        "Starting marcmig-worker",
    );

    let mut runner = Runner::new(run_config).dry_run(config.dry_run);
    if let Some(streams) = config.streams {
        runner = runner.only(streams);
    }
    let report = runner.run().await?;

    for stream in &report.streams {
        tracing::info!(
            stream = %stream.name,
            state = %stream.state,
            stats = %serde_json::to_string(&stream.stats)?,
            "Stream summary",
        );
    }
    Ok(!report.has_failures())
}
