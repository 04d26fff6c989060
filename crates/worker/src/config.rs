use std::path::PathBuf;

use anyhow::{bail, Context};

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Path of the YAML run configuration.
    pub run_config: PathBuf,
    /// Transform and log everything, persist nothing.
    pub dry_run: bool,
    /// Only run these streams, when set.
    pub streams: Option<Vec<String>>,
    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var              | Default  |
    /// |----------------------|----------|
    /// | `MIGRATION_CONFIG`   | required |
    /// | `MIGRATION_DRY_RUN`  | `false`  |
    /// | `MIGRATION_STREAMS`  | all      |
    /// | `LOG_FORMAT`         | `text`   |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let run_config: PathBuf = var("MIGRATION_CONFIG")
            .filter(|v| !v.trim().is_empty())
            .context("MIGRATION_CONFIG environment variable is required")?
            .into();

        let dry_run = match var("MIGRATION_DRY_RUN") {
            Some(v) => parse_bool(&v).context("MIGRATION_DRY_RUN must be true or false")?,
            None => false,
        };

        let streams = var("MIGRATION_STREAMS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|names| !names.is_empty());

        let json_logs = match var("LOG_FORMAT").as_deref() {
            None | Some("text") => false,
            Some("json") => true,
            Some(other) => bail!("LOG_FORMAT must be text or json, got {other}"),
        };

        Ok(Self {
            run_config,
            dry_run,
            streams,
            json_logs,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}
