//! Runs the configured streams one after another.
//!
//! Each stream gets its own logger in its own log directory and runs in its
//! own task, so a panic or fatal error in one stream is recorded and the
//! runner moves on to the next.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use marcmig_reports::{LogPaths, MigrationLogger};

use crate::config::{resolve_path, stage_config, RunConfig, StreamConfig, StreamDirs};
use crate::error::PipelineError;
use crate::extract::{Extract, LegacyExtract};
use crate::load::{JsonFileLoader, Load, LoaderOptions};
use crate::stream::{Stream, StreamReport, StreamState};
use crate::transform::{LegacyRecordTransform, Transform};

/// Store file of the file-backed loader, inside the stream's state dir.
pub const STORE_FILE: &str = "records.json";
/// Journal file of the file-backed loader, inside the stream's tmp dir.
pub const JOURNAL_FILE: &str = "journal.jsonl";

// ---------------------------------------------------------------------------
// Stream definitions
// ---------------------------------------------------------------------------

/// Everything a definition needs to build the stages of one stream.
#[derive(Debug, Clone)]
pub struct StreamContext {
    pub name: String,
    pub config: StreamConfig,
    pub dirs: StreamDirs,
    pub dry_run: bool,
}

/// A named kind of stream and the factories for its stages.
#[async_trait]
pub trait StreamDefinition: Send + Sync {
    fn name(&self) -> &str;

    fn build_extract(&self, ctx: &StreamContext) -> Result<Box<dyn Extract>, PipelineError>;

    fn build_transform(&self, ctx: &StreamContext) -> Result<Arc<dyn Transform>, PipelineError>;

    async fn build_load(&self, ctx: &StreamContext) -> Result<Arc<dyn Load>, PipelineError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtractConfig {
    /// Dump directory, relative to the stream's data dir.
    dirpath: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoadConfig {
    store_file: Option<String>,
}

/// The legacy record stream: dump directory to JSON file store.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordStreamDefinition;

#[async_trait]
impl StreamDefinition for RecordStreamDefinition {
    fn name(&self) -> &str {
        "records"
    }

    fn build_extract(&self, ctx: &StreamContext) -> Result<Box<dyn Extract>, PipelineError> {
        let config: ExtractConfig = stage_config(&ctx.config.extract)?;
        let dirpath = match config.dirpath {
            Some(dir) => resolve_path(&ctx.dirs.data_dir, &dir),
            None => ctx.dirs.data_dir.clone(),
        };
        Ok(Box::new(LegacyExtract::new(dirpath)))
    }

    fn build_transform(&self, ctx: &StreamContext) -> Result<Arc<dyn Transform>, PipelineError> {
        Ok(Arc::new(LegacyRecordTransform::from_config(&ctx.config.transform)?))
    }

    async fn build_load(&self, ctx: &StreamContext) -> Result<Arc<dyn Load>, PipelineError> {
        let config: LoadConfig = stage_config(&ctx.config.load)?;
        let store_file = config.store_file.as_deref().unwrap_or(STORE_FILE);
        let loader = JsonFileLoader::open(LoaderOptions {
            store_path: ctx.dirs.state_dir.join(store_file),
            journal_path: ctx.dirs.tmp_dir.join(JOURNAL_FILE),
            existing_data: ctx
                .config
                .existing_data
                .as_deref()
                .map(|p| resolve_path(&ctx.dirs.data_dir, p)),
            dry_run: ctx.dry_run,
        })
        .await?;
        Ok(Arc::new(loader))
    }
}

// ---------------------------------------------------------------------------
// Run report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub streams: Vec<StreamReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.streams.iter().any(|s| s.state == StreamState::Failed)
    }

    pub fn stream(&self, name: &str) -> Option<&StreamReport> {
        self.streams.iter().find(|s| s.name == name)
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct Runner {
    config: RunConfig,
    definitions: Vec<Arc<dyn StreamDefinition>>,
    dry_run: bool,
    only: Option<Vec<String>>,
}

impl Runner {
    /// A runner over the built-in stream definitions.
    pub fn new(config: RunConfig) -> Self {
        Self::with_definitions(config, vec![Arc::new(RecordStreamDefinition)])
    }

    pub fn with_definitions(config: RunConfig, definitions: Vec<Arc<dyn StreamDefinition>>) -> Self {
        Self {
            config,
            definitions,
            dry_run: false,
            only: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Restrict the run to the named streams.
    pub fn only(mut self, names: Vec<String>) -> Self {
        self.only = Some(names);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Attempt every configured stream. Errors only when the global
    /// directories cannot be created.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        self.config.ensure_dirs()?;

        for name in self.config.streams.keys() {
            if !self.definitions.iter().any(|d| d.name() == name) {
                tracing::warn!(stream = %name, "No definition for configured stream");
            }
        }

        let mut report = RunReport::default();
        for definition in &self.definitions {
            let name = definition.name().to_string();
            let Some(config) = self.config.stream(&name) else {
                tracing::debug!(stream = %name, "Stream not configured, skipping");
                continue;
            };
            if let Some(only) = &self.only {
                if !only.iter().any(|n| n == &name) {
                    tracing::debug!(stream = %name, "Stream filtered out, skipping");
                    continue;
                }
            }

            let ctx = StreamContext {
                dirs: self.config.stream_dirs(&name),
                config: config.clone(),
                dry_run: self.dry_run,
                name,
            };
            report.streams.push(self.run_stream(definition.as_ref(), ctx).await);
        }

        tracing::info!(
            streams = report.streams.len(),
            failed = report.streams.iter().filter(|s| s.state == StreamState::Failed).count(),
            "Migration run finished",
        );
        Ok(report)
    }

    async fn run_stream(&self, definition: &dyn StreamDefinition, ctx: StreamContext) -> StreamReport {
        let logger = match MigrationLogger::start_log(LogPaths::in_dir(&ctx.dirs.log_dir)) {
            Ok(logger) => Arc::new(logger),
            Err(e) => {
                tracing::error!(stream = %ctx.name, error = %e, "Cannot start migration log");
                return StreamReport::failed(ctx.name, e.to_string());
            }
        };

        let stream = match self.build_stream(definition, &ctx, Arc::clone(&logger)).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(stream = %ctx.name, error = %e, "Cannot build stream");
                abandon(&logger, &ctx.name, &e);
                return StreamReport::failed(ctx.name, e.to_string());
            }
        };

        match tokio::spawn(stream.run()).await {
            Ok(report) => report,
            Err(join) => {
                let e = PipelineError::Task(join.to_string());
                tracing::error!(stream = %ctx.name, error = %e, "Stream task aborted");
                abandon(&logger, &ctx.name, &e);
                StreamReport::failed(ctx.name, e.to_string())
            }
        }
    }

    async fn build_stream(
        &self,
        definition: &dyn StreamDefinition,
        ctx: &StreamContext,
        logger: Arc<MigrationLogger>,
    ) -> Result<Stream, PipelineError> {
        let load = definition.build_load(ctx).await?;
        if ctx.config.existing_data.is_some() {
            tracing::info!(stream = %ctx.name, "Replaying existing data, extract and transform skipped");
            return Ok(Stream::replay(ctx.name.clone(), load, logger));
        }
        let extract = definition.build_extract(ctx)?;
        let transform = definition.build_transform(ctx)?;
        Ok(Stream::new(
            ctx.name.clone(),
            extract,
            transform,
            load,
            logger,
            self.config.stream_concurrency(&ctx.name),
        ))
    }
}

/// Record a stream that never finished and close its log.
fn abandon(logger: &MigrationLogger, stream: &str, err: &PipelineError) {
    if let Err(e) = logger.add_stream_failure(stream, err) {
        tracing::error!(stream, error = %e, "Failed to log stream failure");
    }
    if let Err(e) = logger.finalise() {
        tracing::error!(stream, error = %e, "Failed to finalise migration log");
    }
}
