//! One migration stream: extract, transform and load through a bounded
//! pool, with every record outcome written to the stream's logger in input
//! order.

use std::sync::{Arc, Mutex, PoisonError};

use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use serde_json::Value;

use marcmig_core::error::STAGE_LOAD;
use marcmig_core::transform::parent_id;
use marcmig_core::types::recid_string;
use marcmig_core::ClassifiedError;
use marcmig_reports::{MigrationLogger, RecordState, SuccessState};

use crate::error::PipelineError;
use crate::extract::Extract;
use crate::load::{Load, LoadAction, LoadError};
use crate::transform::{Transform, Transformed};

// ---------------------------------------------------------------------------
// State and statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Configured,
    Running,
    Completed,
    Failed,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub extracted: usize,
    pub loaded: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Loaded, but with non-fatal warnings.
    pub warned: usize,
}

impl StreamStats {
    fn record_load(&mut self, action: LoadAction) {
        self.loaded += 1;
        match action {
            LoadAction::Created => self.created += 1,
            LoadAction::Updated => self.updated += 1,
            LoadAction::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub name: String,
    pub state: StreamState,
    pub stats: StreamStats,
    /// Reason the stream failed.
    pub error: Option<String>,
}

impl StreamReport {
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StreamState::Failed,
            stats: StreamStats::default(),
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

enum Mode {
    Migrate {
        extract: Box<dyn Extract>,
        transform: Arc<dyn Transform>,
    },
    /// Load-only replay of existing data.
    Replay,
}

/// What happened to one record, before anything is logged.
enum Outcome {
    Loaded {
        transformed: Transformed,
        action: LoadAction,
    },
    /// Transformed, then refused by the loader.
    Rejected {
        transformed: Transformed,
        err: ClassifiedError,
        raw: Value,
    },
    Failed {
        err: ClassifiedError,
        raw: Value,
    },
}
pub struct Stream {
    name: String,
    mode: Mode,
    load: Arc<dyn Load>,
    logger: Arc<MigrationLogger>,
    concurrency: usize,
    state: StreamState,
    stats: Mutex<StreamStats>,
}

impl Stream {
    pub fn new(
        name: impl Into<String>,
        extract: Box<dyn Extract>,
        transform: Arc<dyn Transform>,
        load: Arc<dyn Load>,
        logger: Arc<MigrationLogger>,
        concurrency: usize,
    ) -> Self {
        Self::with_mode(name.into(), Mode::Migrate { extract, transform }, load, logger, concurrency)
    }

    pub fn replay(name: impl Into<String>, load: Arc<dyn Load>, logger: Arc<MigrationLogger>) -> Self {
        Self::with_mode(name.into(), Mode::Replay, load, logger, 1)
    }

    fn with_mode(
        name: String,
        mode: Mode,
        load: Arc<dyn Load>,
        logger: Arc<MigrationLogger>,
        concurrency: usize,
    ) -> Self {
        Self {
            name,
            mode,
            load,
            logger,
            concurrency: concurrency.max(1),
            state: StreamState::Configured,
            stats: Mutex::new(StreamStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Run to completion. Never returns an error: a stream that cannot go
    /// on is reported as [`StreamState::Failed`].
    pub async fn run(mut self) -> StreamReport {
        self.state = StreamState::Running;
        tracing::info!(stream = %self.name, concurrency = self.concurrency, "Stream started");

        let mut error = None;
        if let Err(e) = self.process().await {
            tracing::error!(stream = %self.name, error = %e, "Stream failed");
            if let Err(log_err) = self.logger.add_stream_failure(&self.name, &e) {
                tracing::error!(stream = %self.name, error = %log_err, "Failed to log stream failure");
            }
            error = Some(e.to_string());
        }
        if let Err(e) = self.logger.finalise() {
            tracing::error!(stream = %self.name, error = %e, "Failed to finalise migration log");
            error.get_or_insert_with(|| e.to_string());
        }

        self.state = match error {
            Some(_) => StreamState::Failed,
            None => StreamState::Completed,
        };
        let stats = self.stats.into_inner().unwrap_or_else(PoisonError::into_inner);
        tracing::info!(
            stream = %self.name,
            state = %self.state,
            extracted = stats.extracted,
            loaded = stats.loaded,
            failed = stats.failed,
            warned = stats.warned,
            "Stream finished",
        );

        StreamReport {
            name: self.name,
            state: self.state,
            stats,
            error,
        }
    }

    async fn process(&self) -> Result<(), PipelineError> {
        match &self.mode {
            Mode::Migrate { extract, transform } => {
                // An extraction error ends the input, but records already in
                // flight still finish and get logged.
                let mut extract_error = None;
                let records = extract.records()?.map_while(|item| match item {
                    Ok(raw) => Some(raw),
                    Err(e) => {
                        extract_error = Some(e);
                        None
                    }
                });
                // Outcomes are logged in input order.
                futures::stream::iter(records)
                    .map(|raw| self.process_record(transform.as_ref(), raw))
                    .buffered(self.concurrency)
                    .try_for_each(|outcome| futures::future::ready(self.log_outcome(outcome)))
                    .await?;
                if let Some(e) = extract_error {
                    return Err(e);
                }
            }
            Mode::Replay => {
                let loaded = self.load.load_existing().await?;
                self.update_stats(|s| s.loaded += loaded);
            }
        }
        self.load.finish().await?;
        Ok(())
    }

    async fn process_record(&self, transform: &dyn Transform, raw: Value) -> Result<Outcome, PipelineError> {
        let transformed = match transform.transform(&raw) {
            Ok(t) => t,
            Err(err) => return Ok(Outcome::Failed { err, raw }),
        };

        match self.load.load(&transformed.entry).await {
            Ok(action) => Ok(Outcome::Loaded { transformed, action }),
            Err(LoadError::Rejected { message }) => {
                let err = ClassifiedError::unexpected_value(message)
                    .with_stage(STAGE_LOAD)
                    .with_recid(transformed.entry.recid());
                Ok(Outcome::Rejected {
                    transformed,
                    err,
                    raw,
                })
            }
            Err(e @ LoadError::Backend(_)) => Err(e.into()),
        }
    }

    fn log_outcome(&self, outcome: Outcome) -> Result<(), PipelineError> {
        self.update_stats(|s| s.extracted += 1);
        match outcome {
            Outcome::Failed { err, raw } => self.record_failure(&err, Some(&raw)),
            Outcome::Rejected {
                transformed,
                err,
                raw,
            } => {
                self.log_transformed(&transformed)?;
                self.record_failure(&err, Some(&raw))
            }
            Outcome::Loaded { transformed, action } => {
                let recid = self.log_transformed(&transformed)?;
                self.logger.add_success(&recid)?;
                self.logger.add_record_state(&RecordState {
                    recid,
                    parent_id: Some(transformed.entry.parent_id().to_string()),
                    action: action.as_str().to_string(),
                    updated: Some(transformed.entry.record.updated),
                })?;
                let warned = !transformed.warnings.is_empty();
                self.update_stats(|s| {
                    s.record_load(action);
                    if warned {
                        s.warned += 1;
                    }
                });
                Ok(())
            }
        }
    }

    /// Dump the structured record and stage its warnings.
    fn log_transformed(&self, transformed: &Transformed) -> Result<String, PipelineError> {
        let recid = transformed.entry.recid().to_string();
        self.logger
            .add_record(&transformed.entry.legacy_recid, &transformed.structured)?;
        for warning in &transformed.warnings {
            self.logger
                .add_success_state(&recid, SuccessState::from_warning(warning));
        }
        Ok(recid)
    }

    fn record_failure(&self, err: &ClassifiedError, raw: Option<&Value>) -> Result<(), PipelineError> {
        self.logger.add_log(err, raw, None, None)?;
        let recid = err
            .details()
            .recid
            .clone()
            .or_else(|| raw.and_then(|r| r.get("recid")).and_then(recid_string));
        if let Some(recid) = recid {
            self.logger.add_record_state(&RecordState {
                parent_id: Some(parent_id(&recid)),
                recid,
                action: "failed".into(),
                updated: None,
            })?;
        }
        self.update_stats(|s| s.failed += 1);
        Ok(())
    }

    fn update_stats(&self, f: impl FnOnce(&mut StreamStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }
}
