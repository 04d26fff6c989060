use std::path::PathBuf;

use marcmig_core::CoreError;
use marcmig_reports::ReportError;

use crate::load::LoadError;

/// Failures that stop a whole stream (or the run, during setup).
///
/// Per-record problems are [`ClassifiedError`](marcmig_core::ClassifiedError)s
/// and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed dump file {}: {reason}", path.display())]
    MalformedDump { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("Loader failed: {0}")]
    Load(#[from] LoadError),

    #[error("Stream task aborted: {0}")]
    Task(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
