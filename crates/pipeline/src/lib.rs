//! Stream execution for the legacy record migration.
//!
//! A run reads a [`RunConfig`], and for every configured stream builds an
//! [`Extract`] → [`Transform`] → [`Load`] chain through its
//! [`StreamDefinition`]. Records flow through a bounded pool; each record's
//! outcome lands in the stream's [`MigrationLogger`](marcmig_reports::MigrationLogger).

pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod runner;
pub mod stream;
pub mod transform;

pub use config::{RunConfig, StreamConfig, StreamDirs};
pub use error::PipelineError;
pub use extract::{Extract, LegacyExtract};
pub use load::{JsonFileLoader, Load, LoadAction, LoadEntry, LoadError, LoaderOptions};
pub use runner::{RecordStreamDefinition, RunReport, Runner, StreamContext, StreamDefinition};
pub use stream::{Stream, StreamReport, StreamState, StreamStats};
pub use transform::{LegacyRecordTransform, Transform, Transformed};
