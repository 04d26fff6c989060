//! Migration report files.
//!
//! - [`MigrationLogger`]: per-stream writer for the tabular log, the
//!   full-record dump and the record state dump.
//! - [`LogEntry`], [`SuccessState`], [`RecordState`]: the rows it writes.
//! - [`repair_json_dump`]: closes dumps left open by an interrupted run.
//! - [`read_log`], [`load_record_dumps`], [`load_record_states`]: read-back.

pub mod entry;
pub mod error;
pub mod logger;
pub mod reader;
pub mod recovery;

pub use entry::{LogEntry, RecordState, SuccessState};
pub use error::ReportError;
pub use logger::{LogPaths, MigrationLogger};
pub use reader::{load_record_dumps, load_record_states, read_log};
pub use recovery::repair_json_dump;
