//! The per-stream migration logger.
//!
//! A [`MigrationLogger`] owns three files in a stream's log directory:
//!
//! | File                   | Content                                        |
//! |------------------------|------------------------------------------------|
//! | `migration_errors.csv` | one row per failure or clean success           |
//! | `records_dump.json`    | object of legacy recid to structured record    |
//! | `records_state.json`   | array of per-record load outcomes              |
//!
//! The JSON dumps are written incrementally as `entry,\n` lines and closed
//! by [`MigrationLogger::finalise`]. A crash leaves them one bracket short;
//! [`repair_json_dump`](crate::repair_json_dump) fixes that.

use std::collections::HashMap;
use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;

use marcmig_core::error::ClassifiedError;
use marcmig_core::types::recid_string;

use crate::entry::{render_value, LogEntry, RecordState, SuccessState, LOG_COLUMNS};
use crate::error::ReportError;

pub const ERRORS_FILE: &str = "migration_errors.csv";
pub const RECORDS_FILE: &str = "records_dump.json";
pub const STATES_FILE: &str = "records_state.json";

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub errors: PathBuf,
    pub records: PathBuf,
    pub states: PathBuf,
}

impl LogPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            errors: dir.join(ERRORS_FILE),
            records: dir.join(RECORDS_FILE),
            states: dir.join(STATES_FILE),
        }
    }
}

// ---------------------------------------------------------------------------
// Incremental JSON dump
// ---------------------------------------------------------------------------

/// A JSON object or array written one `entry,\n` line at a time.
#[derive(Debug)]
struct JsonDump {
    path: PathBuf,
    file: File,
    close: &'static str,
    entries: usize,
}

impl JsonDump {
    fn create(path: &Path, open: &str, close: &'static str) -> Result<Self, ReportError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ReportError::io(path, e))?;
        file.write_all(open.as_bytes())
            .map_err(|e| ReportError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            close,
            entries: 0,
        })
    }

    fn append(&mut self, entry: &str) -> Result<(), ReportError> {
        self.file
            .write_all(format!("{entry},\n").as_bytes())
            .map_err(|e| ReportError::io(&self.path, e))?;
        self.entries += 1;
        Ok(())
    }

    /// Drop the trailing `,\n` and close the bracket.
    fn finish(mut self) -> Result<(), ReportError> {
        let io = |e| ReportError::io(&self.path, e);
        if self.entries > 0 {
            let len = self.file.metadata().map_err(io)?.len();
            self.file.set_len(len.saturating_sub(2)).map_err(io)?;
            self.file.seek(SeekFrom::End(0)).map_err(io)?;
            self.file.write_all(b"\n").map_err(io)?;
        }
        self.file.write_all(self.close.as_bytes()).map_err(io)?;
        self.file.write_all(b"\n").map_err(io)?;
        self.file.sync_all().map_err(io)
    }
}

// ---------------------------------------------------------------------------
// MigrationLogger
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct LogFiles {
    errors: Option<csv::Writer<File>>,
    records: Option<JsonDump>,
    states: Option<JsonDump>,
    /// Success state staged per recid until the record's outcome is known.
    staged: HashMap<String, SuccessState>,
}

/// Report writer for one stream, shared across pool workers as
/// `Arc<MigrationLogger>`.
///
/// Every write takes the same lock, so rows and dump entries never
/// interleave. The tabular log is flushed after every row.
#[derive(Debug)]
pub struct MigrationLogger {
    paths: LogPaths,
    files: Mutex<LogFiles>,
}

impl MigrationLogger {
    /// Create (or truncate) the three report files and write their headers.
    pub fn start_log(paths: LogPaths) -> Result<Self, ReportError> {
        for path in [&paths.errors, &paths.records, &paths.states] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| ReportError::io(parent, e))?;
            }
        }

        let mut errors = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&paths.errors)?;
        errors.write_record(LOG_COLUMNS)?;
        errors.flush().map_err(|e| ReportError::io(&paths.errors, e))?;

        let records = JsonDump::create(&paths.records, "{\n", "}")?;
        let states = JsonDump::create(&paths.states, "[\n", "]")?;

        tracing::debug!(path = %paths.errors.display(), "Migration log started");

        Ok(Self {
            paths,
            files: Mutex::new(LogFiles {
                errors: Some(errors),
                records: Some(records),
                states: Some(states),
                staged: HashMap::new(),
            }),
        })
    }

    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    /// Append a structured record to the full-record dump.
    pub fn add_record<T: Serialize>(&self, legacy_recid: &str, record: &T) -> Result<(), ReportError> {
        let entry = format!(
            "{}: {}",
            serde_json::to_string(legacy_recid)?,
            serde_json::to_string(record)?
        );
        let mut files = self.lock();
        files.records.as_mut().ok_or(ReportError::NotStarted)?.append(&entry)
    }

    /// Append one record outcome to the state dump.
    pub fn add_record_state(&self, state: &RecordState) -> Result<(), ReportError> {
        let entry = serde_json::to_string(state)?;
        let mut files = self.lock();
        files.states.as_mut().ok_or(ReportError::NotStarted)?.append(&entry)
    }

    /// Write a failure row for `err`.
    ///
    /// The recid comes from the error, else from the `record` payload
    /// (`recid`, then `record.recid`). `key` and `value` fill the field and
    /// value columns when the error does not carry them. Warnings staged for
    /// the same recid are discarded: the record is not a success.
    pub fn add_log(
        &self,
        err: &ClassifiedError,
        record: Option<&Value>,
        key: Option<&str>,
        value: Option<&Value>,
    ) -> Result<(), ReportError> {
        let recid = err
            .details()
            .recid
            .clone()
            .or_else(|| record.and_then(payload_recid))
            .unwrap_or_default();

        let mut row = LogEntry::failure(recid.as_str(), err);
        if row.field.is_empty() {
            if let Some(key) = key {
                row.field = key.to_string();
            }
        }
        if row.value.is_empty() {
            if let Some(value) = value {
                row.value = render_value(value);
            }
        }

        tracing::warn!(
            recid = %recid,
            kind = err.type_name(),
            field = %row.field,
            "{err}",
        );

        let mut files = self.lock();
        files.staged.remove(&recid);
        write_row(&mut files, &self.paths.errors, &row)
    }

    /// Stage a non-fatal warning for `recid`, merging into any earlier one.
    pub fn add_success_state(&self, recid: &str, state: SuccessState) {
        let mut files = self.lock();
        match files.staged.get_mut(recid) {
            Some(existing) => existing.merge(state),
            None => {
                files.staged.insert(recid.to_string(), state);
            }
        }
    }

    /// Write the clean row for `recid`, consuming its staged state.
    pub fn add_success(&self, recid: &str) -> Result<(), ReportError> {
        let mut files = self.lock();
        let state = files.staged.remove(recid);
        write_row(&mut files, &self.paths.errors, &LogEntry::success(recid, state))
    }

    /// Record that a whole stream stopped early.
    pub fn add_stream_failure(&self, stream: &str, err: &dyn Display) -> Result<(), ReportError> {
        let mut files = self.lock();
        write_row(
            &mut files,
            &self.paths.errors,
            &LogEntry::stream_failure(stream, err.to_string()),
        )
    }

    /// Number of recids with staged, not yet written, success state.
    pub fn staged_len(&self) -> usize {
        self.lock().staged.len()
    }

    /// Close every file. Safe to call more than once.
    pub fn finalise(&self) -> Result<(), ReportError> {
        let mut files = self.lock();
        if let Some(mut errors) = files.errors.take() {
            errors
                .flush()
                .map_err(|e| ReportError::io(&self.paths.errors, e))?;
        }
        if let Some(records) = files.records.take() {
            records.finish()?;
        }
        if let Some(states) = files.states.take() {
            states.finish()?;
        }
        if !files.staged.is_empty() {
            tracing::debug!(count = files.staged.len(), "Dropping unclaimed success state");
            files.staged.clear();
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, LogFiles> {
        // A panicking writer leaves whole lines behind; keep logging.
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MigrationLogger {
    fn drop(&mut self) {
        if let Err(e) = self.finalise() {
            tracing::error!(error = %e, "Failed to finalise migration log");
        }
    }
}

fn write_row(files: &mut LogFiles, path: &Path, row: &LogEntry) -> Result<(), ReportError> {
    let writer = files.errors.as_mut().ok_or(ReportError::NotStarted)?;
    writer.serialize(row)?;
    writer.flush().map_err(|e| ReportError::io(path, e))
}

fn payload_recid(record: &Value) -> Option<String> {
    record
        .get("recid")
        .and_then(recid_string)
        .or_else(|| record.get("record")?.get("recid").and_then(recid_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_recid_lookup_order() {
        assert_eq!(payload_recid(&json!({"recid": 3})).as_deref(), Some("3"));
        assert_eq!(
            payload_recid(&json!({"record": {"recid": "4"}})).as_deref(),
            Some("4")
        );
        assert_eq!(payload_recid(&json!({"other": 1})), None);
    }

    #[test]
    fn paths_in_dir() {
        let paths = LogPaths::in_dir("/tmp/logs/records");
        assert_eq!(paths.errors, PathBuf::from("/tmp/logs/records/migration_errors.csv"));
        assert_eq!(paths.states, PathBuf::from("/tmp/logs/records/records_state.json"));
    }
}
