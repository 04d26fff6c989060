//! Read-back of finished report files.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use crate::entry::{LogEntry, RecordState};
use crate::error::ReportError;

/// Every row of a tabular migration log.
pub fn read_log(path: &Path) -> Result<Vec<LogEntry>, ReportError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<Result<Vec<LogEntry>, _>>()?;
    Ok(rows)
}

/// The full-record dump as a map of legacy recid to structured record.
pub fn load_record_dumps(path: &Path) -> Result<Map<String, Value>, ReportError> {
    let content = fs::read_to_string(path).map_err(|e| ReportError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

pub fn load_record_states(path: &Path) -> Result<Vec<RecordState>, ReportError> {
    let content = fs::read_to_string(path).map_err(|e| ReportError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}
