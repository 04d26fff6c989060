//! Crash recovery for the incremental JSON dumps.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::ReportError;

/// Close a dump that was left open by an interrupted run.
///
/// Everything after the last complete `entry,\n` line is discarded, the
/// trailing comma removed and the matching bracket appended. Returns
/// `false` when the file was already valid JSON and left untouched.
pub fn repair_json_dump(path: &Path) -> Result<bool, ReportError> {
    let content = fs::read_to_string(path).map_err(|e| ReportError::io(path, e))?;
    if serde_json::from_str::<serde_json::Value>(&content).is_ok() {
        return Ok(false);
    }

    let trimmed = content.trim_start();
    let close = match trimmed.chars().next() {
        Some('{') => '}',
        Some('[') => ']',
        _ => {
            return Err(ReportError::io(
                path,
                io::Error::new(io::ErrorKind::InvalidData, "not a migration dump"),
            ))
        }
    };

    let body = match trimmed.rfind(",\n") {
        Some(end) => &trimmed[..end],
        None => &trimmed[..1],
    };
    let repaired = format!("{body}\n{close}\n");

    serde_json::from_str::<serde_json::Value>(&repaired)?;
    fs::write(path, repaired).map_err(|e| ReportError::io(path, e))?;

    tracing::info!(path = %path.display(), "Repaired interrupted migration dump");
    Ok(true)
}
