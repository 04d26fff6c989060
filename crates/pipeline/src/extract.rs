//! Extraction of legacy records from a directory of JSON dump files.
//!
//! Each regular file in the directory holds one JSON array of records.
//! Files are visited in name order; hidden files (leading `.`) are skipped.
//! A file is parsed in full before its records are handed out, so a
//! malformed file fails the stream without yielding a partial file.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::PipelineError;

/// Lazily produced extraction results.
pub type RecordIter = Box<dyn Iterator<Item = Result<Value, PipelineError>> + Send>;

/// Source of raw records for a stream.
pub trait Extract: Send + Sync {
    fn records(&self) -> Result<RecordIter, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct LegacyExtract {
    dirpath: PathBuf,
}

impl LegacyExtract {
    pub fn new(dirpath: impl Into<PathBuf>) -> Self {
        Self {
            dirpath: dirpath.into(),
        }
    }

    pub fn dirpath(&self) -> &Path {
        &self.dirpath
    }

    /// Regular, non-hidden files in the dump directory, sorted by name.
    pub fn dump_files(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let entries = fs::read_dir(&self.dirpath).map_err(|e| PipelineError::io(&self.dirpath, e))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::io(&self.dirpath, e))?;
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let is_file = entry
                .file_type()
                .map_err(|e| PipelineError::io(entry.path(), e))?
                .is_file();
            if is_file && !hidden {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

impl Extract for LegacyExtract {
    fn records(&self) -> Result<RecordIter, PipelineError> {
        let files = self.dump_files()?;
        tracing::debug!(dir = %self.dirpath.display(), files = files.len(), "Dump files found");
        Ok(Box::new(DumpRecords {
            total: files.len(),
            files: files.into_iter(),
            index: 0,
            current: Vec::new().into_iter(),
            done: false,
        }))
    }
}

struct DumpRecords {
    files: std::vec::IntoIter<PathBuf>,
    total: usize,
    index: usize,
    current: std::vec::IntoIter<Value>,
    done: bool,
}

impl Iterator for DumpRecords {
    type Item = Result<Value, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(record) = self.current.next() {
                return Some(Ok(record));
            }
            let path = self.files.next()?;
            self.index += 1;
            tracing::info!(
                file = %path.display(),
                index = self.index,
                total = self.total,
                "Processing dump file",
            );
            match read_dump(&path) {
                Ok(records) => self.current = records.into_iter(),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn read_dump(path: &Path) -> Result<Vec<Value>, PipelineError> {
    let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(records)) => Ok(records),
        Ok(_) => Err(PipelineError::MalformedDump {
            path: path.to_path_buf(),
            reason: "top-level value is not an array".into(),
        }),
        Err(e) => Err(PipelineError::MalformedDump {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn files_in_name_order_hidden_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.json", r#"[{"recid": 3}]"#);
        write(dir.path(), "a.json", r#"[{"recid": 1}, {"recid": 2}]"#);
        write(dir.path(), ".partial.json", "[oops");
        fs::create_dir(dir.path().join("nested")).unwrap();

        let recids: Vec<_> = LegacyExtract::new(dir.path())
            .records()
            .unwrap()
            .map(|r| r.unwrap()["recid"].as_i64().unwrap())
            .collect();
        assert_eq!(recids, vec![1, 2, 3]);
    }

    #[test]
    fn malformed_file_ends_iteration_with_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", r#"[{"recid": 1}]"#);
        write(dir.path(), "b.json", r#"{"recid": 2}"#);
        write(dir.path(), "c.json", r#"[{"recid": 3}]"#);

        let results: Vec<_> = LegacyExtract::new(dir.path()).records().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert_matches!(results[1], Err(PipelineError::MalformedDump { .. }));
    }

    #[test]
    fn missing_directory_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = LegacyExtract::new(dir.path().join("absent")).records();
        assert!(matches!(result, Err(PipelineError::Io { .. })));
    }

    #[test]
    fn empty_array_file_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.json", "[]");
        assert_eq!(LegacyExtract::new(dir.path()).records().unwrap().count(), 0);
    }
}
