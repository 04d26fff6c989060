//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use marcmig_core::{ClassifiedError, TargetRecord};
use marcmig_pipeline::{
    Extract, LegacyExtract, Load, LoadAction, LoadEntry, LoadError, PipelineError, RunConfig,
    StreamContext, StreamDefinition, Transform, Transformed,
};
use marcmig_reports::LogPaths;

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Scratch directory tree laid out like a real migration host.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self, sub: &str) -> PathBuf {
        self.dir.path().join(sub)
    }

    /// A run configuration rooted in this workspace, plus the given stream
    /// blocks.
    pub fn config(&self, streams_yaml: &str) -> RunConfig {
        let yaml = format!(
            "data_dir: {}\ntmp_dir: {}\nstate_dir: {}\nlog_dir: {}\n{streams_yaml}",
            self.path("data").display(),
            self.path("tmp").display(),
            self.path("state").display(),
            self.path("logs").display(),
        );
        RunConfig::from_yaml_str(&yaml).expect("valid config")
    }

    /// Write a dump file into the default extract directory of `stream`.
    pub fn write_dump(&self, stream: &str, file: &str, content: &str) {
        let dir = self.path("data").join(stream);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), content).unwrap();
    }

    pub fn write_records(&self, stream: &str, file: &str, records: &[Value]) {
        self.write_dump(stream, file, &serde_json::to_string(records).unwrap());
    }

    pub fn log_paths(&self, stream: &str) -> LogPaths {
        LogPaths::in_dir(self.path("logs").join(stream))
    }

    pub fn store_path(&self, stream: &str) -> PathBuf {
        self.path("state").join(stream).join("records.json")
    }

    pub fn journal_path(&self, stream: &str) -> PathBuf {
        self.path("tmp").join(stream).join("journal.jsonl")
    }

    pub fn store(&self, stream: &str) -> Map<String, Value> {
        let content = fs::read_to_string(self.store_path(stream)).expect("store exists");
        serde_json::from_str(&content).unwrap()
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A minimal valid legacy record with one revision.
pub fn lecture(recid: u64, title: &str, date: &str) -> Value {
    json!({
        "recid": recid,
        "revisions": [[100, {"245__a": title, "269__c": date}]]
    })
}

/// A record with no date anywhere.
pub fn dateless(recid: u64) -> Value {
    json!({"recid": recid, "revisions": [[100, {"245__a": "No date"}]]})
}

// ---------------------------------------------------------------------------
// In-memory loader
// ---------------------------------------------------------------------------

/// Upserting loader kept in memory, with optional per-record rejection.
#[derive(Default)]
pub struct MemoryLoader {
    pub records: Mutex<BTreeMap<String, TargetRecord>>,
    pub reject_parent: Option<String>,
    pub finished: Mutex<bool>,
}

impl MemoryLoader {
    pub fn rejecting(parent_id: &str) -> Self {
        Self {
            reject_parent: Some(parent_id.to_string()),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl Load for MemoryLoader {
    async fn load(&self, entry: &LoadEntry) -> Result<LoadAction, LoadError> {
        if self.reject_parent.as_deref() == Some(entry.parent_id()) {
            return Err(LoadError::Rejected {
                message: format!("{} refused by target", entry.parent_id()),
            });
        }
        let mut records = self.records.lock().unwrap();
        Ok(match records.insert(entry.parent_id().to_string(), entry.record.clone()) {
            Some(_) => LoadAction::Updated,
            None => LoadAction::Created,
        })
    }

    async fn load_existing(&self) -> Result<usize, LoadError> {
        Ok(0)
    }

    async fn finish(&self) -> Result<(), LoadError> {
        *self.finished.lock().unwrap() = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stream definitions
// ---------------------------------------------------------------------------

/// Another definition under a different stream name.
pub struct Renamed<D> {
    pub name: &'static str,
    pub inner: D,
}

#[async_trait]
impl<D: StreamDefinition> StreamDefinition for Renamed<D> {
    fn name(&self) -> &str {
        self.name
    }

    fn build_extract(&self, ctx: &StreamContext) -> Result<Box<dyn Extract>, PipelineError> {
        self.inner.build_extract(ctx)
    }

    fn build_transform(&self, ctx: &StreamContext) -> Result<Arc<dyn Transform>, PipelineError> {
        self.inner.build_transform(ctx)
    }

    async fn build_load(&self, ctx: &StreamContext) -> Result<Arc<dyn Load>, PipelineError> {
        self.inner.build_load(ctx).await
    }
}

pub struct PanickingTransform;

impl Transform for PanickingTransform {
    fn transform(&self, _raw: &Value) -> Result<Transformed, ClassifiedError> {
        panic!("transform exploded");
    }
}

/// A stream whose transform panics on the first record.
pub struct ExplodingDefinition;

#[async_trait]
impl StreamDefinition for ExplodingDefinition {
    fn name(&self) -> &str {
        "exploding"
    }

    fn build_extract(&self, ctx: &StreamContext) -> Result<Box<dyn Extract>, PipelineError> {
        Ok(Box::new(LegacyExtract::new(&ctx.dirs.data_dir)))
    }

    fn build_transform(&self, _ctx: &StreamContext) -> Result<Arc<dyn Transform>, PipelineError> {
        Ok(Arc::new(PanickingTransform))
    }

    async fn build_load(&self, _ctx: &StreamContext) -> Result<Arc<dyn Load>, PipelineError> {
        Ok(Arc::new(MemoryLoader::default()))
    }
}
