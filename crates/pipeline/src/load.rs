//! The loader contract and the file-backed loader.
//!
//! A loader upserts [`LoadEntry`]s keyed by parent id. Loading the same
//! input twice updates rather than duplicates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use marcmig_core::TargetRecord;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// One transformed record handed to a loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadEntry {
    /// Key of the record in the full-record dump.
    pub legacy_recid: String,
    pub record: TargetRecord,
}

impl LoadEntry {
    pub fn recid(&self) -> &str {
        &self.record.recid
    }

    pub fn parent_id(&self) -> &str {
        self.record.parent_id()
    }
}

/// What a loader did with one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadAction {
    Created,
    Updated,
    /// Dry run: nothing persisted.
    Skipped,
}

impl LoadAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub const ALL: &'static [&'static str] = &["created", "updated", "skipped"];
}

impl std::fmt::Display for LoadAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The target refused this record; the stream continues.
    #[error("Record rejected: {message}")]
    Rejected { message: String },

    /// The target itself is broken; the stream stops.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait Load: Send + Sync {
    /// Upsert one entry.
    async fn load(&self, entry: &LoadEntry) -> Result<LoadAction, LoadError>;

    /// Load-only replay of previously transformed data. Returns the number
    /// of entries loaded.
    async fn load_existing(&self) -> Result<usize, LoadError>;

    /// Make everything loaded so far durable.
    async fn finish(&self) -> Result<(), LoadError>;
}

// ---------------------------------------------------------------------------
// JsonFileLoader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Upsert store, a JSON object keyed by parent id.
    pub store_path: PathBuf,
    /// Append journal for the current run.
    pub journal_path: PathBuf,
    /// JSON array of [`LoadEntry`] replayed by [`Load::load_existing`].
    pub existing_data: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug)]
struct StoreState {
    records: BTreeMap<String, TargetRecord>,
    journal: Option<File>,
}

/// Loader that upserts into a JSON file.
///
/// Every accepted entry is first appended to a journal; [`Load::finish`]
/// rewrites the store and clears the journal. A journal found on open
/// belongs to an interrupted run and is folded into the store first.
#[derive(Debug)]
pub struct JsonFileLoader {
    options: LoaderOptions,
    state: Mutex<StoreState>,
}

impl JsonFileLoader {
    pub async fn open(options: LoaderOptions) -> Result<Self, LoadError> {
        let mut records = read_store(&options.store_path).await?;
        let replayed = replay_journal(&options.journal_path, &mut records).await?;

        let mut journal = None;
        if !options.dry_run {
            for path in [&options.store_path, &options.journal_path] {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
            }
            if replayed > 0 {
                tracing::warn!(
                    journal = %options.journal_path.display(),
                    replayed,
                    "Recovered entries from interrupted run",
                );
                write_store(&options.store_path, &records).await?;
            }
            journal = Some(
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&options.journal_path)
                    .await
                    .with_context(|| format!("opening {}", options.journal_path.display()))?,
            );
        }

        Ok(Self {
            options,
            state: Mutex::new(StoreState { records, journal }),
        })
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Number of records currently in the store.
    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, parent_id: &str) -> Option<TargetRecord> {
        self.state.lock().await.records.get(parent_id).cloned()
    }
}

#[async_trait]
impl Load for JsonFileLoader {
    async fn load(&self, entry: &LoadEntry) -> Result<LoadAction, LoadError> {
        let parent_id = entry.parent_id();
        if parent_id.is_empty() || entry.recid().is_empty() {
            return Err(LoadError::Rejected {
                message: "Record has no identity to upsert on".into(),
            });
        }
        if self.options.dry_run {
            return Ok(LoadAction::Skipped);
        }

        let mut line = serde_json::to_vec(&entry.record).context("serializing record")?;
        line.push(b'\n');

        let mut state = self.state.lock().await;
        let journal = state
            .journal
            .as_mut()
            .context("journal is closed")?;
        journal
            .write_all(&line)
            .await
            .with_context(|| format!("appending to {}", self.options.journal_path.display()))?;

        let action = match state.records.insert(parent_id.to_string(), entry.record.clone()) {
            Some(_) => LoadAction::Updated,
            None => LoadAction::Created,
        };
        tracing::debug!(recid = %entry.recid(), parent_id, action = %action, "Record loaded");
        Ok(action)
    }

    async fn load_existing(&self) -> Result<usize, LoadError> {
        let path = self
            .options
            .existing_data
            .as_deref()
            .context("no existing data configured")?;
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let entries: Vec<LoadEntry> = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;

        let mut loaded = 0;
        for entry in &entries {
            match self.load(entry).await {
                Ok(_) => loaded += 1,
                Err(LoadError::Rejected { message }) => {
                    tracing::warn!(recid = %entry.recid(), %message, "Replayed entry rejected");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(path = %path.display(), loaded, total = entries.len(), "Existing data replayed");
        Ok(loaded)
    }

    async fn finish(&self) -> Result<(), LoadError> {
        if self.options.dry_run {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if let Some(mut journal) = state.journal.take() {
            journal.flush().await.context("flushing journal")?;
        }
        write_store(&self.options.store_path, &state.records).await?;
        match fs::remove_file(&self.options.journal_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("removing {}", self.options.journal_path.display()))
                .into()),
        }
    }
}

async fn read_store(path: &Path) -> Result<BTreeMap<String, TargetRecord>, LoadError> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(BTreeMap::new());
    }
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let records = serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    Ok(records)
}

/// Fold a leftover journal into `records`. Lines cut short by a crash are
/// ignored.
async fn replay_journal(path: &Path, records: &mut BTreeMap<String, TargetRecord>) -> Result<usize, LoadError> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(0);
    }
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let mut replayed = 0;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<TargetRecord>(line) {
            Ok(record) => {
                records.insert(record.parent_id().to_string(), record);
                replayed += 1;
            }
            Err(e) => tracing::warn!(journal = %path.display(), error = %e, "Skipping torn journal line"),
        }
    }
    Ok(replayed)
}

/// Write the store through a temporary file so a crash never leaves it
/// half written.
async fn write_store(path: &Path, records: &BTreeMap<String, TargetRecord>) -> Result<(), LoadError> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(records).context("serializing store")?;
    fs::write(&tmp, body)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_action_names() {
        for name in LoadAction::ALL {
            assert_eq!(LoadAction::from_str(name).unwrap().as_str(), *name);
        }
        assert_eq!(LoadAction::from_str("failed"), None);
        assert_eq!(LoadAction::Updated.to_string(), "updated");
    }
}
