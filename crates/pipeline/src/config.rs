//! Run configuration, read from YAML.
//!
//! ```yaml
//! data_dir: /srv/migration/data
//! tmp_dir: /srv/migration/tmp
//! state_dir: /srv/migration/state
//! log_dir: /srv/migration/logs
//! concurrency: 8
//! records:
//!   extract: { dirpath: dumps }
//!   transform: { warn_on_collapsed_dates: false }
//!   load: {}
//! ```
//!
//! Every top-level key other than the directories and `concurrency` names a
//! stream. Only streams named here are run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

use crate::error::PipelineError;

/// Records in flight per stream when not configured.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Upper bound for `concurrency`, global or per stream.
pub const MAX_CONCURRENCY: usize = 64;

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1, max = 64))]
    pub concurrency: usize,
    #[serde(flatten, deserialize_with = "deserialize_streams")]
    #[validate(custom(function = "validate_streams"))]
    pub streams: BTreeMap<String, StreamConfig>,
}

/// Configuration of one stream.
///
/// Stage blocks are passed untyped to the stream definition, which parses
/// them into its own option types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    #[serde(default)]
    pub extract: Value,
    #[serde(default)]
    pub transform: Value,
    #[serde(default)]
    pub load: Value,
    /// Pre-transformed entries to replay; skips extract and transform.
    #[serde(default)]
    pub existing_data: Option<PathBuf>,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// Directories resolved for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDirs {
    pub data_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
}

/// A stream key with an empty body (`records:`) runs with the defaults.
fn deserialize_streams<'de, D>(deserializer: D) -> Result<BTreeMap<String, StreamConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    let streams = BTreeMap::<String, Option<StreamConfig>>::deserialize(deserializer)?;
    Ok(streams
        .into_iter()
        .map(|(name, config)| (name, config.unwrap_or_default()))
        .collect())
}

fn validate_streams(streams: &BTreeMap<String, StreamConfig>) -> Result<(), ValidationError> {
    for (name, stream) in streams {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(ValidationError::new("stream_name"));
        }
        if let Some(c) = stream.concurrency {
            if !(1..=MAX_CONCURRENCY).contains(&c) {
                return Err(ValidationError::new("stream_concurrency"));
            }
        }
    }
    Ok(())
}

impl RunConfig {
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, PipelineError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Create the global directories if missing.
    pub fn ensure_dirs(&self) -> Result<(), PipelineError> {
        for dir in [&self.data_dir, &self.tmp_dir, &self.state_dir, &self.log_dir] {
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
        }
        Ok(())
    }

    pub fn stream(&self, name: &str) -> Option<&StreamConfig> {
        self.streams.get(name)
    }

    /// Per-stream directories: an override is used as is, otherwise the
    /// global directory joined with the stream name.
    pub fn stream_dirs(&self, name: &str) -> StreamDirs {
        let stream = self.streams.get(name);
        let pick = |global: &Path, over: Option<&PathBuf>| match over {
            Some(dir) => dir.clone(),
            None => global.join(name),
        };
        StreamDirs {
            data_dir: pick(&self.data_dir, stream.and_then(|s| s.data_dir.as_ref())),
            tmp_dir: pick(&self.tmp_dir, stream.and_then(|s| s.tmp_dir.as_ref())),
            state_dir: pick(&self.state_dir, stream.and_then(|s| s.state_dir.as_ref())),
            log_dir: pick(&self.log_dir, stream.and_then(|s| s.log_dir.as_ref())),
        }
    }

    pub fn stream_concurrency(&self, name: &str) -> usize {
        self.streams
            .get(name)
            .and_then(|s| s.concurrency)
            .unwrap_or(self.concurrency)
    }
}

/// `path` relative to `base` unless already absolute.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Parse a stage block. A missing block yields the defaults.
pub fn stage_config<T: DeserializeOwned + Default>(block: &Value) -> Result<T, PipelineError> {
    if block.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(block.clone()).map_err(|e| PipelineError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const YAML: &str = r#"
data_dir: /srv/data
tmp_dir: /srv/tmp
state_dir: /srv/state
log_dir: /srv/logs
records:
  extract:
    dirpath: dumps
  transform:
    warn_on_collapsed_dates: true
  log_dir: /elsewhere
  concurrency: 2
"#;

    #[test]
    fn parses_streams_and_defaults() {
        let config = RunConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.streams.len(), 1);
        let records = config.stream("records").unwrap();
        assert_eq!(records.extract["dirpath"], "dumps");
        assert!(records.load.is_null());
        assert_eq!(config.stream_concurrency("records"), 2);
        assert_eq!(config.stream_concurrency("other"), DEFAULT_CONCURRENCY);
    }

    #[test]
    fn stream_dirs_with_override() {
        let config = RunConfig::from_yaml_str(YAML).unwrap();
        let dirs = config.stream_dirs("records");
        assert_eq!(dirs.log_dir, PathBuf::from("/elsewhere"));
        assert_eq!(dirs.state_dir, PathBuf::from("/srv/state/records"));
        assert_eq!(dirs.tmp_dir, PathBuf::from("/srv/tmp/records"));
    }

    #[test]
    fn concurrency_out_of_range_rejected() {
        let yaml = "data_dir: a\ntmp_dir: b\nstate_dir: c\nlog_dir: d\nconcurrency: 0\n";
        assert_matches!(RunConfig::from_yaml_str(yaml), Err(PipelineError::Config(_)));
        let yaml = "data_dir: a\ntmp_dir: b\nstate_dir: c\nlog_dir: d\nrecords:\n  concurrency: 65\n";
        assert_matches!(RunConfig::from_yaml_str(yaml), Err(PipelineError::Config(_)));
    }

    #[test]
    fn empty_stream_body_uses_defaults() {
        let yaml = "data_dir: a\ntmp_dir: b\nstate_dir: c\nlog_dir: d\nrecords:\ntalks: {}\n";
        let config = RunConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.streams.len(), 2);
        let records = config.stream("records").unwrap();
        assert!(records.extract.is_null());
        assert!(records.existing_data.is_none());
        assert_eq!(config.stream_dirs("records").data_dir, PathBuf::from("a/records"));
    }

    #[test]
    fn missing_directory_is_yaml_error() {
        let yaml = "data_dir: a\ntmp_dir: b\nstate_dir: c\n";
        assert_matches!(RunConfig::from_yaml_str(yaml), Err(PipelineError::Yaml(_)));
    }

    #[test]
    fn resolve_relative_and_absolute() {
        assert_eq!(resolve_path(Path::new("/base"), Path::new("x")), PathBuf::from("/base/x"));
        assert_eq!(resolve_path(Path::new("/base"), Path::new("/x")), PathBuf::from("/x"));
    }

    #[test]
    fn null_stage_block_defaults() {
        let value: BTreeMap<String, String> = stage_config(&Value::Null).unwrap();
        assert!(value.is_empty());
    }
}
