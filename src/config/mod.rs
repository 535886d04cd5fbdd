//! Run configuration (layered: defaults > TOML file > environment).

use std::fs;
use std::path::{Path, PathBuf};

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Result, WeftError};

/// Default ceiling on model calls per invocation.
pub const DEFAULT_MAX_LLM_CALLS: usize = 500;

/// Whether model output is streamed as partial events.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StreamingMode {
    #[default]
    None,
    Sse,
}

/// Periodic history compaction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Compact after this many new invocations.
    pub compaction_interval: usize,
    /// Earlier invocations re-included in each window.
    #[serde(default)]
    pub overlap_size: usize,
}

/// Per-run settings passed to the runner.
#[derive(Debug, Clone, Builder, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Ceiling on model calls per invocation; `0` disables the check.
    #[builder(default = DEFAULT_MAX_LLM_CALLS)]
    #[serde(default = "default_max_llm_calls")]
    pub max_llm_calls: usize,
    #[builder(default)]
    #[serde(default)]
    pub streaming_mode: StreamingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction: Option<CompactionConfig>,
    /// Create the session on first use instead of failing.
    #[builder(default = true)]
    #[serde(default = "default_true")]
    pub auto_create_session: bool,
    /// Move inline blobs of incoming messages into the artifact service.
    #[builder(default)]
    #[serde(default)]
    pub save_input_blobs_as_artifacts: bool,
}

fn default_max_llm_calls() -> usize {
    DEFAULT_MAX_LLM_CALLS
}

fn default_true() -> bool {
    true
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Subset of [`RunConfig`] that a TOML file may override.
#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
    max_llm_calls: Option<usize>,
    streaming_mode: Option<StreamingMode>,
    compaction: Option<CompactionConfig>,
    auto_create_session: Option<bool>,
    save_input_blobs_as_artifacts: Option<bool>,
}

impl RunConfig {
    /// Defaults, then the default config file if present, then `WEFT_*` env vars.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();
        if let Some(path) = default_config_path().filter(|p| p.exists()) {
            config.merge_file(&path)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overridden by the TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.merge_file(path)?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let raw = fs::read_to_string(path).map_err(|e| {
            WeftError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let file: FileConfig = toml::from_str(&raw).map_err(|e| {
            WeftError::Configuration(format!("invalid config {}: {e}", path.display()))
        })?;

        if let Some(v) = file.max_llm_calls {
            self.max_llm_calls = v;
        }
        if let Some(v) = file.streaming_mode {
            self.streaming_mode = v;
        }
        if file.compaction.is_some() {
            self.compaction = file.compaction;
        }
        if let Some(v) = file.auto_create_session {
            self.auto_create_session = v;
        }
        if let Some(v) = file.save_input_blobs_as_artifacts {
            self.save_input_blobs_as_artifacts = v;
        }
        Ok(())
    }

    /// Apply `WEFT_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("WEFT_MAX_LLM_CALLS") {
            self.max_llm_calls = parse_env("WEFT_MAX_LLM_CALLS", &raw)?;
        }
        if let Some(raw) = lookup("WEFT_STREAMING_MODE") {
            self.streaming_mode = raw.trim().parse().map_err(|_| {
                WeftError::Configuration(format!("WEFT_STREAMING_MODE: unknown mode '{raw}'"))
            })?;
        }
        let interval = lookup("WEFT_COMPACTION_INTERVAL")
            .map(|raw| parse_env("WEFT_COMPACTION_INTERVAL", &raw))
            .transpose()?;
        let overlap = lookup("WEFT_COMPACTION_OVERLAP")
            .map(|raw| parse_env("WEFT_COMPACTION_OVERLAP", &raw))
            .transpose()?;
        if interval.is_some() || overlap.is_some() {
            let current = self.compaction.unwrap_or(CompactionConfig {
                compaction_interval: 0,
                overlap_size: 0,
            });
            self.compaction = Some(CompactionConfig {
                compaction_interval: interval.unwrap_or(current.compaction_interval),
                overlap_size: overlap.unwrap_or(current.overlap_size),
            })
            .filter(|c| c.compaction_interval > 0);
        }
        Ok(())
    }
}

fn parse_env(key: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse()
        .map_err(|_| WeftError::Configuration(format!("{key}: expected a number, got '{raw}'")))
}

/// `~/.weft/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    directories::UserDirs::new().map(|dirs| dirs.home_dir().join(".weft").join("config.toml"))
}
