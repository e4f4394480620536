//! Optional TOML configuration (`--config=FILE`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::message::DEFAULT_BODY_TEMPLATE;
use crate::core::validator::DEFAULT_DENYLIST;
use crate::error::SweepError;
use crate::io::lock::LockSettings;

/// commit-sweep configuration.
///
/// Every table is optional; missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SweepConfig {
    pub lock: LockConfig,
    pub git: GitConfig,
    pub tracker: TrackerConfig,
    /// Glob patterns excluded from every commit.
    pub denylist: Vec<String>,
    pub include: IncludeConfig,
    pub commit: CommitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    pub timeout_secs: u64,
    pub retry_interval_ms: u64,
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    pub enabled: bool,
    /// Command prefix; the task identifier is appended as the last argument.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IncludeConfig {
    pub binary: bool,
    pub submodules: bool,
    pub broken_symlinks: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommitConfig {
    pub body: bool,
    pub task_id: bool,
    pub body_template: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry_interval_ms: 250,
            stale_after_secs: 3600,
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["br".to_string(), "show".to_string(), "--json".to_string()],
            timeout_secs: 5,
        }
    }
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            body: false,
            task_id: true,
            body_template: DEFAULT_BODY_TEMPLATE.to_string(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            git: GitConfig::default(),
            tracker: TrackerConfig::default(),
            denylist: DEFAULT_DENYLIST.iter().map(|p| p.to_string()).collect(),
            include: IncludeConfig::default(),
            commit: CommitConfig::default(),
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lock.timeout_secs == 0 {
            return Err(anyhow!("lock.timeout_secs must be > 0"));
        }
        if self.lock.retry_interval_ms == 0 {
            return Err(anyhow!("lock.retry_interval_ms must be > 0"));
        }
        if self.lock.stale_after_secs == 0 {
            return Err(anyhow!("lock.stale_after_secs must be > 0"));
        }
        if self.git.timeout_secs == 0 {
            return Err(anyhow!("git.timeout_secs must be > 0"));
        }
        if self.tracker.timeout_secs == 0 {
            return Err(anyhow!("tracker.timeout_secs must be > 0"));
        }
        if self.tracker.command.is_empty() || self.tracker.command[0].trim().is_empty() {
            return Err(anyhow!("tracker.command must be a non-empty array"));
        }
        if self.commit.body_template.trim().is_empty() {
            return Err(anyhow!("commit.body_template must not be empty"));
        }
        Ok(())
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            timeout: Duration::from_secs(self.lock.timeout_secs),
            retry_interval: Duration::from_millis(self.lock.retry_interval_ms),
            stale_after: Duration::from_secs(self.lock.stale_after_secs),
        }
    }

    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git.timeout_secs)
    }

    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker.timeout_secs)
    }
}

/// Load config from an explicitly named TOML file, or defaults when none is given.
///
/// A named file that does not exist, does not parse, or fails validation is an
/// invalid-arguments error.
pub fn load_config(path: Option<&Path>) -> Result<SweepConfig> {
    let Some(path) = path else {
        let cfg = SweepConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    };
    if !path.exists() {
        return Err(
            SweepError::InvalidArguments(format!("config file {} not found", path.display())).into(),
        );
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SweepConfig = toml::from_str(&contents).map_err(|err| {
        SweepError::InvalidArguments(format!("parse {}: {err}", path.display()))
    })?;
    cfg.validate().map_err(|err| {
        SweepError::InvalidArguments(format!("{}: {err}", path.display()))
    })?;
    Ok(cfg)
}
