use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::orchestration::scheduler::{ExecutionOptions, DEFAULT_MAX_WORKERS, DEFAULT_TASK_TIMEOUT};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// The `[scheduler]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub timeout_secs: u64,
    pub fail_fast: bool,
    /// When false every batch runs as one flat group.
    pub dependency_analysis: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            timeout_secs: DEFAULT_TASK_TIMEOUT.as_secs(),
            fail_fast: false,
            dependency_analysis: true,
        }
    }
}

impl SchedulerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn execution_options(&self) -> ExecutionOptions {
        ExecutionOptions {
            max_workers: self.max_workers,
            timeout_per_task: self.timeout(),
            fail_fast: self.fail_fast,
        }
    }
}

impl Config {
    pub fn weave_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".weave"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::weave_dir()?.join("weave.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load from an explicit path. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// holds values that fail [`Config::validate`].
    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            max_workers = config.scheduler.max_workers,
            timeout_secs = config.scheduler.timeout_secs,
            fail_fast = config.scheduler.fail_fast,
            dependency_analysis = config.scheduler.dependency_analysis,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                debug!(dir = %dir.display(), "Creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Reject settings the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_workers == 0 {
            return Err(Error::Validation(
                "scheduler.max_workers must be at least 1".to_string(),
            ));
        }
        if self.scheduler.timeout_secs == 0 {
            return Err(Error::Validation(
                "scheduler.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
