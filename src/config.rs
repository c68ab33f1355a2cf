//! Configuration types for usenet-postproc

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How many PAR2 files of a freshly added collection are left unpaused
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPars {
    /// Pause every PAR2 file; they are fetched only when verification needs them
    None,
    /// Keep the main index file of each PAR2 set, pause the volumes (default)
    #[default]
    One,
    /// Download every PAR2 file
    All,
}

/// PAR2 verification and repair settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParConfig {
    /// Verify collections that carry PAR2 files (default: true)
    #[serde(default = "default_true")]
    pub par_check: bool,

    /// Repair damaged collections when enough recovery blocks exist (default: true)
    #[serde(default = "default_true")]
    pub par_repair: bool,

    /// PAR2 files downloaded up front when a collection is added
    #[serde(default)]
    pub load_pars: LoadPars,

    /// Defer a finished collection until its main PAR2 file is on disk (default: true)
    ///
    /// If the main PAR2 file is still paused in the download queue, it is
    /// unpaused and the collection is picked up once it arrives.
    #[serde(default = "default_true")]
    pub wait_for_pars: bool,

    /// Remove leftover paused PAR2 files from the download queue after a
    /// successful verification or repair (default: true)
    #[serde(default = "default_true")]
    pub par_cleanup_queue: bool,
}

impl Default for ParConfig {
    fn default() -> Self {
        Self {
            par_check: true,
            par_repair: true,
            load_pars: LoadPars::default(),
            wait_for_pars: true,
            par_cleanup_queue: true,
        }
    }
}

/// Post-process script settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostScriptConfig {
    /// Script executed for every finished collection (None = no script)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Script is terminated after this long (default: 5 minutes)
    #[serde(default = "default_script_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for PostScriptConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout: default_script_timeout(),
        }
    }
}

/// External tool paths
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to par2 executable (auto-detected if None)
    #[serde(default)]
    pub par2_path: Option<PathBuf>,

    /// Whether to search PATH for par2 if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            par2_path: None,
            search_path: true,
        }
    }
}

/// Scheduler and post queue settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Idle sleep between scheduler ticks, in milliseconds (default: 1000)
    #[serde(default = "default_poll_interval", with = "millis_serde")]
    pub poll_interval: Duration,

    /// Completed jobs retained until drained; oldest are evicted first (default: 100)
    #[serde(default = "default_max_completed_jobs")]
    pub max_completed_jobs: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            max_completed_jobs: default_max_completed_jobs(),
        }
    }
}

/// Main configuration for the post-processor
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// PAR2 verification and repair
    #[serde(default)]
    pub par: ParConfig,

    /// Post-process script
    #[serde(default)]
    pub script: PostScriptConfig,

    /// External tool paths
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Scheduler and post queue
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Config {
    /// Load configuration from a JSON file and validate it
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue.poll_interval.is_zero() {
            return Err(Error::Config {
                message: "poll interval must be greater than zero".into(),
                key: Some("queue.poll_interval".into()),
            });
        }
        if self.script.timeout.is_zero() {
            return Err(Error::Config {
                message: "script timeout must be greater than zero".into(),
                key: Some("script.timeout".into()),
            });
        }
        if let Some(path) = &self.script.path
            && path.as_os_str().is_empty()
        {
            return Err(Error::Config {
                message: "script path is empty".into(),
                key: Some("script.path".into()),
            });
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_script_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1000)
}

fn default_max_completed_jobs() -> usize {
    100
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Millisecond Duration serialization helper
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
