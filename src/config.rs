//! Configuration loading using Figment.
//!
//! Sources, later ones overriding earlier ones:
//! 1. built-in defaults (the producer's standard paths and windows)
//! 2. `config/omnisight_ipc.toml`, if present
//! 3. environment variables prefixed with `OMNISIGHT_IPC_`, nested keys
//!    separated by `__`
//!
//! Durations are human-readable (`"5s"`, `"10ms"`).
//!
//! # Example
//! ```no_run
//! use omnisight_ipc::config::IpcConfig;
//!
//! let config = IpcConfig::load()?;
//! println!("Snapshots in {}", config.paths.snapshot_dir.display());
//! # Ok::<(), omnisight_ipc::IpcError>(())
//! ```
//!
//! Shared-memory segment and semaphore names are protocol constants and are
//! not configurable; see [`crate::shm::ShmChannel`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{IpcError, IpcResult};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/omnisight_ipc.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "OMNISIGHT_IPC_";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Filesystem locations of producer resources
    #[serde(default)]
    pub paths: PathsConfig,
    /// Freshness windows
    #[serde(default)]
    pub freshness: FreshnessConfig,
    /// Shared-memory tier
    #[serde(default)]
    pub shm: ShmConfig,
    /// Command channel
    #[serde(default)]
    pub command: CommandConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Where the producer keeps its resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory backing the POSIX shm namespace
    #[serde(default = "default_shm_dir")]
    pub shm_dir: PathBuf,
    /// Directory holding the JSON snapshot files
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    /// Producer's command pipe
    #[serde(default = "default_command_path")]
    pub command_path: PathBuf,
    /// File the producer appends acknowledgments to
    #[serde(default = "default_ack_path")]
    pub ack_path: PathBuf,
}

/// Freshness windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessConfig {
    /// Detections, tracks and timelines
    #[serde(default = "default_high_frequency", with = "humantime_serde")]
    pub high_frequency: Duration,
    /// Stats and status
    #[serde(default = "default_low_frequency", with = "humantime_serde")]
    pub low_frequency: Duration,
}

/// Shared-memory tier settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShmConfig {
    /// Whether to read shared memory at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum delay between attach attempts while the producer is absent
    #[serde(default = "default_reattach_interval", with = "humantime_serde")]
    pub reattach_interval: Duration,
}

/// Command channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Ack poll interval
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Timeout used when the caller does not supply one
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub default_timeout: Duration,
    /// Timeout for the health-check ping
    #[serde(default = "default_ping_timeout", with = "humantime_serde")]
    pub ping_timeout: Duration,
}

// Default value functions
fn default_name() -> String {
    "omnisight-ipc".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shm_dir() -> PathBuf {
    PathBuf::from("/dev/shm")
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_command_path() -> PathBuf {
    PathBuf::from("/tmp/omnisight_cmd")
}

fn default_ack_path() -> PathBuf {
    PathBuf::from("/tmp/omnisight_cmd_ack")
}

fn default_high_frequency() -> Duration {
    Duration::from_millis(5000)
}

fn default_low_frequency() -> Duration {
    Duration::from_millis(10_000)
}

fn default_enabled() -> bool {
    true
}

fn default_reattach_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_ping_timeout() -> Duration {
    Duration::from_millis(500)
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            shm_dir: default_shm_dir(),
            snapshot_dir: default_snapshot_dir(),
            command_path: default_command_path(),
            ack_path: default_ack_path(),
        }
    }
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            high_frequency: default_high_frequency(),
            low_frequency: default_low_frequency(),
        }
    }
}

impl Default for ShmConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            reattach_interval: default_reattach_interval(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            default_timeout: default_timeout(),
            ping_timeout: default_ping_timeout(),
        }
    }
}

impl IpcConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment, then validate.
    pub fn load() -> IpcResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    /// Example override: `OMNISIGHT_IPC_COMMAND__PING_TIMEOUT=250ms`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> IpcResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate().map_err(IpcError::Configuration)?;
        Ok(config)
    }

    /// The layered provider stack, exposed for callers that merge more sources.
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.freshness.high_frequency.is_zero() || self.freshness.low_frequency.is_zero() {
            return Err("Freshness windows must be greater than zero".to_string());
        }

        let command = &self.command;
        if command.poll_interval.is_zero() {
            return Err("command.poll_interval must be greater than zero".to_string());
        }
        if command.poll_interval > command.default_timeout {
            return Err(format!(
                "command.poll_interval ({:?}) must not exceed command.default_timeout ({:?})",
                command.poll_interval, command.default_timeout
            ));
        }
        if command.ping_timeout.is_zero() {
            return Err("command.ping_timeout must be greater than zero".to_string());
        }

        Ok(())
    }
}
