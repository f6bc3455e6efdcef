//! Scenario configuration (tandem.toml)
//!
//! Every field has a default, so a missing file or an empty table is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::lock_pair::Backoff;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "tandem.toml";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TandemConfig {
    /// Producer/consumer handoff
    pub handoff: HandoffConfig,
    /// Dual-lock race
    pub race: RaceConfig,
    /// Cross-process turn passing
    pub turns: TurnConfig,
}

/// Producer/consumer handoff settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HandoffConfig {
    /// Messages the producer sends before the sentinel
    pub max_messages: usize,
    /// Strict alternation through a capacity-1 queue
    pub lockstep: bool,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            max_messages: 3,
            lockstep: false,
        }
    }
}

/// Dual-lock race settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RaceConfig {
    /// Iterations per worker
    pub iterations: u32,
    /// Bounded wait per acquisition, in milliseconds
    pub timeout_ms: u64,
    /// Attempts per iteration before the iteration is given up
    pub max_attempts: u32,
    /// Backoff ceiling after the first failed attempt, in microseconds
    pub backoff_base_us: u64,
    /// Upper bound for a single backoff sleep, in microseconds
    pub backoff_cap_us: u64,
    /// Cancel the workers after this many milliseconds
    pub max_duration_ms: Option<u64>,
}

impl RaceConfig {
    /// Bounded wait per acquisition
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry policy for bounded-wait workers
    pub fn backoff(&self) -> Backoff {
        Backoff {
            max_attempts: self.max_attempts,
            base: Duration::from_micros(self.backoff_base_us),
            cap: Duration::from_micros(self.backoff_cap_us),
        }
    }

    /// Watchdog limit, if any
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            timeout_ms: 3_000,
            max_attempts: 16,
            backoff_base_us: 50,
            backoff_cap_us: 5_000,
            max_duration_ms: None,
        }
    }
}

/// Cross-process turn passing settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TurnConfig {
    /// Rendezvous name shared by cooperating processes
    pub name: String,
    /// Directory holding rendezvous files (system temp dir when unset)
    pub dir: Option<PathBuf>,
    /// Turns taken by each party
    pub turns: u32,
    /// Work lines printed per turn
    pub lines_per_turn: u32,
    /// Cooperating processes spawned by the driver
    pub parties: u32,
}

impl TurnConfig {
    /// Directory holding rendezvous files
    pub fn token_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tandem"))
    }

    /// Ledger file written by the parties of this token
    pub fn ledger_path(&self) -> PathBuf {
        self.token_dir().join(format!("{}.ledger", self.name))
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            name: "tandem-demo".to_string(),
            dir: None,
            turns: 10,
            lines_per_turn: 10,
            parties: 2,
        }
    }
}

impl TandemConfig {
    /// Parse configuration from a TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: TandemConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load `path` if given, else `tandem.toml` in the working directory if
    /// present, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.race.iterations == 0 {
            return Err(ConfigError::Invalid("race.iterations must be positive".into()));
        }
        if self.race.max_attempts == 0 {
            return Err(ConfigError::Invalid("race.max_attempts must be positive".into()));
        }
        if self.race.backoff_cap_us < self.race.backoff_base_us {
            return Err(ConfigError::Invalid(
                "race.backoff_cap_us must be at least race.backoff_base_us".into(),
            ));
        }
        if self.turns.turns == 0 {
            return Err(ConfigError::Invalid("turns.turns must be positive".into()));
        }
        if self.turns.parties == 0 {
            return Err(ConfigError::Invalid("turns.parties must be positive".into()));
        }
        #[cfg(unix)]
        crate::turn::validate_name(&self.turns.name)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }
}
