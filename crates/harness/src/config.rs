//! Harness configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use common::{Roster, DEFAULT_PARTICIPANTS, DEFAULT_THRESHOLD};

use crate::error::ConfigError;

/// Default message signed by the signing phases.
pub const DEFAULT_MESSAGE: &str = "Applied-Cryptography-project";

/// Default receive deadline, in seconds.
pub const DEFAULT_RECEIVE_TIMEOUT_SECS: u64 = 60;

/// Prefix of generated participant ids.
pub const PARTICIPANT_PREFIX: &str = "a";

fn default_participants() -> usize {
    DEFAULT_PARTICIPANTS
}

fn default_threshold() -> usize {
    DEFAULT_THRESHOLD
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

fn default_receive_timeout_secs() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings of one harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Roster size.
    #[serde(default = "default_participants")]
    pub participants: usize,

    /// Threshold `t`; `t + 1` participants sign.
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Message signed in the signing phases.
    #[serde(default = "default_message")]
    pub message: String,

    /// Worker threads per participant; 0 = available parallelism.
    #[serde(default)]
    pub pool_workers: usize,

    /// Deadline for every single receive.
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            participants: default_participants(),
            threshold: default_threshold(),
            message: default_message(),
            pool_workers: 0,
            receive_timeout_secs: default_receive_timeout_secs(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn env_flag(var: &str) -> Option<bool> {
    std::env::var(var)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with the `HARNESS_*` environment variables.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            participants: env_parse("HARNESS_PARTICIPANTS").unwrap_or(defaults.participants),
            threshold: env_parse("HARNESS_THRESHOLD").unwrap_or(defaults.threshold),
            message: std::env::var("HARNESS_MESSAGE").unwrap_or(defaults.message),
            pool_workers: env_parse("HARNESS_POOL_WORKERS").unwrap_or(defaults.pool_workers),
            receive_timeout_secs: env_parse("HARNESS_RECEIVE_TIMEOUT")
                .unwrap_or(defaults.receive_timeout_secs),
            log_level: std::env::var("HARNESS_LOG_LEVEL").unwrap_or(defaults.log_level),
            log_json: env_flag("HARNESS_LOG_JSON").unwrap_or(defaults.log_json),
        }
    }

    pub fn with_participants(mut self, participants: usize) -> Self {
        self.participants = participants;
        self
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_pool_workers(mut self, workers: usize) -> Self {
        self.pool_workers = workers;
        self
    }

    pub fn with_receive_timeout_secs(mut self, secs: u64) -> Self {
        self.receive_timeout_secs = secs;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_log_json(mut self, json: bool) -> Self {
        self.log_json = json;
        self
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    pub fn message_bytes(&self) -> &[u8] {
        self.message.as_bytes()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.participants == 0 {
            return Err(ConfigError::NoParticipants);
        }
        if self.threshold >= self.participants {
            return Err(ConfigError::ThresholdTooLarge {
                threshold: self.threshold,
                participants: self.participants,
            });
        }
        if self.receive_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// Roster `a1..aN`.
    pub fn roster(&self) -> Result<Roster, ConfigError> {
        Ok(Roster::numbered(PARTICIPANT_PREFIX, self.participants)?)
    }
}
