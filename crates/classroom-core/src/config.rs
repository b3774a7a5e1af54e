//! Synchronization timers and limits.
//!
//! Every field has a default, so a partial (or empty) TOML file is valid.
//! Environment variables prefixed with `CLASSROOM_` override file values.

use std::{path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What happens when a student identity connects while already connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// The newest connection wins; the previous transport is closed.
    #[default]
    Replace,
    /// The second connection is refused.
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(ConfigError::Invalid(format!(
                "duplicate_policy must be 'replace' or 'reject', got '{other}'"
            ))),
        }
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Timers and queue sizes of the synchronization core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Silence after the last edit before `typing` falls back to `online`.
    pub typing_idle_ms: u64,
    /// Inactivity after which a student is marked `afk`.
    pub afk_after_ms: u64,
    /// How often the inactivity sweep runs.
    pub afk_sweep_interval_ms: u64,
    /// Fixed client-side delay between reconnect attempts.
    pub reconnect_delay_ms: u64,
    /// Pending events kept per channel before the oldest is dropped.
    /// Must be a power of two.
    pub outbound_capacity: usize,
    /// Handling of a second connection from the same student.
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_idle_ms: 2_000,
            afk_after_ms: 300_000,
            afk_sweep_interval_ms: 30_000,
            reconnect_delay_ms: 3_000,
            outbound_capacity: 64,
            duplicate_policy: DuplicatePolicy::Replace,
        }
    }
}

impl SyncConfig {
    /// Parse a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is not valid TOML or fails validation.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional TOML file, then apply `CLASSROOM_*` overrides.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed, an override is
    /// malformed, or the result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up by environment-style key.
    ///
    /// # Errors
    /// Returns error if an override value cannot be parsed.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_number(&lookup, "CLASSROOM_TYPING_IDLE_MS", &mut self.typing_idle_ms)?;
        override_number(&lookup, "CLASSROOM_AFK_AFTER_MS", &mut self.afk_after_ms)?;
        override_number(
            &lookup,
            "CLASSROOM_AFK_SWEEP_INTERVAL_MS",
            &mut self.afk_sweep_interval_ms,
        )?;
        override_number(
            &lookup,
            "CLASSROOM_RECONNECT_DELAY_MS",
            &mut self.reconnect_delay_ms,
        )?;
        override_number(
            &lookup,
            "CLASSROOM_OUTBOUND_CAPACITY",
            &mut self.outbound_capacity,
        )?;
        if let Some(raw) = lookup("CLASSROOM_DUPLICATE_POLICY") {
            self.duplicate_policy = raw.parse()?;
        }
        Ok(())
    }

    /// Check that every duration and limit is usable.
    ///
    /// # Errors
    /// Returns error naming the first zero-valued field, or if
    /// `outbound_capacity` is not a power of two.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("typing_idle_ms", self.typing_idle_ms),
            ("afk_after_ms", self.afk_after_ms),
            ("afk_sweep_interval_ms", self.afk_sweep_interval_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if !self.outbound_capacity.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "outbound_capacity must be a power of two, got {}",
                self.outbound_capacity
            )));
        }
        Ok(())
    }

    #[must_use]
    pub const fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }

    #[must_use]
    pub const fn afk_after(&self) -> Duration {
        Duration::from_millis(self.afk_after_ms)
    }

    #[must_use]
    pub const fn afk_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.afk_sweep_interval_ms)
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

fn override_number<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("{key}: {e}")))?;
    }
    Ok(())
}
