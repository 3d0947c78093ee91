//! Engine settings.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file,
//! `AVAILABILITY_*` environment variables (e.g. `AVAILABILITY_TIMEZONE`).

use std::path::Path;

use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::recurrence::MAX_OCCURRENCES;

/// How many conflicts a create call resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreatePolicy {
    /// Resolve the first substantive conflict only.
    #[default]
    FirstConflict,
    /// Resolve every substantive conflict before committing.
    ResolveAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on occurrences per request; never above 104.
    pub max_occurrences: u32,
    /// IANA timezone used for calendar dates and weekdays.
    pub timezone: String,
    pub create_policy: CreatePolicy,
    pub default_title: String,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_occurrences: MAX_OCCURRENCES,
            timezone: "UTC".to_string(),
            create_policy: CreatePolicy::default(),
            default_title: "Available".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from `availability.toml` in the working directory (if present) and
    /// the environment.
    ///
    /// # Errors
    /// Returns `EngineError::Config` if a source cannot be read or deserialized,
    /// and `EngineError::InvalidTimezone` for an unknown timezone.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`EngineConfig::load`], reading the TOML file at `path` instead.
    /// An explicitly given file must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::new("availability", FileFormat::Toml).required(false),
        };

        let settings: Self = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("AVAILABILITY")
                    .try_parsing(true)
                    .ignore_empty(true),
            )
            .build()
            .and_then(Config::try_deserialize::<Self>)
            .map_err(|e| EngineError::Config(e.to_string()))?;

        settings.validate()
    }

    /// Check cross-field constraints.
    pub fn validate(self) -> Result<Self> {
        self.tz()?;
        if self.max_occurrences == 0 {
            return Err(EngineError::Config(
                "max_occurrences must be at least 1".to_string(),
            ));
        }
        if self.default_title.trim().is_empty() {
            return Err(EngineError::Config(
                "default_title must not be empty".to_string(),
            ));
        }
        Ok(self)
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| EngineError::InvalidTimezone(self.timezone.clone()))
    }

    /// Effective per-request ceiling.
    pub fn occurrence_ceiling(&self) -> u32 {
        self.max_occurrences.clamp(1, MAX_OCCURRENCES)
    }
}
