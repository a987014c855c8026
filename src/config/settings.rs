//! Planner settings.
//!
//! Settings control how a planning run behaves rather than what it plans:
//! where state lives, which addresses are targeted, how many nodes may be
//! evaluated at once, and how logs are emitted.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::addrs::ResourceAddress;
use crate::error::Result;

/// Default number of nodes evaluated concurrently.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Default state file path.
pub const DEFAULT_STATE_PATH: &str = ".infraplan/state.json";

/// Settings for one planning run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannerSettings {
    /// Path of the local state file.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Operator targets; empty means plan everything.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Maximum number of nodes evaluated concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Whether to run a refresh walk before planning.
    #[serde(default = "default_refresh")]
    pub refresh: bool,
    /// Logging settings.
    #[serde(default)]
    pub log: LogSettings,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogSettings {
    /// Filter directive, e.g. `info` or `infraplan=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

const fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

const fn default_refresh() -> bool {
    true
}

fn default_log_level() -> String {
    String::from("info")
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            targets: Vec::new(),
            parallelism: DEFAULT_PARALLELISM,
            refresh: true,
            log: LogSettings::default(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl PlannerSettings {
    /// Parses the operator targets into addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if any target is not a well-formed address.
    pub fn target_addresses(&self) -> Result<Vec<ResourceAddress>> {
        self.targets
            .iter()
            .map(|t| ResourceAddress::parse(t).map_err(Into::into))
            .collect()
    }

    /// Returns the parallelism, never less than one.
    #[must_use]
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.max(1)
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = PlannerSettings::default();
        assert_eq!(settings.parallelism, DEFAULT_PARALLELISM);
        assert!(settings.refresh);
        assert!(settings.targets.is_empty());
        assert_eq!(settings.log.format, LogFormat::Text);
    }

    #[test]
    fn test_target_addresses() {
        let settings = PlannerSettings {
            targets: vec![String::from("aws_instance.web[1]"), String::from("data.aws_ami.x")],
            ..PlannerSettings::default()
        };
        let targets = settings.target_addresses().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].index, Some(1));

        let bad = PlannerSettings {
            targets: vec![String::from("nope")],
            ..PlannerSettings::default()
        };
        assert!(bad.target_addresses().is_err());
    }

    #[test]
    fn test_zero_parallelism_is_clamped() {
        let settings = PlannerSettings {
            parallelism: 0,
            ..PlannerSettings::default()
        };
        assert_eq!(settings.effective_parallelism(), 1);
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
