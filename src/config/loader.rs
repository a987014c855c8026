//! Loading of planner settings and resource configuration.
//!
//! Settings come from a YAML file, then environment variables override
//! individual fields. Resource configuration is plain YAML.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, InfraplanError, Result};

use super::model::Config;
use super::settings::{LogFormat, PlannerSettings};

/// Environment variable overriding the state path.
pub const ENV_STATE_PATH: &str = "INFRAPLAN_STATE_PATH";
/// Environment variable overriding targets (comma separated).
pub const ENV_TARGETS: &str = "INFRAPLAN_TARGETS";
/// Environment variable overriding parallelism.
pub const ENV_PARALLELISM: &str = "INFRAPLAN_PARALLELISM";
/// Environment variable overriding the refresh flag.
pub const ENV_REFRESH: &str = "INFRAPLAN_REFRESH";
/// Environment variable overriding the log filter.
pub const ENV_LOG: &str = "INFRAPLAN_LOG";
/// Environment variable overriding the log format.
pub const ENV_LOG_FORMAT: &str = "INFRAPLAN_LOG_FORMAT";

/// Loader for settings and configuration files.
#[derive(Debug, Default)]
pub struct SettingsLoader {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl SettingsLoader {
    /// Creates a new loader.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to find the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<PlannerSettings> {
        let path = path.as_ref();
        info!("Loading settings from: {}", path.display());

        let content = read_file(path)?;
        self.parse_yaml(&content, Some(path))
    }

    /// Parses settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<PlannerSettings> {
        debug!("Parsing YAML settings");
        // An empty document means "all defaults".
        if content.trim().is_empty() {
            return Ok(PlannerSettings::default());
        }
        serde_yaml::from_str(content).map_err(|e| parse_error("YAML parse error", &e, source))
    }

    /// Loads settings, then the `.env` file, then applies environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed, or an override
    /// holds an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<PlannerSettings> {
        let mut settings = self.load_file(path)?;
        self.load_dotenv()?;
        Self::apply_overrides_from(&mut settings, |name| std::env::var(name).ok())?;
        Ok(settings)
    }

    /// Applies overrides looked up through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if an override holds a value of the wrong type.
    pub fn apply_overrides_from<F>(settings: &mut PlannerSettings, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(ENV_STATE_PATH) {
            debug!("Overriding state_path from environment");
            settings.state_path = PathBuf::from(path);
        }

        if let Some(targets) = lookup(ENV_TARGETS) {
            debug!("Overriding targets from environment");
            settings.targets = targets
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(parallelism) = lookup(ENV_PARALLELISM) {
            debug!("Overriding parallelism from environment");
            settings.parallelism = parallelism.trim().parse().map_err(|_| {
                ConfigError::validation(
                    format!("expected a positive integer, got '{parallelism}'"),
                    ENV_PARALLELISM,
                )
            })?;
        }

        if let Some(refresh) = lookup(ENV_REFRESH) {
            debug!("Overriding refresh from environment");
            settings.refresh = parse_bool(&refresh).ok_or_else(|| {
                ConfigError::validation(format!("expected a boolean, got '{refresh}'"), ENV_REFRESH)
            })?;
        }

        if let Some(level) = lookup(ENV_LOG) {
            debug!("Overriding log.level from environment");
            settings.log.level = level;
        }

        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            debug!("Overriding log.format from environment");
            settings.log.format = format
                .parse::<LogFormat>()
                .map_err(|message| ConfigError::validation(message, ENV_LOG_FORMAT))?;
        }

        Ok(())
    }

    /// Loads the `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                InfraplanError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Loads a resource configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_config(&self, path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = read_file(path)?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| parse_error("YAML parse error", &e, Some(path)))?;

        debug!(resources = config.resource_count(), "Parsed configuration");
        Ok(config)
    }
}

/// Default settings file names to search for.
pub const DEFAULT_SETTINGS_FILES: &[&str] = &["infraplan.yaml", "infraplan.yml"];

/// Finds the settings file in `start_dir` or one of its parents.
///
/// # Errors
///
/// Returns an error if no settings file is found.
pub fn find_settings_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_SETTINGS_FILES {
            let candidate = current.join(filename);
            if candidate.exists() {
                info!("Found settings file: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(InfraplanError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_SETTINGS_FILES[0]),
    }))
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(InfraplanError::Config(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }));
    }

    std::fs::read_to_string(path).map_err(|e| {
        InfraplanError::Config(ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })
    })
}

fn parse_error(prefix: &str, err: &serde_yaml::Error, source: Option<&Path>) -> InfraplanError {
    InfraplanError::Config(ConfigError::ParseError {
        message: format!("{prefix}: {err}"),
        location: source.map(|p| p.display().to_string()),
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
