//! Logging setup.
//!
//! Installs a global `tracing` subscriber configured from [`LogSettings`].
//! `RUST_LOG`, when set, takes precedence over the configured level.

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LogSettings};
use crate::error::{ConfigError, InfraplanError, Result};

/// Builds the event filter for `settings`.
///
/// # Errors
///
/// Returns an error if the configured level is not a valid filter directive.
pub fn build_filter(settings: &LogSettings) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&settings.level).map_err(|e| {
        ConfigError::validation(format!("invalid log filter: {e}"), "log.level").into()
    })
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter is invalid or a subscriber is already
/// installed.
pub fn try_init_logging(settings: &LogSettings) -> Result<()> {
    let filter = build_filter(settings)?;
    let installed = match settings.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
    };
    installed.map_err(|e| InfraplanError::internal(format!("failed to install logger: {e}")))
}

/// Installs the global subscriber, ignoring a subscriber that is already
/// installed or an invalid filter.
pub fn init_logging(settings: &LogSettings) {
    if let Err(err) = try_init_logging(settings) {
        tracing::debug!("Logging not initialized: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let settings = LogSettings {
            level: String::from("infraplan=notalevel"),
            format: LogFormat::Text,
        };
        assert!(matches!(
            build_filter(&settings),
            Err(InfraplanError::Config(_))
        ));
    }

    #[test]
    fn test_second_install_fails() {
        let settings = LogSettings::default();
        init_logging(&settings);
        assert!(try_init_logging(&settings).is_err());
    }
}
