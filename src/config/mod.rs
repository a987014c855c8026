//! Configuration module for the planning core.
//!
//! This module handles all configuration-related functionality:
//! - The declarative resource model the planner consumes
//! - Planner settings loaded from `infraplan.yaml` and the environment
//! - Validation of the resource model before graph building
//! - Computing fingerprints for plans and idempotence checks

mod hash;
mod loader;
mod model;
mod settings;
mod validator;

pub use hash::ConfigHasher;
pub use loader::{
    DEFAULT_SETTINGS_FILES, ENV_LOG, ENV_LOG_FORMAT, ENV_PARALLELISM, ENV_REFRESH, ENV_STATE_PATH,
    ENV_TARGETS, SettingsLoader, find_settings_file,
};
pub use model::{Config, CountExpr, Lifecycle, ModuleConfig, RawConfig, ResourceConfig};
pub use settings::{DEFAULT_PARALLELISM, DEFAULT_STATE_PATH, LogFormat, LogSettings, PlannerSettings};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
