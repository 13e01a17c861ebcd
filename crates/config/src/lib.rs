//! Configuration loading, validation and env substitution.
//!
//! Config files: `dashlive.toml`, `dashlive.yaml`, or `dashlive.json`
//! Searched in `./` then `~/.config/dashlive/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        AuthConfig, ChannelsConfig, DashliveConfig, DataSourceEntry, ServerConfig, TransportConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_file},
};
