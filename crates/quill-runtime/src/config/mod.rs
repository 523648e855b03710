//! Configuration module for the Quill runtime.
//!
//! Layered TOML/YAML/environment loading and validation of the logging
//! settings and the per-module `[modules]` table.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, ModuleSettings, QuillConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
