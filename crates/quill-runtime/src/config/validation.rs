//! Configuration validation utilities.

use serde_json::Value;

use quill_core::is_valid_module_name;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, ModuleSettings, QuillConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &QuillConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    for (name, settings) in &config.modules {
        validate_module_settings(name, settings)?;
    }
    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.output = \"file\" requires logging.file_path",
        ));
    }

    if logging.max_files == 0 {
        return Err(ConfigError::validation(
            "logging.max_files must be greater than 0",
        ));
    }

    for target in logging.filters.keys() {
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid logging filter target: '{target}'"
            )));
        }
    }

    Ok(())
}

/// Validates one `[modules."name"]` section.
fn validate_module_settings(name: &str, settings: &ModuleSettings) -> ConfigResult<()> {
    if !is_valid_module_name(name) {
        return Err(ConfigError::InvalidModuleName(name.to_string()));
    }

    match &settings.config {
        Value::Object(_) | Value::Null => Ok(()),
        _ => Err(ConfigError::validation(format!(
            "modules.\"{name}\".config must be a table"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_module(name: &str, config: Value) -> QuillConfig {
        let mut cfg = QuillConfig::default();
        cfg.modules.insert(
            name.to_string(),
            ModuleSettings {
                enabled: true,
                config,
            },
        );
        cfg
    }

    #[test]
    fn test_validate_empty_config() {
        assert!(validate_config(&QuillConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_module_names() {
        assert!(validate_config(&with_module("core.concealer", json!({}))).is_ok());
        for bad in ["", ".core", "core.", "core..x", "core x"] {
            let result = validate_config(&with_module(bad, json!({})));
            assert!(
                matches!(result, Err(ConfigError::InvalidModuleName(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_validate_config_must_be_table() {
        let result = validate_config(&with_module("core.concealer", json!("varied")));
        assert!(matches!(result, Err(ConfigError::ValidationError { .. })));
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = QuillConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("quill.log".into());
        assert!(validate_config(&config).is_ok());
    }
}
