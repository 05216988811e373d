use std::path::Path;

use crate::config::schema::Config;
use crate::controller::sync_window;
use crate::error::ConfigError;

/// Loads the configuration file at `path`. A missing path yields the
/// defaults.
pub fn load_config<P: AsRef<Path>>(path: Option<P>) -> Result<Config, ConfigError> {
    let Some(path) = path else {
        log::info!("No config file given, using defaults");
        return Ok(Config::default());
    };

    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses and validates a configuration from YAML text.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    // An empty document means "all defaults"
    let config: Config = if content.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;

    Ok(config)
}

/// Checks timers, buffers and default sync windows.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let timers = &config.controller.timers;
    for (name, value) in [
        ("driftDetection", timers.drift_detection),
        ("waitAction", timers.wait_action),
        ("onError", timers.on_error),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("controller.timers.{} must be greater than zero", name),
            });
        }
    }

    if config.controller.run_history_limit == 0 {
        return Err(ConfigError::Validation {
            message: "controller.runHistoryLimit must be greater than zero".to_string(),
        });
    }

    if config.server.subscriber_buffer == 0 {
        return Err(ConfigError::Validation {
            message: "server.subscriberBuffer must be greater than zero".to_string(),
        });
    }

    if config.server.debounce_millis == 0 {
        return Err(ConfigError::Validation {
            message: "server.debounceMillis must be greater than zero".to_string(),
        });
    }

    for (index, window) in config.controller.default_sync_windows.iter().enumerate() {
        sync_window::validate_window(window).map_err(|reason| ConfigError::Validation {
            message: format!("controller.defaultSyncWindows[{}]: {}", index, reason),
        })?;
    }

    Ok(())
}
