//! Server configuration.
//!
//! Values are read from environment variables with the `PAGESYNC` prefix, using
//! `__` as separator:
//!
//! - `PAGESYNC__OUTBOUND_QUEUE_CAPACITY=128`
//! - `PAGESYNC__FRAMING=binary`
//! - `PAGESYNC__WS_PATH=/collab`

use serde::Deserialize;

use crate::protocol::Framing;
use crate::{SyncError, SyncResult};

/// Settings shared by every connection
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Messages buffered per client before it is dropped as unreachable
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Framing used for outbound messages
    #[serde(default)]
    pub framing: Framing,

    /// Route the WebSocket endpoint is mounted on
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

impl SyncConfig {
    /// Load configuration from `PAGESYNC__*` environment variables
    ///
    /// Unset values fall back to their defaults.
    pub fn load() -> SyncResult<Self> {
        let config = ::config::Config::builder()
            .add_source(
                ::config::Environment::default()
                    .prefix("PAGESYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> SyncResult<()> {
        if self.outbound_queue_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "outbound_queue_capacity must be at least 1".to_string(),
            ));
        }
        if !self.ws_path.starts_with('/') {
            return Err(SyncError::InvalidConfig(format!(
                "ws_path must start with '/': {}",
                self.ws_path
            )));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            outbound_queue_capacity: default_outbound_queue_capacity(),
            framing: Framing::default(),
            ws_path: default_ws_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // env vars are process-global
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        env::remove_var("PAGESYNC__OUTBOUND_QUEUE_CAPACITY");
        env::remove_var("PAGESYNC__FRAMING");
        env::remove_var("PAGESYNC__WS_PATH");
    }

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.framing, Framing::Text);
        assert_eq!(config.ws_path, "/ws");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_environment_uses_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let config = SyncConfig::load().unwrap();
        assert_eq!(config.outbound_queue_capacity, 256);
        assert_eq!(config.ws_path, "/ws");
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("PAGESYNC__OUTBOUND_QUEUE_CAPACITY", "8");
        env::set_var("PAGESYNC__FRAMING", "binary");
        env::set_var("PAGESYNC__WS_PATH", "/collab");
        let result = SyncConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.outbound_queue_capacity, 8);
        assert_eq!(config.framing, Framing::Binary);
        assert_eq!(config.ws_path, "/collab");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SyncConfig {
            outbound_queue_capacity: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        let config = SyncConfig {
            ws_path: "ws".to_string(),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
