//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/scope_link.toml` (optional)
//! 3. Environment variables prefixed with `SCOPE_LINK_`, nested keys split on
//!    `__` (e.g. `SCOPE_LINK_NETWORK__PORT=6000`)
//!
//! Command-line flags are applied on top by the binary.
//!
//! # Example
//! ```no_run
//! use scope_link::config::ScopeLinkConfig;
//!
//! let config = ScopeLinkConfig::load()?;
//! config.validate()?;
//! println!("Listening on {}", config.socket_addr());
//! # Ok::<(), scope_link::error::ScopeError>(())
//! ```

use crate::acquisition::{AcquisitionSettings, DEFAULT_TRIGGER_TIMEOUT};
use crate::actors::DEFAULT_QUEUE_CAPACITY;
use crate::error::{ScopeError, ScopeResult};
use crate::network::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::tracing_init::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/scope_link.toml";

/// Longest accepted trigger wait.
pub const MAX_TRIGGER_TIMEOUT_SECS: f64 = 3600.0;

const ENV_PREFIX: &str = "SCOPE_LINK_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeLinkConfig {
    pub application: ApplicationConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub acquisition: AcquisitionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Logging format (pretty, compact, json)
    pub log_format: String,
    /// Log span enter/exit events
    pub log_span_events: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address the server binds to and the client connects to.
    pub address: String,
    pub port: u16,
    /// Largest frame accepted from the peer, in bytes.
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the client's per-run files.
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    pub trigger_timeout_secs: f64,
    pub restore_auto_on_timeout: bool,
    /// Request queue depth of the instrument actor.
    pub actor_queue_capacity: usize,
}

impl Default for ScopeLinkConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig {
                name: "scope_link".to_string(),
                log_level: "info".to_string(),
                log_format: "compact".to_string(),
                log_span_events: false,
            },
            network: NetworkConfig {
                address: "127.0.0.1".to_string(),
                port: 5025,
                max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            },
            storage: StorageConfig {
                output_dir: PathBuf::from("."),
            },
            acquisition: AcquisitionConfig {
                trigger_timeout_secs: DEFAULT_TRIGGER_TIMEOUT.as_secs_f64(),
                restore_auto_on_timeout: false,
                actor_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            },
        }
    }
}

impl ScopeLinkConfig {
    /// Load from the default file and environment.
    pub fn load() -> ScopeResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path. A missing file is not an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ScopeResult<Self> {
        Ok(Self::figment(path).extract()?)
    }

    fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ScopeResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ScopeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }
        self.application.log_format.parse::<OutputFormat>()?;

        if self.network.address.trim().is_empty() {
            return Err(ScopeError::Configuration(
                "network.address must not be empty".to_string(),
            ));
        }

        if self.network.max_frame_bytes == 0 {
            return Err(ScopeError::Configuration(
                "network.max_frame_bytes must be positive".to_string(),
            ));
        }

        let timeout = self.acquisition.trigger_timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 || timeout > MAX_TRIGGER_TIMEOUT_SECS {
            return Err(ScopeError::Configuration(format!(
                "Invalid trigger_timeout_secs {}. Must be between 0 and {} seconds",
                timeout, MAX_TRIGGER_TIMEOUT_SECS
            )));
        }

        if self.acquisition.actor_queue_capacity == 0 {
            return Err(ScopeError::Configuration(
                "acquisition.actor_queue_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// `address:port`, as accepted by `TcpListener::bind` and `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.network.address, self.network.port)
    }

    /// Trigger timeouts above [`MAX_TRIGGER_TIMEOUT_SECS`] are capped; values
    /// that are not a valid duration fall back to the default.
    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        let secs = self.acquisition.trigger_timeout_secs.min(MAX_TRIGGER_TIMEOUT_SECS);
        AcquisitionSettings {
            trigger_timeout: Duration::try_from_secs_f64(secs).unwrap_or(DEFAULT_TRIGGER_TIMEOUT),
            restore_auto_on_timeout: self.acquisition.restore_auto_on_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = ScopeLinkConfig::load_from("missing.toml").unwrap();
            assert_eq!(config, ScopeLinkConfig::default());
            assert!(config.validate().is_ok());
            assert_eq!(config.acquisition_settings().trigger_timeout, Duration::from_secs(10));
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "scope.toml",
                r#"
                [network]
                address = "0.0.0.0"
                port = 7000

                [acquisition]
                restore_auto_on_timeout = true
                "#,
            )?;
            jail.set_env("SCOPE_LINK_NETWORK__PORT", "7100");
            jail.set_env("SCOPE_LINK_APPLICATION__LOG_LEVEL", "debug");
            jail.set_env("SCOPE_LINK_APPLICATION__LOG_FORMAT", "json");

            let config = ScopeLinkConfig::load_from("scope.toml").unwrap();
            assert_eq!(config.socket_addr(), "0.0.0.0:7100");
            assert_eq!(config.application.log_level, "debug");
            assert_eq!(config.application.log_format, "json");
            assert!(config.acquisition.restore_auto_on_timeout);
            assert_eq!(config.network.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
            Ok(())
        });
    }

    #[test]
    fn test_config_validation() {
        let mut config = ScopeLinkConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(matches!(config.validate(), Err(ScopeError::Configuration(_))));

        let mut config = ScopeLinkConfig::default();
        config.acquisition.trigger_timeout_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = ScopeLinkConfig::default();
        config.network.max_frame_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = ScopeLinkConfig::default();
        config.application.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_timeout() {
        let mut config = ScopeLinkConfig::default();
        config.acquisition.trigger_timeout_secs = 1e20;
        assert!(config.validate().is_err());
        assert_eq!(
            config.acquisition_settings().trigger_timeout,
            Duration::from_secs(3600)
        );

        config.acquisition.trigger_timeout_secs = -1.0;
        assert!(config.validate().is_err());
        assert_eq!(config.acquisition_settings().trigger_timeout, DEFAULT_TRIGGER_TIMEOUT);
    }
}
