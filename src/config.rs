//! Configuration management for txgate.
//!
//! Configuration is read from YAML and may be overridden by environment
//! variables of the form `TXGATE__<SECTION>__<FIELD>`, for example
//! `TXGATE__LIMITER__MAX_EVENTS=20`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LimiterError, Result};
use crate::ratelimit::{OutOfOrderPolicy, SweeperConfig, WindowPolicy};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "TXGATE";

/// Main configuration for txgate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxGateConfig {
    /// Limiter configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Idle-key sweeper configuration
    #[serde(default)]
    pub sweeper: SweeperSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Maximum admitted events per key per window
    #[serde(default = "default_max_events")]
    pub max_events: u64,

    /// Window width, in the unit of incoming timestamps
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,

    /// Handling of timestamps older than a key's last-seen timestamp
    #[serde(default)]
    pub out_of_order: OutOfOrderPolicy,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
            window_seconds: default_window_seconds(),
            out_of_order: OutOfOrderPolicy::default(),
        }
    }
}

fn default_max_events() -> u64 {
    10
}

fn default_window_seconds() -> i64 {
    60
}

/// Idle-key sweeper configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweeperSettings {
    /// Whether the background sweeper runs
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,

    /// Sweep interval in seconds
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TxGateConfig {
    /// Load configuration from a YAML file, applying environment overrides.
    ///
    /// Usually called before a subscriber exists, so it does not log.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string, applying environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::load(Some(yaml), ENV_PREFIX)
    }

    /// Load defaults with environment overrides only.
    pub fn from_env() -> Result<Self> {
        Self::load(None, ENV_PREFIX)
    }

    fn load(yaml: Option<&str>, env_prefix: &str) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(yaml) = yaml {
            builder = builder.add_source(config::File::from_str(yaml, config::FileFormat::Yaml));
        }

        let config: TxGateConfig = builder
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimiterError::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Check every value, failing on the first invalid one.
    pub fn validate(&self) -> Result<()> {
        self.window_policy()?;
        self.sweeper_config()?;
        Ok(())
    }

    /// Build the limiter policy described by this configuration.
    pub fn window_policy(&self) -> Result<WindowPolicy> {
        Ok(
            WindowPolicy::new(self.limiter.max_events, self.limiter.window_seconds)?
                .with_out_of_order(self.limiter.out_of_order),
        )
    }

    /// Build the sweeper configuration described by this configuration.
    pub fn sweeper_config(&self) -> Result<SweeperConfig> {
        SweeperConfig::new(Duration::from_secs(self.sweeper.interval_secs))
    }

    /// Serialize the effective configuration back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| LimiterError::Config(e.to_string()))
    }
}
