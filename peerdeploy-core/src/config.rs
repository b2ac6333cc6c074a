use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub deployment: DeploymentConfig,
    pub membership: MembershipConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Grace period for superseded deployments and the window in which
    /// stale requests are still accepted
    pub network_timeout_ms: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            network_timeout_ms: 5000,
        }
    }
}

impl DeploymentConfig {
    #[must_use]
    pub const fn network_timeout(&self) -> Duration {
        Duration::from_millis(self.network_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// This node's member ID; empty means generate one at startup
    pub node_id: String,
    pub heartbeat_timeout_secs: i64,
    pub check_interval_secs: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            heartbeat_timeout_secs: 30,
            check_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured output for log shippers
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level for every target
    pub level: String,
    pub format: LogFormat,
    /// Extra filter directives, e.g. `peerdeploy_cluster::deployment=debug`
    pub directives: Vec<String>,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            directives: Vec::new(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // PEERDEPLOY_DEPLOYMENT__NETWORK_TIMEOUT_MS, etc.
        builder = builder.add_source(
            Environment::with_prefix("PEERDEPLOY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check for settings the node cannot run with
    ///
    /// Returns every problem found rather than stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.deployment.network_timeout_ms == 0 {
            errors.push("deployment.network_timeout_ms must be greater than zero".to_string());
        }
        if self.membership.heartbeat_timeout_secs <= 0 {
            errors.push("membership.heartbeat_timeout_secs must be greater than zero".to_string());
        }
        if self.membership.check_interval_secs == 0 {
            errors.push("membership.check_interval_secs must be greater than zero".to_string());
        }
        if let Err(e) = crate::logging::parse_log_level(&self.logging.level) {
            errors.push(format!("logging.level: {e}"));
        }
        for directive in &self.logging.directives {
            if let Err(e) = crate::logging::parse_directive(directive) {
                errors.push(format!("logging.directives: {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
