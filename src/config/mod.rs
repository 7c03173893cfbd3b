//! Configuration management module
//!
//! Handles loading configuration from multiple sources with proper precedence:
//! CLI arguments > environment variables > TOML files > defaults

use crate::error::ConfigError;
use crate::routing::IpamMode;

pub mod cli;
pub mod env;
pub mod toml;

use self::cli::CliArgs;

/// Log formats understood by the subscriber setup in `main`
pub const LOG_FORMATS: [&str; 2] = ["full", "compact"];

/// Main configuration structure
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub log_level: String,
    pub log_format: String,
    /// MTU set on the default route of endpoint tables
    pub mtu: u32,
    /// Use the legacy fixed egress rule priority
    pub egress_rule_compat: bool,
    pub ipam_mode: IpamMode,
    /// Named network namespace to operate in
    pub netns: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "full".to_string(),
            mtu: 1500,
            egress_rule_compat: false,
            ipam_mode: IpamMode::Eni,
            netns: None,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu < 68 {
            return Err(ConfigError::ValidationError(format!(
                "MTU {} is below the IPv4 minimum of 68",
                self.mtu
            )));
        }

        if !LOG_FORMATS.contains(&self.log_format.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Unknown log format '{}', expected one of {:?}",
                self.log_format, LOG_FORMATS
            )));
        }

        if self.netns.as_deref().is_some_and(|ns| ns.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "Network namespace name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Load the layered configuration for `cli`
pub fn load_configuration(cli: &CliArgs) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::default();

    if let Some(ref path) = cli.config {
        let file = self::toml::load_toml_config(path)?;
        config = self::toml::apply_toml_config(config, file)?;
    }

    config = self::env::apply_env_config(config)?;
    config = cli.apply_to_config(config)?;

    config.validate()?;
    Ok(config)
}
