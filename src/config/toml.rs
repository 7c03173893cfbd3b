//! TOML configuration file parsing

use serde::Deserialize;

use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::routing::IpamMode;

/// TOML configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct TomlConfig {
    pub netns: Option<String>,
    pub logging: Option<LoggingConfig>,
    pub routing: Option<RoutingConfig>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// Routing defaults
#[derive(Debug, Deserialize)]
pub struct RoutingConfig {
    pub mtu: Option<u32>,
    pub egress_rule_compat: Option<bool>,
    pub ipam_mode: Option<String>,
}

/// Load configuration from TOML file
pub fn load_toml_config(path: &str) -> Result<TomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::FileNotFound { path: path.to_string() })?;

    ::toml::from_str(&content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
}

/// Apply TOML configuration over base configuration
pub fn apply_toml_config(mut base_config: AppConfig, file: TomlConfig) -> Result<AppConfig, ConfigError> {
    if let Some(netns) = file.netns {
        base_config.netns = Some(netns);
    }

    if let Some(logging) = file.logging {
        if let Some(level) = logging.level {
            base_config.log_level = level;
        }
        if let Some(format) = logging.format {
            base_config.log_format = format;
        }
    }

    if let Some(routing) = file.routing {
        if let Some(mtu) = routing.mtu {
            base_config.mtu = mtu;
        }
        if let Some(compat) = routing.egress_rule_compat {
            base_config.egress_rule_compat = compat;
        }
        if let Some(mode) = routing.ipam_mode {
            base_config.ipam_mode = mode
                .parse::<IpamMode>()
                .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        }
    }

    Ok(base_config)
}
