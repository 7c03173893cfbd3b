//! Environment variable configuration handling

use std::env;

use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::routing::IpamMode;

/// Environment variable prefix
const ENV_PREFIX: &str = "ENI_ROUTING_";

/// Apply environment variable configuration over base configuration
pub fn apply_env_config(base_config: AppConfig) -> Result<AppConfig, ConfigError> {
    apply_env_with(base_config, |key| env::var(key).ok())
}

/// Apply configuration from `lookup`, which maps full variable names to values
pub fn apply_env_with<F>(mut base_config: AppConfig, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

    if let Some(level) = var("LOG_LEVEL") {
        base_config.log_level = level;
    }

    if let Some(format) = var("LOG_FORMAT") {
        base_config.log_format = format;
    }

    if let Some(mtu) = var("MTU") {
        base_config.mtu = mtu
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidFormat(format!("Invalid MTU: '{}'", mtu)))?;
    }

    if let Some(compat) = var("EGRESS_RULE_COMPAT") {
        base_config.egress_rule_compat = parse_bool(&compat)?;
    }

    if let Some(mode) = var("IPAM_MODE") {
        base_config.ipam_mode = mode
            .parse::<IpamMode>()
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
    }

    if let Some(netns) = var("NETNS") {
        base_config.netns = Some(netns);
    }

    Ok(base_config)
}

/// Parse a boolean flag as written in environment files
pub fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFormat(format!(
            "Invalid boolean: '{}'. Expected true/false",
            value
        ))),
    }
}
