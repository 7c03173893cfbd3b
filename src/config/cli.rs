//! Command-line argument parsing

use std::net::IpAddr;

use clap::{ArgAction, Parser, Subcommand};

use crate::config::AppConfig;
use crate::error::ConfigError;
use crate::routing::IpamMode;

/// Command-line arguments structure
#[derive(Parser, Debug)]
#[command(name = "eni-routing")]
#[command(about = "Per-endpoint policy routing for secondary interface (ENI) addresses")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, help = "Path to TOML configuration file")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, help = "Set the logging level")]
    pub log_level: Option<String>,

    /// Log format (full, compact)
    #[arg(long, global = true, help = "Set the log output format")]
    pub log_format: Option<String>,

    /// Network namespace to operate in
    #[arg(long, global = true, help = "Named network namespace (as in `ip netns`) to operate in")]
    pub netns: Option<String>,

    /// Legacy egress rule priority scheme
    #[arg(
        long,
        global = true,
        help = "Use the legacy fixed egress rule priority instead of one per interface"
    )]
    pub egress_rule_compat: Option<bool>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit without touching routing state")]
    pub validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    pub print_default_config: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Routing operations
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Install rules and routes for an endpoint IP
    Configure {
        /// Endpoint IP address
        ip: IpAddr,

        /// Gateway of the secondary interface's subnet
        #[arg(long)]
        gateway: String,

        /// CIDRs reachable through the interface (comma separated)
        #[arg(long, value_delimiter = ',', required = true)]
        cidrs: Vec<String>,

        /// MAC address of the secondary interface
        #[arg(long)]
        mac: String,

        /// Device number of the secondary interface
        #[arg(long)]
        interface_number: String,

        /// Whether traffic leaving the CIDRs is masqueraded
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        masquerade: bool,

        /// IPAM mode the routing info belongs to
        #[arg(long)]
        ipam_mode: Option<String>,

        /// MTU of the default route
        #[arg(long)]
        mtu: Option<u32>,
    },

    /// Remove rules and routes of an endpoint IP
    Delete {
        /// Endpoint IP address
        ip: IpAddr,
    },
}

impl CliArgs {
    /// Apply CLI arguments over base configuration
    pub fn apply_to_config(&self, mut base_config: AppConfig) -> Result<AppConfig, ConfigError> {
        if let Some(ref level) = self.log_level {
            base_config.log_level = level.clone();
        }

        if let Some(ref format) = self.log_format {
            base_config.log_format = format.clone();
        }

        if let Some(ref netns) = self.netns {
            base_config.netns = Some(netns.clone());
        }

        if let Some(compat) = self.egress_rule_compat {
            base_config.egress_rule_compat = compat;
        }

        if let Some(Command::Configure { ipam_mode, mtu, .. }) = &self.command {
            if let Some(mode) = ipam_mode {
                base_config.ipam_mode = mode
                    .parse::<IpamMode>()
                    .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
            }
            if let Some(mtu) = mtu {
                base_config.mtu = *mtu;
            }
        }

        Ok(base_config)
    }
}

/// Print default configuration in TOML format
pub fn print_default_config() {
    let default_config = AppConfig::default();

    println!("# ENI Routing Configuration");
    println!("# This is the default configuration with all available options");
    println!();
    println!("# Named network namespace to operate in (omit for the current one)");
    println!("# netns = \"eni-test\"");
    println!();
    println!("[logging]");
    println!("# Log level: trace, debug, info, warn, error");
    println!("level = \"{}\"", default_config.log_level);
    println!("# Log format: full, compact");
    println!("format = \"{}\"", default_config.log_format);
    println!();
    println!("[routing]");
    println!("# MTU of the default route in endpoint tables");
    println!("mtu = {}", default_config.mtu);
    println!("# Use the legacy fixed egress rule priority");
    println!("egress_rule_compat = {}", default_config.egress_rule_compat);
    println!("# IPAM mode: eni, azure, alibabacloud");
    println!("ipam_mode = \"{}\"", default_config.ipam_mode);
}
