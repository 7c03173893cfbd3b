use clap::Parser;
use tracing::{debug, info};

use eni_routing::config::cli::{print_default_config, CliArgs, Command};
use eni_routing::config::{load_configuration, AppConfig};
use eni_routing::error::{AppError, ConfigError};
use eni_routing::network::{namespace, NetlinkDeviceResolver, NetworkNamespace};
use eni_routing::routing::{NetlinkPolicyStore, Router, RoutingInfo};

fn init_logging(config: &AppConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(config.log_level.as_str());
    match config.log_format.as_str() {
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = CliArgs::parse();

    if cli.print_default_config {
        print_default_config();
        return Ok(());
    }

    let config = load_configuration(&cli)?;
    init_logging(&config);
    debug!("Loaded configuration: {:?}", config);

    if cli.validate_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let command = cli.command.ok_or_else(|| ConfigError::MissingRequired {
        field: "command".to_string(),
    })?;

    let netns = config.netns.as_deref().map(NetworkNamespace::new);
    let handle = namespace::connect(netns.as_ref())?;
    let router = Router::new(
        NetlinkPolicyStore::new(handle.clone()),
        NetlinkDeviceResolver::new(handle),
    );

    match command {
        Command::Configure {
            ip,
            gateway,
            cidrs,
            mac,
            interface_number,
            masquerade,
            ..
        } => {
            let routing_info = RoutingInfo::parse(
                &gateway,
                cidrs.as_slice(),
                &mac,
                &interface_number,
                config.ipam_mode,
                masquerade,
            )?;
            routing_info
                .configure(&router, ip, config.mtu, config.egress_rule_compat)
                .await?;
        }
        Command::Delete { ip } => {
            router.delete(ip, config.egress_rule_compat).await?;
        }
    }

    Ok(())
}
