//! Endpoint routing information

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::IpNetwork;

use crate::error::{RouteError, ValidationError};
use crate::network::{DeviceResolver, MacAddress};
use crate::routing::{rules, PolicyStore, Router};

/// Address management mode the routing info was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpamMode {
    Eni,
    Azure,
    AlibabaCloud,
}

impl FromStr for IpamMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eni" => Ok(IpamMode::Eni),
            "azure" => Ok(IpamMode::Azure),
            "alibabacloud" => Ok(IpamMode::AlibabaCloud),
            other => Err(ValidationError::UnsupportedIpamMode(other.to_string())),
        }
    }
}

impl fmt::Display for IpamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpamMode::Eni => f.write_str("eni"),
            IpamMode::Azure => f.write_str("azure"),
            IpamMode::AlibabaCloud => f.write_str("alibabacloud"),
        }
    }
}

/// Routing configuration of one endpoint whose address lives on a
/// secondary interface. Held for the lifetime of the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingInfo {
    /// Next hop for the endpoint's egress traffic
    pub gateway: IpAddr,

    /// Ranges reachable directly through the interface (VPC/subnet CIDRs)
    pub cidrs: Vec<IpNetwork>,

    /// Hardware address of the interface backing the endpoint's address.
    /// Resolved to an ifindex at use time.
    pub master_interface_mac: MacAddress,

    pub masquerade: bool,

    /// Device number of the secondary interface; selects table and priority
    pub interface_number: u32,

    pub ipam_mode: IpamMode,
}

impl RoutingInfo {
    /// Parse routing information from its string representation
    pub fn parse(
        gateway: &str,
        cidrs: &[impl AsRef<str>],
        mac: &str,
        interface_number: &str,
        ipam_mode: IpamMode,
        masquerade: bool,
    ) -> Result<Self, ValidationError> {
        let gateway = gateway
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| ValidationError::InvalidGateway(gateway.to_string()))?;
        if !gateway.is_ipv4() {
            return Err(ValidationError::UnsupportedFamily(gateway.to_string()));
        }

        if cidrs.is_empty() {
            return Err(ValidationError::EmptyCidrs);
        }

        let cidrs = cidrs
            .iter()
            .map(|cidr| {
                let cidr = cidr.as_ref();
                let network = cidr
                    .trim()
                    .parse::<IpNetwork>()
                    .map_err(|_| ValidationError::InvalidCidr(cidr.to_string()))?;
                if !network.is_ipv4() {
                    return Err(ValidationError::UnsupportedFamily(cidr.to_string()));
                }
                Ok(network)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let master_interface_mac = mac.parse::<MacAddress>()?;

        let interface_number = interface_number
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|n| *n <= rules::MAX_INTERFACE_NUMBER)
            .ok_or_else(|| ValidationError::InvalidInterfaceNumber(interface_number.to_string()))?;

        Ok(Self {
            gateway,
            cidrs,
            master_interface_mac,
            masquerade,
            interface_number,
            ipam_mode,
        })
    }

    /// Install the rules and routes for `ip` through `router`
    pub async fn configure<S, R>(
        &self,
        router: &Router<S, R>,
        ip: IpAddr,
        mtu: u32,
        compat: bool,
    ) -> Result<(), RouteError>
    where
        S: PolicyStore + Sync,
        R: DeviceResolver + Sync,
    {
        router.configure(self, ip, mtu, compat).await
    }
}
