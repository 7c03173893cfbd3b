//! Routing policy management module
//!
//! Builds and applies the per-endpoint rules and routes that steer an ENI
//! address out of its secondary interface.

use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;

use crate::error::NetworkError;

pub mod engine;
pub mod info;
pub mod manager;
pub mod rules;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::Router;
pub use info::{IpamMode, RoutingInfo};
pub use manager::NetlinkPolicyStore;

/// Priority of the per-endpoint ingress rules, shared by all endpoints
pub const RULE_PRIORITY_INGRESS: u32 = 20;

/// Legacy fixed priority of egress rules, offset by the interface number
/// unless the compatibility scheme is requested
pub const RULE_PRIORITY_EGRESS: u32 = 110;

/// Priority of the kernel's main table rule; egress rules must stay below it
pub const RULE_PRIORITY_MAIN: u32 = 32766;

/// First routing table used for interface tables
pub const ROUTE_TABLE_INTERFACES_OFFSET: u32 = 10;

/// Kernel tables that interface tables must never land on
pub const RESERVED_TABLES: [u32; 3] = [253, 254, 255];

/// IP address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    /// Prefix length selecting exactly one address
    pub fn host_prefix(&self) -> u8 {
        match self {
            IpFamily::V4 => 32,
            IpFamily::V6 => 128,
        }
    }

    /// The `0.0.0.0/0` or `::/0` network
    pub fn default_network(&self) -> IpNetwork {
        let unspecified = match self {
            IpFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        IpNetwork::new(unspecified, 0).expect("zero prefix is valid for every family")
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("ipv4"),
            IpFamily::V6 => f.write_str("ipv6"),
        }
    }
}

/// Single-address network for `ip`
pub fn host_network(ip: IpAddr) -> IpNetwork {
    IpNetwork::new(ip, IpFamily::of(&ip).host_prefix()).expect("host prefix is valid")
}

/// One routing-policy rule.
///
/// Ingress rules select on `destination`, egress rules on `source` (and
/// optionally a destination range). Equality is field-wise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub family: IpFamily,
    pub priority: u32,
    pub source: Option<IpNetwork>,
    pub destination: Option<IpNetwork>,
    pub table: u32,
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rule pref {}", self.family, self.priority)?;
        if let Some(src) = self.source {
            write!(f, " from {src}")?;
        }
        if let Some(dst) = self.destination {
            write!(f, " to {dst}")?;
        }
        write!(f, " lookup {}", self.table)
    }
}

/// Route scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteScope {
    Universe,
    Site,
    Link,
    Host,
    Nowhere,
    Other(u8),
}

impl fmt::Display for RouteScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteScope::Universe => f.write_str("global"),
            RouteScope::Site => f.write_str("site"),
            RouteScope::Link => f.write_str("link"),
            RouteScope::Host => f.write_str("host"),
            RouteScope::Nowhere => f.write_str("nowhere"),
            RouteScope::Other(scope) => write!(f, "{scope}"),
        }
    }
}

/// One route in a routing table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub destination: IpNetwork,
    pub gateway: Option<IpAddr>,
    pub output_interface: u32,
    pub table: u32,
    pub scope: RouteScope,
    pub mtu: Option<u32>,
}

impl RouteSpec {
    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.destination.ip())
    }
}

impl fmt::Display for RouteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route {}", self.destination)?;
        if let Some(gw) = self.gateway {
            write!(f, " via {gw}")?;
        }
        write!(f, " dev #{} table {}", self.output_interface, self.table)?;
        if self.scope != RouteScope::Universe {
            write!(f, " scope {}", self.scope)?;
        }
        if let Some(mtu) = self.mtu {
            write!(f, " mtu {mtu}")?;
        }
        Ok(())
    }
}

/// Server-side narrowing of a rule listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub priority: Option<u32>,
    pub table: Option<u32>,
}

impl RuleFilter {
    pub fn matches(&self, rule: &RuleSpec) -> bool {
        self.priority.is_none_or(|p| rule.priority == p)
            && self.table.is_none_or(|t| rule.table == t)
    }
}

/// Explicit "is this one of ours" predicate compared field by field
/// against listed kernel rules. `None` fields are wildcards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleMatcher {
    pub family: Option<IpFamily>,
    pub priority: Option<u32>,
    pub source: Option<IpNetwork>,
    pub destination: Option<IpNetwork>,
    pub table: Option<u32>,
}

impl RuleMatcher {
    /// Rules routing traffic addressed to `ip` at `priority`
    pub fn ingress(ip: IpAddr, priority: u32) -> Self {
        Self {
            family: Some(IpFamily::of(&ip)),
            priority: Some(priority),
            destination: Some(host_network(ip)),
            ..Self::default()
        }
    }

    /// Rules routing traffic sourced from `ip` into `table`
    pub fn egress(ip: IpAddr, table: u32) -> Self {
        Self {
            family: Some(IpFamily::of(&ip)),
            source: Some(host_network(ip)),
            table: Some(table),
            ..Self::default()
        }
    }

    pub fn with_priority(self, priority: u32) -> Self {
        Self { priority: Some(priority), ..self }
    }

    pub fn matches(&self, rule: &RuleSpec) -> bool {
        self.family.is_none_or(|f| rule.family == f)
            && self.priority.is_none_or(|p| rule.priority == p)
            && self.source.is_none_or(|s| rule.source == Some(s))
            && self.destination.is_none_or(|d| rule.destination == Some(d))
            && self.table.is_none_or(|t| rule.table == t)
    }
}

/// The kernel's rule and route tables.
///
/// Global shared state with list/add/delete primitives only; there are no
/// transactions.
pub trait PolicyStore {
    fn list_rules(
        &self,
        family: IpFamily,
        filter: RuleFilter,
    ) -> impl Future<Output = Result<Vec<RuleSpec>, NetworkError>> + Send;

    fn add_rule(
        &self,
        rule: &RuleSpec,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn delete_rule(
        &self,
        rule: &RuleSpec,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn list_routes(
        &self,
        family: IpFamily,
        table: Option<u32>,
    ) -> impl Future<Output = Result<Vec<RouteSpec>, NetworkError>> + Send;

    fn add_route(
        &self,
        route: &RouteSpec,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn delete_route(
        &self,
        route: &RouteSpec,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;
}
