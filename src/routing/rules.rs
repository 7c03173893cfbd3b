//! Routing rule calculation and validation

use std::net::IpAddr;

use crate::error::RouteError;
use crate::routing::info::{IpamMode, RoutingInfo};
use crate::routing::{
    host_network, IpFamily, RouteScope, RouteSpec, RuleSpec, RESERVED_TABLES,
    ROUTE_TABLE_INTERFACES_OFFSET, RULE_PRIORITY_EGRESS, RULE_PRIORITY_INGRESS,
    RULE_PRIORITY_MAIN,
};

/// Largest interface number whose egress rule still sorts before the main
/// table rule
pub const MAX_INTERFACE_NUMBER: u32 = RULE_PRIORITY_MAIN - RULE_PRIORITY_EGRESS - 1;

/// Routing table holding the routes of interface `interface_number`.
///
/// Tables are allocated upwards from the interface offset, stepping over
/// the kernel's reserved default/main/local tables.
pub fn table_id(interface_number: u32) -> u32 {
    let table = ROUTE_TABLE_INTERFACES_OFFSET.saturating_add(interface_number);
    if table >= RESERVED_TABLES[0] {
        table.saturating_add(RESERVED_TABLES.len() as u32)
    } else {
        table
    }
}

/// Interface number owning `table`, or `None` for tables `table_id` never
/// hands out
pub fn interface_number_of(table: u32) -> Option<u32> {
    let number = table.checked_sub(ROUTE_TABLE_INTERFACES_OFFSET)?;
    if table < RESERVED_TABLES[0] {
        return Some(number);
    }
    if RESERVED_TABLES.contains(&table) {
        return None;
    }
    let number = number.checked_sub(RESERVED_TABLES.len() as u32)?;
    (table_id(number) == table).then_some(number)
}

/// Priority of the egress rules of interface `interface_number`
pub fn egress_priority(interface_number: u32, compat: bool) -> u32 {
    if compat {
        RULE_PRIORITY_EGRESS
    } else {
        RULE_PRIORITY_EGRESS.saturating_add(interface_number)
    }
}

/// Fail with `IncompatibleIp` unless `ip` has the gateway's family
pub fn check_compatible(info: &RoutingInfo, ip: IpAddr) -> Result<(), RouteError> {
    if IpFamily::of(&ip) != IpFamily::of(&info.gateway) {
        return Err(RouteError::IncompatibleIp { ip });
    }
    Ok(())
}

/// Rules and routes for one endpoint, in the order they are applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPlan {
    pub rules: Vec<RuleSpec>,
    pub routes: Vec<RouteSpec>,
}

/// Routing rule calculator
pub struct RoutingRuleCalculator<'a> {
    info: &'a RoutingInfo,
    compat: bool,
}

impl<'a> RoutingRuleCalculator<'a> {
    pub fn new(info: &'a RoutingInfo, compat: bool) -> Self {
        Self { info, compat }
    }

    /// Calculate the full plan for `ip` leaving through interface `ifindex`
    pub fn calculate(&self, ip: IpAddr, ifindex: u32, mtu: u32) -> Result<RoutingPlan, RouteError> {
        check_compatible(self.info, ip)?;

        Ok(RoutingPlan {
            rules: self.calculate_rules(ip),
            routes: self.calculate_routes(ifindex, mtu),
        })
    }

    /// Ingress rule first, then the egress rules.
    ///
    /// With masquerading in ENI mode only traffic towards the VPC CIDRs is
    /// steered into the interface table; everything else keeps going
    /// through the main table and gets masqueraded.
    pub fn calculate_rules(&self, ip: IpAddr) -> Vec<RuleSpec> {
        let family = IpFamily::of(&ip);
        let endpoint = host_network(ip);
        let table = table_id(self.info.interface_number);
        let egress_priority = egress_priority(self.info.interface_number, self.compat);

        let mut rules = vec![RuleSpec {
            family,
            priority: RULE_PRIORITY_INGRESS,
            source: None,
            destination: Some(endpoint),
            table,
        }];

        if self.info.masquerade && self.info.ipam_mode == IpamMode::Eni {
            rules.extend(self.info.cidrs.iter().map(|cidr| RuleSpec {
                family,
                priority: egress_priority,
                source: Some(endpoint),
                destination: Some(*cidr),
                table,
            }));
        } else {
            rules.push(RuleSpec {
                family,
                priority: egress_priority,
                source: Some(endpoint),
                destination: None,
                table,
            });
        }

        rules
    }

    /// Gateway host route, default route, then the unmasqueraded CIDRs
    pub fn calculate_routes(&self, ifindex: u32, mtu: u32) -> Vec<RouteSpec> {
        let gateway = self.info.gateway;
        let family = IpFamily::of(&gateway);
        let table = table_id(self.info.interface_number);

        // The endpoint does no L2, so the gateway gets a link-scoped /32
        // instead of relying on a connected subnet route.
        let mut routes = vec![
            RouteSpec {
                destination: host_network(gateway),
                gateway: None,
                output_interface: ifindex,
                table,
                scope: RouteScope::Link,
                mtu: None,
            },
            RouteSpec {
                destination: family.default_network(),
                gateway: Some(gateway),
                output_interface: ifindex,
                table,
                scope: RouteScope::Universe,
                mtu: (mtu > 0).then_some(mtu),
            },
        ];

        if !self.info.masquerade {
            routes.extend(self.info.cidrs.iter().map(|cidr| RouteSpec {
                destination: *cidr,
                gateway: None,
                output_interface: ifindex,
                table,
                scope: RouteScope::Link,
                mtu: None,
            }));
        }

        routes
    }
}
