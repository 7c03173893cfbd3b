//! Rule and route management using rtnetlink

use std::io::ErrorKind;
use std::net::IpAddr;

use futures_util::TryStreamExt;
use ipnetwork::IpNetwork;
use rtnetlink::packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteMetric, RouteProtocol,
    RouteScope as NlRouteScope,
};
use rtnetlink::packet_route::rule::{RuleAction, RuleAttribute, RuleMessage};
use rtnetlink::packet_route::AddressFamily;
use rtnetlink::{Handle, IpVersion, RouteMessageBuilder};
use tracing::trace;

use crate::error::NetworkError;
use crate::network::namespace::{self, NetworkNamespace};
use crate::routing::{IpFamily, PolicyStore, RouteScope, RouteSpec, RuleFilter, RuleSpec};

/// Kernel rule/route tables accessed over rtnetlink
#[derive(Clone)]
pub struct NetlinkPolicyStore {
    handle: Handle,
}

impl NetlinkPolicyStore {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Open a connection in `namespace` (or the current one) and wrap it
    pub fn connect(namespace: Option<&NetworkNamespace>) -> Result<Self, NetworkError> {
        Ok(Self::new(namespace::connect(namespace)?))
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

fn netlink_error(e: rtnetlink::Error, what: &dyn std::fmt::Display) -> NetworkError {
    if let rtnetlink::Error::NetlinkError(ref msg) = e {
        if let Some(code) = msg.code {
            match std::io::Error::from_raw_os_error(-code.get()).kind() {
                ErrorKind::AlreadyExists => return NetworkError::AlreadyExists(what.to_string()),
                ErrorKind::NotFound => return NetworkError::NotFound(what.to_string()),
                _ => {}
            }
        }
    }
    NetworkError::Netlink(format!("{what}: {e}"))
}

fn address_family(family: IpFamily) -> AddressFamily {
    match family {
        IpFamily::V4 => AddressFamily::Inet,
        IpFamily::V6 => AddressFamily::Inet6,
    }
}

fn ip_family(family: AddressFamily) -> Option<IpFamily> {
    match family {
        AddressFamily::Inet => Some(IpFamily::V4),
        AddressFamily::Inet6 => Some(IpFamily::V6),
        _ => None,
    }
}

fn ip_version(family: IpFamily) -> IpVersion {
    match family {
        IpFamily::V4 => IpVersion::V4,
        IpFamily::V6 => IpVersion::V6,
    }
}

/// Header table byte for `table`; tables past 255 only fit the attribute
fn header_table(table: u32) -> u8 {
    u8::try_from(table).unwrap_or(0)
}

pub(crate) fn rule_message(rule: &RuleSpec) -> RuleMessage {
    let mut msg = RuleMessage::default();
    msg.header.family = address_family(rule.family);
    msg.header.action = RuleAction::ToTable;
    msg.header.table = header_table(rule.table);

    msg.attributes.push(RuleAttribute::Priority(rule.priority));
    msg.attributes.push(RuleAttribute::Table(rule.table));

    if let Some(src) = rule.source {
        msg.header.src_len = src.prefix();
        msg.attributes.push(RuleAttribute::Source(src.ip()));
    }
    if let Some(dst) = rule.destination {
        msg.header.dst_len = dst.prefix();
        msg.attributes.push(RuleAttribute::Destination(dst.ip()));
    }

    msg
}

pub(crate) fn rule_spec(msg: &RuleMessage) -> Option<RuleSpec> {
    let family = ip_family(msg.header.family)?;

    let mut spec = RuleSpec {
        family,
        priority: 0,
        source: None,
        destination: None,
        table: u32::from(msg.header.table),
    };

    for attr in &msg.attributes {
        match attr {
            RuleAttribute::Priority(p) => spec.priority = *p,
            RuleAttribute::Table(t) => spec.table = *t,
            RuleAttribute::Source(ip) => spec.source = IpNetwork::new(*ip, msg.header.src_len).ok(),
            RuleAttribute::Destination(ip) => {
                spec.destination = IpNetwork::new(*ip, msg.header.dst_len).ok()
            }
            _ => {}
        }
    }

    Some(spec)
}

fn route_ip(addr: &RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(v4) => Some(IpAddr::V4(*v4)),
        RouteAddress::Inet6(v6) => Some(IpAddr::V6(*v6)),
        _ => None,
    }
}

fn invalid_route<E: std::fmt::Debug>(route: &RouteSpec) -> impl Fn(E) -> NetworkError + '_ {
    move |e| NetworkError::OperationFailed(format!("{route}: {e:?}"))
}

pub(crate) fn route_message(route: &RouteSpec) -> Result<RouteMessage, NetworkError> {
    let mut builder = RouteMessageBuilder::<IpAddr>::new()
        .table_id(route.table)
        .output_interface(route.output_interface)
        .destination_prefix(route.destination.ip(), route.destination.prefix())
        .map_err(invalid_route(route))?;

    if let Some(gateway) = route.gateway {
        builder = builder.gateway(gateway).map_err(invalid_route(route))?;
    }

    let mut msg = builder.build();
    msg.header.scope = netlink_scope(route.scope);
    if let Some(mtu) = route.mtu {
        msg.attributes.push(RouteAttribute::Metrics(vec![RouteMetric::Mtu(mtu)]));
    }

    Ok(msg)
}

fn netlink_scope(scope: RouteScope) -> NlRouteScope {
    match scope {
        RouteScope::Universe => NlRouteScope::Universe,
        RouteScope::Site => NlRouteScope::Site,
        RouteScope::Link => NlRouteScope::Link,
        RouteScope::Host => NlRouteScope::Host,
        RouteScope::Nowhere => NlRouteScope::NoWhere,
        RouteScope::Other(scope) => NlRouteScope::Other(scope),
    }
}

// Deletes are matched on scope too, so listed routes keep theirs verbatim
fn route_scope(scope: NlRouteScope) -> RouteScope {
    match scope {
        NlRouteScope::Universe => RouteScope::Universe,
        NlRouteScope::Site => RouteScope::Site,
        NlRouteScope::Link => RouteScope::Link,
        NlRouteScope::Host => RouteScope::Host,
        NlRouteScope::NoWhere => RouteScope::Nowhere,
        NlRouteScope::Other(scope) => RouteScope::Other(scope),
        _ => RouteScope::Other(u8::from(scope)),
    }
}

pub(crate) fn route_spec(msg: &RouteMessage) -> Option<RouteSpec> {
    let family = ip_family(msg.header.address_family)?;

    let mut destination = family.default_network();
    let mut gateway = None;
    let mut output_interface = 0;
    let mut table = u32::from(msg.header.table);
    let mut mtu = None;

    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(addr) => {
                destination = IpNetwork::new(route_ip(addr)?, msg.header.destination_prefix_length).ok()?;
            }
            RouteAttribute::Gateway(addr) => gateway = route_ip(addr),
            RouteAttribute::Oif(oif) => output_interface = *oif,
            RouteAttribute::Table(t) => table = *t,
            RouteAttribute::Metrics(metrics) => {
                mtu = metrics.iter().find_map(|m| match m {
                    RouteMetric::Mtu(mtu) => Some(*mtu),
                    _ => None,
                });
            }
            _ => {}
        }
    }

    let scope = route_scope(msg.header.scope);

    Some(RouteSpec {
        destination,
        gateway,
        output_interface,
        table,
        scope,
        mtu,
    })
}

impl PolicyStore for NetlinkPolicyStore {
    async fn list_rules(&self, family: IpFamily, filter: RuleFilter) -> Result<Vec<RuleSpec>, NetworkError> {
        let mut stream = self.handle.rule().get(ip_version(family)).execute();
        let mut rules = Vec::new();

        while let Some(msg) = stream
            .try_next()
            .await
            .map_err(|e| netlink_error(e, &format!("{family} rules")))?
        {
            if let Some(rule) = rule_spec(&msg).filter(|r| filter.matches(r)) {
                rules.push(rule);
            }
        }

        trace!("Listed {} {} rules matching {:?}", rules.len(), family, filter);
        Ok(rules)
    }

    async fn add_rule(&self, rule: &RuleSpec) -> Result<(), NetworkError> {
        let mut req = self.handle.rule().add();
        *req.message_mut() = rule_message(rule);
        req.execute().await.map_err(|e| netlink_error(e, rule))
    }

    async fn delete_rule(&self, rule: &RuleSpec) -> Result<(), NetworkError> {
        self.handle
            .rule()
            .del(rule_message(rule))
            .execute()
            .await
            .map_err(|e| netlink_error(e, rule))
    }

    async fn list_routes(&self, family: IpFamily, table: Option<u32>) -> Result<Vec<RouteSpec>, NetworkError> {
        let mut query = RouteMessageBuilder::<IpAddr>::new().build();
        query.header.address_family = address_family(family);

        let mut stream = self.handle.route().get(query).execute();
        let mut routes = Vec::new();

        // Dumps cover every table; narrow down here
        while let Some(msg) = stream
            .try_next()
            .await
            .map_err(|e| netlink_error(e, &format!("{family} routes")))?
        {
            if let Some(route) = route_spec(&msg).filter(|r| table.is_none_or(|t| r.table == t)) {
                routes.push(route);
            }
        }

        trace!("Listed {} {} routes in table {:?}", routes.len(), family, table);
        Ok(routes)
    }

    async fn add_route(&self, route: &RouteSpec) -> Result<(), NetworkError> {
        self.handle
            .route()
            .add(route_message(route)?)
            .execute()
            .await
            .map_err(|e| netlink_error(e, route))
    }

    async fn delete_route(&self, route: &RouteSpec) -> Result<(), NetworkError> {
        let mut msg = route_message(route)?;
        // Match whichever protocol installed it
        msg.header.protocol = RouteProtocol::Unspec;

        self.handle
            .route()
            .del(msg)
            .execute()
            .await
            .map_err(|e| netlink_error(e, route))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    #[test]
    fn test_rule_message_conversion() {
        let rule = RuleSpec {
            family: IpFamily::V4,
            priority: 111,
            source: Some(net("192.168.2.123/32")),
            destination: Some(net("192.168.0.0/16")),
            table: 11,
        };

        let msg = rule_message(&rule);
        assert_eq!(msg.header.family, AddressFamily::Inet);
        assert_eq!(msg.header.src_len, 32);
        assert_eq!(msg.header.dst_len, 16);
        assert_eq!(msg.header.table, 11);
        assert_eq!(rule_spec(&msg), Some(rule));
    }

    #[test]
    fn test_rule_message_large_table() {
        let rule = RuleSpec {
            family: IpFamily::V4,
            priority: 20,
            source: None,
            destination: Some(net("10.0.0.5/32")),
            table: 300,
        };

        let msg = rule_message(&rule);
        assert_eq!(msg.header.table, 0);
        assert_eq!(rule_spec(&msg).map(|r| r.table), Some(300));
    }

    #[test]
    fn test_rule_spec_skips_unknown_family() {
        let mut msg = RuleMessage::default();
        msg.header.family = AddressFamily::Unspec;
        assert_eq!(rule_spec(&msg), None);
    }

    #[test]
    fn test_route_message_conversion() {
        let route = RouteSpec {
            destination: net("0.0.0.0/0"),
            gateway: Some("192.168.2.1".parse().unwrap()),
            output_interface: 7,
            table: 11,
            scope: RouteScope::Universe,
            mtu: Some(1500),
        };

        let msg = route_message(&route).unwrap();
        assert_eq!(msg.header.address_family, AddressFamily::Inet);
        assert_eq!(route_spec(&msg), Some(route));
    }

    #[test]
    fn test_link_route_message_conversion() {
        let route = RouteSpec {
            destination: net("192.168.2.1/32"),
            gateway: None,
            output_interface: 7,
            table: 11,
            scope: RouteScope::Link,
            mtu: None,
        };

        let msg = route_message(&route).unwrap();
        assert_eq!(msg.header.scope, NlRouteScope::Link);
        assert_eq!(msg.header.destination_prefix_length, 32);
        assert_eq!(route_spec(&msg), Some(route));
    }

    #[test]
    fn test_listed_route_keeps_scope() {
        let route = RouteSpec {
            destination: net("192.168.2.123/32"),
            gateway: None,
            output_interface: 7,
            table: 11,
            scope: RouteScope::Link,
            mtu: None,
        };
        let mut msg = route_message(&route).unwrap();

        msg.header.scope = NlRouteScope::Host;
        let listed = route_spec(&msg).unwrap();
        assert_eq!(listed.scope, RouteScope::Host);
        assert_eq!(route_message(&listed).unwrap().header.scope, NlRouteScope::Host);

        msg.header.scope = NlRouteScope::Site;
        assert_eq!(route_spec(&msg).unwrap().scope, RouteScope::Site);

        msg.header.scope = NlRouteScope::NoWhere;
        assert_eq!(route_spec(&msg).unwrap().scope, RouteScope::Nowhere);
    }

    #[tokio::test]
    #[ignore = "needs CAP_NET_ADMIN to create network namespaces"]
    async fn test_configure_then_delete_in_netns() {
        use crate::network::{MacAddress, NetlinkDeviceResolver};
        use crate::routing::testing::{fake_routing_info, FAKE_MAC};
        use crate::routing::Router;
        use defer::defer;
        use netns_rs::NetNs;
        use rtnetlink::LinkDummy;

        let ns_name = format!("eni-routing-test-{}", std::process::id());
        NetNs::new(&ns_name).unwrap();
        let _cleanup = defer(|| {
            if let Ok(ns) = NetNs::get(&ns_name) {
                let _ = ns.remove();
            }
        });

        let store = NetlinkPolicyStore::connect(Some(&NetworkNamespace::new(ns_name.clone()))).unwrap();

        // Interface names are limited to 15 characters
        let mac: MacAddress = FAKE_MAC.parse().unwrap();
        store
            .handle()
            .link()
            .add(
                LinkDummy::new("linuxrout-test")
                    .address(mac.octets().to_vec())
                    .up()
                    .build(),
            )
            .execute()
            .await
            .unwrap();

        let router = Router::new(store.clone(), NetlinkDeviceResolver::new(store.handle().clone()));
        let info = fake_routing_info();
        let ip: IpAddr = "192.168.2.123".parse().unwrap();

        let rules_before = store.list_rules(IpFamily::V4, RuleFilter::default()).await.unwrap();
        let routes_before = store.list_routes(IpFamily::V4, None).await.unwrap();

        router.configure(&info, ip, 1500, false).await.unwrap();

        let rules_configured = store.list_rules(IpFamily::V4, RuleFilter::default()).await.unwrap();
        let routes_configured = store.list_routes(IpFamily::V4, None).await.unwrap();
        assert!(rules_configured.len() > rules_before.len());
        assert!(routes_configured.len() > routes_before.len());

        router.delete(ip, false).await.unwrap();

        let rules_after = store.list_rules(IpFamily::V4, RuleFilter::default()).await.unwrap();
        let routes_after = store.list_routes(IpFamily::V4, None).await.unwrap();
        assert_eq!(rules_after.len(), rules_before.len());
        assert_eq!(routes_after.len(), routes_before.len());
    }
}
