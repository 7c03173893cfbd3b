//! In-memory policy store and device resolver for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::NetworkError;
use crate::network::{DeviceResolver, MacAddress};
use crate::routing::info::{IpamMode, RoutingInfo};
use crate::routing::{IpFamily, PolicyStore, RouteSpec, RuleFilter, RuleSpec};

pub(crate) const FAKE_MAC: &str = "00:11:22:33:44:55";
pub(crate) const FAKE_IFINDEX: u32 = 7;

/// Routing info of the canonical test endpoint
pub(crate) fn fake_routing_info() -> RoutingInfo {
    RoutingInfo::parse("192.168.2.1", &["192.168.0.0/16"], FAKE_MAC, "1", IpamMode::Eni, true)
        .expect("fake routing info parses")
}

/// Kernel tables kept in memory.
///
/// Adds behave like netlink requests with `NLM_F_EXCL`: an identical rule,
/// or a route to the same destination in the same table, is refused.
#[derive(Default)]
pub(crate) struct MemoryPolicyStore {
    rules: Mutex<Vec<RuleSpec>>,
    routes: Mutex<Vec<RouteSpec>>,
    mutations: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
}

impl MemoryPolicyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with unrelated host state
    pub(crate) fn with_host_defaults() -> Self {
        let store = Self::new();
        store.rules.lock().unwrap().extend([
            RuleSpec { family: IpFamily::V4, priority: 0, source: None, destination: None, table: 255 },
            RuleSpec { family: IpFamily::V4, priority: 32766, source: None, destination: None, table: 254 },
            RuleSpec { family: IpFamily::V4, priority: 32767, source: None, destination: None, table: 253 },
        ]);
        store.routes.lock().unwrap().push(RouteSpec {
            destination: IpFamily::V4.default_network(),
            gateway: Some("10.0.0.1".parse().unwrap()),
            output_interface: 2,
            table: 254,
            scope: crate::routing::RouteScope::Universe,
            mtu: None,
        });
        store
    }

    /// Let `count` further mutations succeed, then fail every one after
    pub(crate) fn fail_after(&self, count: usize) {
        *self.fail_after.lock().unwrap() = Some(self.mutation_count().saturating_add(count));
    }

    pub(crate) fn insert_rule(&self, rule: RuleSpec) {
        self.rules.lock().unwrap().push(rule);
    }

    pub(crate) fn rules(&self) -> Vec<RuleSpec> {
        self.rules.lock().unwrap().clone()
    }

    pub(crate) fn routes(&self) -> Vec<RouteSpec> {
        self.routes.lock().unwrap().clone()
    }

    /// Number of successful add/delete calls so far
    pub(crate) fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn begin_mutation(&self, what: &dyn std::fmt::Display) -> Result<(), NetworkError> {
        if let Some(limit) = *self.fail_after.lock().unwrap() {
            if self.mutation_count() >= limit {
                return Err(NetworkError::OperationFailed(format!("injected failure on {what}")));
            }
        }
        Ok(())
    }

    fn commit_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

impl PolicyStore for MemoryPolicyStore {
    async fn list_rules(&self, family: IpFamily, filter: RuleFilter) -> Result<Vec<RuleSpec>, NetworkError> {
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.family == family && filter.matches(r))
            .cloned()
            .collect())
    }

    async fn add_rule(&self, rule: &RuleSpec) -> Result<(), NetworkError> {
        self.begin_mutation(rule)?;
        let mut rules = self.rules.lock().unwrap();
        if rules.contains(rule) {
            return Err(NetworkError::AlreadyExists(rule.to_string()));
        }
        rules.push(rule.clone());
        self.commit_mutation();
        Ok(())
    }

    async fn delete_rule(&self, rule: &RuleSpec) -> Result<(), NetworkError> {
        self.begin_mutation(rule)?;
        let mut rules = self.rules.lock().unwrap();
        let pos = rules
            .iter()
            .position(|r| r == rule)
            .ok_or_else(|| NetworkError::NotFound(rule.to_string()))?;
        rules.remove(pos);
        self.commit_mutation();
        Ok(())
    }

    async fn list_routes(&self, family: IpFamily, table: Option<u32>) -> Result<Vec<RouteSpec>, NetworkError> {
        Ok(self
            .routes
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.family() == family && table.is_none_or(|t| r.table == t))
            .cloned()
            .collect())
    }

    async fn add_route(&self, route: &RouteSpec) -> Result<(), NetworkError> {
        self.begin_mutation(route)?;
        let mut routes = self.routes.lock().unwrap();
        if routes
            .iter()
            .any(|r| r.table == route.table && r.destination == route.destination)
        {
            return Err(NetworkError::AlreadyExists(route.to_string()));
        }
        routes.push(route.clone());
        self.commit_mutation();
        Ok(())
    }

    async fn delete_route(&self, route: &RouteSpec) -> Result<(), NetworkError> {
        self.begin_mutation(route)?;
        let mut routes = self.routes.lock().unwrap();
        let pos = routes
            .iter()
            .position(|r| r == route)
            .ok_or_else(|| NetworkError::NotFound(route.to_string()))?;
        routes.remove(pos);
        self.commit_mutation();
        Ok(())
    }
}

/// Resolver over a fixed MAC table, counting lookups
#[derive(Default)]
pub(crate) struct StaticResolver {
    links: Mutex<HashMap<MacAddress, u32>>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub(crate) fn with_fake_device() -> Self {
        let resolver = Self::default();
        resolver.attach(FAKE_MAC.parse().unwrap(), FAKE_IFINDEX);
        resolver
    }

    pub(crate) fn attach(&self, mac: MacAddress, ifindex: u32) {
        self.links.lock().unwrap().insert(mac, ifindex);
    }

    pub(crate) fn detach(&self, mac: &MacAddress) {
        self.links.lock().unwrap().remove(mac);
    }

    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DeviceResolver for StaticResolver {
    async fn resolve(&self, mac: &MacAddress) -> Result<u32, NetworkError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.links
            .lock()
            .unwrap()
            .get(mac)
            .copied()
            .ok_or(NetworkError::DeviceNotFound { mac: *mac })
    }
}
