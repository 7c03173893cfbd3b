//! Routing lifecycle: install and remove the rules and routes of one endpoint

use std::net::IpAddr;

use tracing::{debug, error, info, warn};

use crate::error::{KernelOp, NetworkError, RouteError};
use crate::network::DeviceResolver;
use crate::routing::info::RoutingInfo;
use crate::routing::rules::{egress_priority, interface_number_of, RoutingRuleCalculator};
use crate::routing::{
    IpFamily, PolicyStore, RouteSpec, RuleFilter, RuleMatcher, RuleSpec, RULE_PRIORITY_INGRESS,
};

/// Drives configure/delete of endpoint routing against a policy store.
///
/// Holds no state of its own: everything delete needs is recovered from the
/// kernel, so it can undo a configure done by an earlier process. Calls for
/// the same endpoint IP must be serialized by the caller.
pub struct Router<S, R> {
    store: S,
    resolver: R,
}

fn kernel_error(op: KernelOp, target: impl ToString) -> impl FnOnce(NetworkError) -> RouteError {
    let target = target.to_string();
    move |source| RouteError::KernelOperationFailed { op, target, source }
}

impl<S, R> Router<S, R>
where
    S: PolicyStore + Sync,
    R: DeviceResolver + Sync,
{
    pub fn new(store: S, resolver: R) -> Self {
        Self { store, resolver }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Install the rules and routes steering `ip` out of the interface
    /// described by `info`.
    ///
    /// Rules are applied before routes, each in plan order. The first failing
    /// kernel call is returned and nothing already applied is rolled back;
    /// `delete` cleans up a partially configured endpoint.
    pub async fn configure(
        &self,
        info: &RoutingInfo,
        ip: IpAddr,
        mtu: u32,
        compat: bool,
    ) -> Result<(), RouteError> {
        crate::routing::rules::check_compatible(info, ip)?;

        let mac = info.master_interface_mac;
        let ifindex = self.resolver.resolve(&mac).await.map_err(|e| match e {
            NetworkError::DeviceNotFound { mac } => RouteError::DeviceNotFound { mac },
            other => RouteError::KernelOperationFailed {
                op: KernelOp::ListLinks,
                target: format!("interface with MAC {mac}"),
                source: other,
            },
        })?;

        let plan = RoutingRuleCalculator::new(info, compat).calculate(ip, ifindex, mtu)?;
        debug!(
            "Configuring {} via ifindex {}: {} rules, {} routes",
            ip,
            ifindex,
            plan.rules.len(),
            plan.routes.len()
        );

        for rule in &plan.rules {
            self.store
                .add_rule(rule)
                .await
                .map_err(kernel_error(KernelOp::AddRule, rule))?;
            debug!("Added {}", rule);
        }

        for route in &plan.routes {
            self.store
                .add_route(route)
                .await
                .map_err(kernel_error(KernelOp::AddRoute, route))?;
            debug!("Added {}", route);
        }

        info!("Configured routing for {} on interface {}", ip, mac);
        Ok(())
    }

    /// Remove the rules and routes installed for `ip`.
    ///
    /// The ingress rule identifies the endpoint's table. Exactly one must
    /// match; none or several abort before any mutation, since removing the
    /// wrong rule would cut off another endpoint. Only egress rules at the
    /// priority `compat` selects for the table's interface are ours to remove;
    /// anything else sharing the source and table is left alone. Egress rules
    /// and routes go first and the ingress rule last, so a failed delete can
    /// be retried.
    pub async fn delete(&self, ip: IpAddr, compat: bool) -> Result<(), RouteError> {
        if !ip.is_ipv4() {
            return Err(RouteError::IncompatibleIp { ip });
        }
        let family = IpFamily::of(&ip);

        let ingress = self.find_ingress_rule(family, ip).await?;
        let table = ingress.table;
        debug!("Deleting routing for {} from table {} (compat={})", ip, table, compat);

        let egress: Vec<RuleSpec> = match interface_number_of(table) {
            Some(interface_number) => {
                let priority = egress_priority(interface_number, compat);
                let egress_matcher = RuleMatcher::egress(ip, table).with_priority(priority);
                self.store
                    .list_rules(family, RuleFilter { priority: Some(priority), table: Some(table) })
                    .await
                    .map_err(kernel_error(KernelOp::ListRules, format!("rules of table {table}")))?
                    .into_iter()
                    .filter(|rule| egress_matcher.matches(rule))
                    .collect()
            }
            None => {
                warn!("Table {} of {} belongs to no interface", table, ip);
                Vec::new()
            }
        };
        if egress.is_empty() {
            warn!("No egress rule found for {} in table {}", ip, table);
        }

        for rule in &egress {
            self.delete_rule(rule).await?;
        }

        let routes: Vec<RouteSpec> = self
            .store
            .list_routes(family, Some(table))
            .await
            .map_err(kernel_error(KernelOp::ListRoutes, format!("routes of table {table}")))?;
        for route in &routes {
            self.store
                .delete_route(route)
                .await
                .map_err(kernel_error(KernelOp::DeleteRoute, route))?;
            debug!("Deleted {}", route);
        }

        self.delete_rule(&ingress).await?;

        info!(
            "Deleted routing for {}: {} rules, {} routes",
            ip,
            egress.len() + 1,
            routes.len()
        );
        Ok(())
    }

    async fn find_ingress_rule(&self, family: IpFamily, ip: IpAddr) -> Result<RuleSpec, RouteError> {
        let matcher = RuleMatcher::ingress(ip, RULE_PRIORITY_INGRESS);
        let mut candidates: Vec<RuleSpec> = self
            .store
            .list_rules(
                family,
                RuleFilter { priority: Some(RULE_PRIORITY_INGRESS), table: None },
            )
            .await
            .map_err(kernel_error(KernelOp::ListRules, format!("rules at priority {RULE_PRIORITY_INGRESS}")))?
            .into_iter()
            .filter(|rule| matcher.matches(rule))
            .collect();

        match candidates.len() {
            0 => {
                warn!("No ingress rule matching {}", ip);
                Err(RouteError::NoMatchingRules { ip })
            }
            1 => Ok(candidates.remove(0)),
            count => {
                error!("Found {} ingress rules matching {}, skipping deletion", count, ip);
                Err(RouteError::AmbiguousRules { ip, count })
            }
        }
    }

    async fn delete_rule(&self, rule: &RuleSpec) -> Result<(), RouteError> {
        self.store
            .delete_rule(rule)
            .await
            .map_err(kernel_error(KernelOp::DeleteRule, rule))?;
        debug!("Deleted {}", rule);
        Ok(())
    }
}
