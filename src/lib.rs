//! ENI Routing - per-endpoint policy routing for secondary interface addresses
//!
//! Endpoints whose address is drawn from a secondary network interface need
//! their traffic steered out of that interface instead of the host's default
//! route. This library derives the routing-policy rules and routes for one
//! endpoint IP, installs them through rtnetlink and removes them again with
//! checks that refuse to touch rules it cannot prove it owns.

pub mod config;
pub mod error;
pub mod network;
pub mod routing;

pub use error::{AppError, RouteError};
pub use routing::{Router, RoutingInfo};
