//! Centralized error types and handling

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

use crate::network::MacAddress;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Route management error: {0}")]
    Route(#[from] RouteError),

    #[error("Network operation error: {0}")]
    Network(#[from] NetworkError),

    #[error("Invalid routing info: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kernel operations performed against the policy store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelOp {
    ListLinks,
    ListRules,
    AddRule,
    DeleteRule,
    ListRoutes,
    AddRoute,
    DeleteRoute,
}

impl fmt::Display for KernelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            KernelOp::ListLinks => "list links",
            KernelOp::ListRules => "list rules",
            KernelOp::AddRule => "add rule",
            KernelOp::DeleteRule => "delete rule",
            KernelOp::ListRoutes => "list routes",
            KernelOp::AddRoute => "add route",
            KernelOp::DeleteRoute => "delete route",
        };
        f.write_str(op)
    }
}

/// Routing lifecycle errors
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("IP not compatible: {ip}")]
    IncompatibleIp { ip: IpAddr },

    #[error("interface with MAC {mac} not found")]
    DeviceNotFound { mac: MacAddress },

    #[error("no rule found to delete for {ip}")]
    NoMatchingRules { ip: IpAddr },

    #[error("IP {ip} matches more than expected number of rules ({count})")]
    AmbiguousRules { ip: IpAddr, count: usize },

    #[error("failed to {op} {target}: {source}")]
    KernelOperationFailed {
        op: KernelOp,
        target: String,
        #[source]
        source: NetworkError,
    },
}

/// Low-level network operation errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to access network namespace: {0}")]
    NamespaceAccess(String),

    #[error("No interface carries MAC {mac}")]
    DeviceNotFound { mac: MacAddress },

    #[error("Netlink error: {0}")]
    Netlink(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Network operation failed: {0}")]
    OperationFailed(String),
}

/// Routing info parsing errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid ip: {0}")]
    InvalidGateway(String),

    #[error("empty cidrs")]
    EmptyCidrs,

    #[error("invalid cidr: {0}")]
    InvalidCidr(String),

    #[error("invalid mac: {0}")]
    InvalidMac(String),

    #[error("invalid interface number: {0}")]
    InvalidInterfaceNumber(String),

    #[error("unsupported IPAM mode: {0}")]
    UnsupportedIpamMode(String),

    #[error("address family not supported in ENI routing: {0}")]
    UnsupportedFamily(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(String),

    #[error("Missing required configuration: {field}")]
    MissingRequired { field: String },

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
