//! Network namespace operations

use netns_rs::NetNs;
use rtnetlink::{new_connection, Handle};
use tracing::debug;

use crate::error::NetworkError;

/// Named network namespace (as created by `ip netns add`)
#[derive(Debug, Clone)]
pub struct NetworkNamespace {
    pub name: String,
}

impl NetworkNamespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Execute a function within the namespace, switching back afterwards
    pub fn execute_in_namespace<F, R>(&self, func: F) -> Result<R, NetworkError>
    where
        F: FnOnce() -> Result<R, NetworkError>,
    {
        let ns = NetNs::get(&self.name)
            .map_err(|e| NetworkError::NamespaceAccess(e.to_string()))?;

        ns.run(|_| func())
            .map_err(|e| NetworkError::NamespaceAccess(e.to_string()))?
    }
}

/// Open an rtnetlink connection, optionally bound inside `namespace`.
///
/// The netlink socket keeps the namespace it was created in, so only the
/// socket creation needs to happen inside it. Must be called from within a
/// tokio runtime.
pub fn connect(namespace: Option<&NetworkNamespace>) -> Result<Handle, NetworkError> {
    let open = || new_connection().map_err(|e| NetworkError::Netlink(e.to_string()));

    let (connection, handle, _) = match namespace {
        Some(ns) => {
            debug!("Opening netlink connection in namespace {}", ns.name);
            ns.execute_in_namespace(open)?
        }
        None => open()?,
    };

    tokio::spawn(connection);

    Ok(handle)
}
