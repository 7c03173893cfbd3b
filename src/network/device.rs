//! MAC address to interface index resolution over rtnetlink

use futures_util::TryStreamExt;
use rtnetlink::packet_route::link::{LinkAttribute, LinkFlags, LinkMessage};
use rtnetlink::Handle;
use tracing::debug;

use crate::error::NetworkError;
use crate::network::{DeviceResolver, MacAddress};

/// Resolves hardware addresses by dumping the kernel link table
#[derive(Clone)]
pub struct NetlinkDeviceResolver {
    handle: Handle,
}

impl NetlinkDeviceResolver {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

/// Whether `link` is a candidate master device carrying `mac`.
///
/// Enslaved devices (bond/team members) report their master's address and
/// must not be picked over the master itself.
fn carries_mac(link: &LinkMessage, mac: &MacAddress) -> bool {
    if link.header.flags.contains(LinkFlags::Port) {
        return false;
    }

    link.attributes.iter().any(|attr| match attr {
        LinkAttribute::Address(addr) => addr.as_slice() == mac.octets(),
        _ => false,
    })
}

impl DeviceResolver for NetlinkDeviceResolver {
    async fn resolve(&self, mac: &MacAddress) -> Result<u32, NetworkError> {
        let mut links = self.handle.link().get().execute();

        while let Some(link) = links
            .try_next()
            .await
            .map_err(|e| NetworkError::Netlink(e.to_string()))?
        {
            if carries_mac(&link, mac) {
                debug!("Resolved MAC {} to ifindex {}", mac, link.header.index);
                return Ok(link.header.index);
            }
        }

        Err(NetworkError::DeviceNotFound { mac: *mac })
    }
}
