//! Per-container network namespace provisioning.
//!
//! Each `run` gets a fresh network namespace linked to the host through a
//! veth pair: the host end is enslaved to a pre-existing bridge, the peer end
//! is moved into the container namespace and given a random MAC, an address
//! drawn from the configured subnet, and a default route via the subnet's
//! first host address (the bridge's own address).

pub mod netlink;

use std::net::Ipv4Addr;

use bunker_common::error::{BunkerError, Result};
use ipnetwork::Ipv4Network;
use rand::Rng;

use crate::namespace::{self, NamespaceFile};
use netlink::NetlinkHandle;

/// A locally administered, unicast MAC address.
#[must_use]
pub fn random_mac() -> [u8; 6] {
    let mut mac: [u8; 6] = rand::rng().random();
    mac[0] &= !0x01;
    mac[0] |= 0x02;
    mac
}

/// The default gateway for `subnet`: its first host address.
#[must_use]
pub fn gateway(subnet: Ipv4Network) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(subnet.network()).wrapping_add(1))
}

/// Picks a container address in `subnet`, uniformly among hosts that are
/// neither the network address, the gateway, nor the broadcast address.
///
/// # Errors
///
/// Returns `BunkerError::Network` if the subnet has no such host.
pub fn pick_address(subnet: Ipv4Network) -> Result<Ipv4Network> {
    let hosts = 1u64 << (32 - u32::from(subnet.prefix()));
    if hosts < 4 {
        return Err(BunkerError::network(format!(
            "subnet {subnet} has no room for a container address"
        )));
    }
    let offset = rand::rng().random_range(2..=hosts - 2);
    let base = u64::from(u32::from(subnet.network()));
    let ip = u32::try_from(base + offset)
        .map_err(|_| BunkerError::network(format!("address overflow in {subnet}")))?;
    Ipv4Network::new(Ipv4Addr::from(ip), subnet.prefix())
        .map_err(|e| BunkerError::network(format!("invalid container address: {e}")))
}

fn random_suffix() -> String {
    format!("{:06x}", rand::rng().random_range(0..0x0100_0000u32))
}

/// A container's network namespace plus the veth pair wiring it to the bridge.
///
/// Released on drop; call [`NetworkContext::release`] to observe errors.
#[derive(Debug)]
pub struct NetworkContext {
    original: NamespaceFile,
    container: NamespaceFile,
    host_link: String,
    address: Option<Ipv4Network>,
    released: bool,
}

impl NetworkContext {
    /// Creates a network namespace wired to `bridge` with an address in `subnet`.
    ///
    /// The caller ends up in its original network namespace. On failure any
    /// link already created is removed before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be created or any link,
    /// address, or route cannot be configured.
    pub fn provision(bridge: &str, subnet: Ipv4Network) -> Result<Self> {
        let (original, container) = namespace::network::create_detached()?;
        let suffix = random_suffix();
        let mut context = Self {
            original,
            container,
            host_link: format!("veth{suffix}"),
            address: None,
            released: false,
        };
        let peer_link = format!("vpeer{suffix}");

        context.wire_host_side(bridge, &peer_link)?;
        context.address = Some(context.configure_inside(&peer_link, subnet)?);
        tracing::info!(
            host_link = %context.host_link,
            address = ?context.address,
            bridge,
            "container network provisioned"
        );
        Ok(context)
    }

    fn wire_host_side(&self, bridge: &str, peer_link: &str) -> Result<()> {
        let mut host = NetlinkHandle::new()?;
        let bridge_index = netlink::index_of(bridge)
            .map_err(|_| BunkerError::network(format!("bridge {bridge} does not exist")))?;
        host.create_veth(&self.host_link, peer_link)?;
        let host_index = netlink::index_of(&self.host_link)?;
        host.set_up(host_index)?;
        host.set_master(host_index, bridge_index)?;
        let peer_index = netlink::index_of(peer_link)?;
        host.move_to_namespace(peer_index, &self.container)?;
        Ok(())
    }

    fn configure_inside(&self, peer_link: &str, subnet: Ipv4Network) -> Result<Ipv4Network> {
        self.container.enter()?;
        let configured = Self::configure_links(peer_link, subnet);
        let restored = self.original.enter();
        let address = configured?;
        restored?;
        Ok(address)
    }

    fn configure_links(peer_link: &str, subnet: Ipv4Network) -> Result<Ipv4Network> {
        let mut inside = NetlinkHandle::new()?;
        inside.set_up(netlink::index_of("lo")?)?;
        let peer_index = netlink::index_of(peer_link)?;
        inside.set_mac(peer_index, random_mac())?;
        let address = pick_address(subnet)?;
        inside.add_address(peer_index, address)?;
        inside.set_up(peer_index)?;
        inside.add_default_route(gateway(subnet), peer_index)?;
        Ok(address)
    }

    /// The container's network namespace.
    ///
    /// The handle stays open until the context is dropped, so a child can
    /// join it by descriptor between `fork` and `exec`.
    #[must_use]
    pub const fn namespace(&self) -> &NamespaceFile {
        &self.container
    }

    /// Restores the caller's original namespace and removes the veth pair.
    ///
    /// Safe to call more than once and when the link is already gone; only
    /// the first call does anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the original namespace cannot be re-entered or
    /// the link cannot be deleted.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.original.enter()?;
        // Deleting either end of a veth pair removes both.
        if let Some(index) = netlink::try_index_of(&self.host_link) {
            NetlinkHandle::new()?.delete_link(index)?;
            tracing::info!(host_link = %self.host_link, "container network released");
        } else {
            tracing::debug!(host_link = %self.host_link, "veth pair already gone");
        }
        Ok(())
    }
}

impl Drop for NetworkContext {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, host_link = %self.host_link, "network teardown failed");
        }
    }
}
