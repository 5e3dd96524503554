//! Global configuration model for the bunker runtime.

use std::path::PathBuf;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{BunkerError, Result};
use crate::types::ResourceLimits;

/// Root configuration for the bunker runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BunkerConfig {
    /// Directory holding one subvolume per image or container.
    pub store_dir: PathBuf,
    /// Mount point of the cgroup v1 controllers.
    pub cgroup_root: PathBuf,
    /// Parent group under every controller that container groups live in.
    pub cgroup_parent: String,
    /// Host bridge container veths are attached to.
    pub bridge: String,
    /// Private block container addresses come from; the first host is the gateway.
    pub subnet: Ipv4Network,
    /// Nameserver appended to `/etc/resolv.conf` inside new containers.
    pub dns: String,
    /// Limits applied to every new container's control group.
    pub limits: ResourceLimits,
}

impl Default for BunkerConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(constants::DEFAULT_STORE_DIR),
            cgroup_root: PathBuf::from(constants::CGROUP_V1_PATH),
            cgroup_parent: constants::APP_NAME.to_string(),
            bridge: constants::DEFAULT_BRIDGE.to_string(),
            subnet: Ipv4Network::new(std::net::Ipv4Addr::new(10, 0, 0, 0), 24)
                .unwrap_or_else(|_| unreachable!("/24 is a valid prefix")),
            dns: constants::DEFAULT_DNS.to_string(),
            limits: ResourceLimits::default(),
        }
    }
}

impl BunkerConfig {
    /// Parses a subnet in CIDR notation and checks it leaves room for a
    /// gateway plus at least one container address.
    ///
    /// # Errors
    ///
    /// Returns `BunkerError::Config` if the value is not IPv4 CIDR or the
    /// block is smaller than a /30.
    pub fn parse_subnet(raw: &str) -> Result<Ipv4Network> {
        let subnet: Ipv4Network = raw.parse().map_err(|e| BunkerError::Config {
            message: format!("invalid subnet {raw:?}: {e}"),
        })?;
        if subnet.prefix() > 30 {
            return Err(BunkerError::Config {
                message: format!("subnet {subnet} is too small to hold a gateway and a container"),
            });
        }
        Ok(subnet)
    }
}
