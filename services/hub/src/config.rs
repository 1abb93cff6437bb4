//! Hub configuration.
//!
//! The command line is the sole config source.  `main` builds a
//! `HubConfig` from clap matches and validates it before any socket is
//! opened; a validation failure is reported to stderr and exits
//! non-zero.

use relay_wire::Endpoint;
use std::net::Ipv4Addr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Request/reply bind endpoint for injectors and chain clients.
    pub receiver_listen: Endpoint,
    /// Fan-out bind endpoint for subscribers.
    pub publisher_listen: Endpoint,
    /// Static peer publisher endpoints; empty when discovery drives the
    /// chain.
    pub chain_links: Vec<Endpoint>,
    /// Present when `--discovery` was given.
    pub discovery: Option<DiscoveryConfig>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Beacon announce interval.
    pub interval: Duration,
    /// IPv4 address of the interface to join the multicast group on;
    /// `None` lets the kernel choose.
    pub interface: Option<Ipv4Addr>,
    pub port: u16,
    /// Shared group key; hashed before it is advertised or compared.
    pub key: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            interval: Duration::from_millis(1000),
            interface: None,
            port: 5670,
            key: "TDRS".to_owned(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--{0} endpoint must carry a port")]
    MissingPort(&'static str),
    #[error("--chain-link and --discovery are mutually exclusive")]
    ChainAndDiscovery,
}

impl HubConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receiver_listen.port.is_none() {
            return Err(ConfigError::MissingPort("receiver-listen"));
        }
        if self.publisher_listen.port.is_none() {
            return Err(ConfigError::MissingPort("publisher-listen"));
        }
        if self.chain_links.iter().any(|link| link.port.is_none()) {
            return Err(ConfigError::MissingPort("chain-link"));
        }
        if self.discovery.is_some() && !self.chain_links.is_empty() {
            return Err(ConfigError::ChainAndDiscovery);
        }
        Ok(())
    }
}
