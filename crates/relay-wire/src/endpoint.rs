//! Endpoint URIs.
//!
//! An endpoint is the `<protocol>://<host>[:<port>]` form used on the
//! command line, in peer-control messages, and in discovery headers.
//! Hosts are numeric only (`[0-9.*]+`).
//!
//! The wildcard forms `*` and `0.0.0.0` are valid for *binding*.  Any
//! endpoint used for an outbound connect must first go through
//! [`Endpoint::for_local_connect`], which rewrites wildcards to loopback;
//! connects never carry a wildcard.

use crate::WireError;
use std::fmt;
use std::net::SocketAddr;

/// A parsed `<protocol>://<host>[:<port>]` triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub protocol: String,
    pub address: String,
    /// Absent when the URI had no port (or the field was `*` on the wire).
    pub port: Option<u16>,
}

impl Endpoint {
    /// Parse an endpoint URI.
    ///
    /// Accepts `tcp://127.0.0.1:5550`, `tcp://*:5551`, `tcp://0.0.0.0`.
    /// Rejects empty protocols, hosts containing anything outside
    /// `[0-9.*]`, and non-numeric ports.
    pub fn parse(uri: &str) -> Result<Self, WireError> {
        let (protocol, rest) = uri
            .split_once("://")
            .ok_or_else(|| WireError::MissingScheme(uri.to_owned()))?;
        if protocol.is_empty() {
            return Err(WireError::EmptyProtocol(uri.to_owned()));
        }

        let (address, port) = match rest.rsplit_once(':') {
            Some((host, port_str)) => {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| WireError::InvalidPort(port_str.to_owned()))?;
                (host, Some(port))
            }
            None => (rest, None),
        };

        if address.is_empty() || !address.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '*')
        {
            return Err(WireError::InvalidHost(address.to_owned()));
        }

        Ok(Endpoint {
            protocol: protocol.to_owned(),
            address: address.to_owned(),
            port,
        })
    }

    /// Build an endpoint from its three wire fields (peer-control grammar).
    ///
    /// A `*` port field maps to `None`.
    pub fn from_fields(protocol: &str, address: &str, port: &str) -> Result<Self, WireError> {
        let port = match port {
            "*" => None,
            p => Some(p.parse().map_err(|_| WireError::InvalidPort(p.to_owned()))?),
        };
        if address.is_empty() || !address.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '*')
        {
            return Err(WireError::InvalidHost(address.to_owned()));
        }
        Ok(Endpoint {
            protocol: protocol.to_owned(),
            address: address.to_owned(),
            port,
        })
    }

    /// True when the address is one of the wildcard bind forms.
    pub fn is_wildcard(&self) -> bool {
        self.address == "*" || self.address == "0.0.0.0"
    }

    /// The endpoint to use when connecting to this address from the same
    /// host: wildcards become loopback, everything else is unchanged.
    pub fn for_local_connect(&self) -> Endpoint {
        if self.is_wildcard() {
            Endpoint {
                protocol: self.protocol.clone(),
                address: "127.0.0.1".to_owned(),
                port: self.port,
            }
        } else {
            self.clone()
        }
    }

    /// Resolve to a socket address for binding; `*` maps to `0.0.0.0`.
    pub fn bind_addr(&self) -> Result<SocketAddr, WireError> {
        self.socket_addr_with(|addr| if addr == "*" { "0.0.0.0" } else { addr })
    }

    /// Resolve to a socket address for connecting.
    ///
    /// Callers are expected to have applied [`Self::for_local_connect`]
    /// already; a remaining wildcard is an error here, not silently bound.
    pub fn connect_addr(&self) -> Result<SocketAddr, WireError> {
        if self.is_wildcard() {
            return Err(WireError::InvalidHost(self.address.clone()));
        }
        self.socket_addr_with(|addr| addr)
    }

    fn socket_addr_with(&self, map: impl Fn(&str) -> &str) -> Result<SocketAddr, WireError> {
        let port = self.port.ok_or_else(|| WireError::MissingPort(self.to_string()))?;
        let host = map(&self.address);
        format!("{host}:{port}")
            .parse()
            .map_err(|_| WireError::InvalidHost(self.address.clone()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.protocol, self.address, port),
            None => write!(f, "{}://{}", self.protocol, self.address),
        }
    }
}
