//! IPv4 endpoint value used by both client and server.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::error::{Result, TrpcError};

/// An IPv4 address and port.
///
/// `Endpoint` has the same layout as [`SocketAddrV4`] and converts into the
/// [`SocketAddr`] taken by connect, bind and accept without copying fields
/// around.
///
/// # Example
///
/// ```
/// use trpc_common::Endpoint;
///
/// let endpoint = Endpoint::parse("127.0.0.1", 2333).unwrap();
/// assert_eq!(endpoint.port(), 2333);
/// assert_eq!(endpoint.to_string(), "127.0.0.1:2333");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Endpoint(SocketAddrV4);

impl Endpoint {
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Endpoint(SocketAddrV4::new(ip, port))
    }

    /// Builds an endpoint from a host-order IPv4 address.
    pub fn from_u32(ip: u32, port: u16) -> Self {
        Endpoint(SocketAddrV4::new(Ipv4Addr::from(ip), port))
    }

    /// Builds an endpoint from a dotted-quad address string.
    pub fn parse(ip: &str, port: u16) -> Result<Self> {
        let ip = ip
            .parse::<Ipv4Addr>()
            .map_err(|e| TrpcError::InvalidEndpoint(format!("'{}': {}", ip, e)))?;
        Ok(Endpoint::new(ip, port))
    }

    /// Loopback endpoint, handy for tests and local services.
    pub const fn localhost(port: u16) -> Self {
        Endpoint::new(Ipv4Addr::LOCALHOST, port)
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn as_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.0)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Endpoint {
    type Err = TrpcError;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<SocketAddrV4>()
            .map(Endpoint)
            .map_err(|e| TrpcError::InvalidEndpoint(format!("'{}': {}", s, e)))
    }
}

impl From<SocketAddrV4> for Endpoint {
    fn from(addr: SocketAddrV4) -> Self {
        Endpoint(addr)
    }
}

impl TryFrom<SocketAddr> for Endpoint {
    type Error = TrpcError;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        match addr {
            SocketAddr::V4(v4) => Ok(Endpoint(v4)),
            SocketAddr::V6(v6) => Err(TrpcError::InvalidEndpoint(format!(
                "{} is not an IPv4 address",
                v6
            ))),
        }
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.as_socket_addr()
    }
}
