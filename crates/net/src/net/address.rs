use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use super::protocol::{DEFAULT_PORT, ProtocolVersion};
use crate::error::{NetError, NetResult};

const URL_SCHEME: &str = "aos://";

/// Server endpoint plus the protocol dialect to speak with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    host: String,
    port: u16,
    protocol: ProtocolVersion,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProtocolVersion) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }

    /// Accepts `aos://<packed ip>:<port>[:0.75|:0.76]` and `<host>:<port>[:0.75|:0.76]`.
    /// The packed form stores the first octet in the lowest byte.
    pub fn parse(text: &str) -> NetResult<Self> {
        let invalid = || NetError::InvalidAddress(text.to_string());
        let text = text.trim();

        let (packed, rest) = match text.strip_prefix(URL_SCHEME) {
            Some(rest) => (true, rest),
            None => (false, text),
        };

        let mut parts = rest.split(':');
        let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let port = match parts.next() {
            Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        let protocol = match parts.next() {
            None | Some("0.75") => ProtocolVersion::V075,
            Some("0.76") => ProtocolVersion::V076,
            Some(_) => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }

        let host = if packed {
            let ip: u32 = host.parse().map_err(|_| invalid())?;
            Ipv4Addr::from(ip.to_le_bytes()).to_string()
        } else {
            host.to_string()
        };

        Ok(Self {
            host,
            port,
            protocol,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn resolve(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} has no IPv4 address", self.host),
                )
            })
    }
}

impl FromStr for ServerAddress {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.port, self.protocol)
    }
}
