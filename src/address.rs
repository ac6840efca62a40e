/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use dns_lookup::{AddrInfoHints, SockType};
use log::debug;

use crate::config::SocketKind;
use crate::ServerError;

/// Well-known port used when no address is configured.
pub const DEFAULT_PORT: u16 = 1080;

/// The address family of a server socket
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Family {
    Ipv4,
    Ipv6,
}

/// An endpoint to bind a server to
///
/// The number of components selects the address family: a
/// `(host, port)` pair is always IPv4, a `(host, port, flowinfo, scope_id)`
/// quadruple is always IPv6. The host may be an IP literal, a name to be
/// resolved, or empty for the unspecified ("any") address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Address {
    V4 {
        host: String,
        port: u16,
    },
    V6 {
        host: String,
        port: u16,
        flowinfo: u32,
        scope_id: u32,
    },
}

impl Address {
    /// Builds an address from its textual components, e.g. as read from a
    /// configuration file.
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Result<Self, ServerError> {
        match parts {
            [host, port] => Ok(Self::V4 {
                host: host.as_ref().to_owned(),
                port: parse_number(port.as_ref())?,
            }),
            [host, port, flowinfo, scope_id] => Ok(Self::V6 {
                host: host.as_ref().to_owned(),
                port: parse_number(port.as_ref())?,
                flowinfo: parse_number(flowinfo.as_ref())?,
                scope_id: parse_number(scope_id.as_ref())?,
            }),
            other => Err(ServerError::UnknownAddressFamily(other.len())),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            Self::V4 { .. } => Family::Ipv4,
            Self::V6 { .. } => Family::Ipv6,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Self::V4 { host, .. } | Self::V6 { host, .. } => host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::V4 { port, .. } | Self::V6 { port, .. } => *port,
        }
    }

    /// Resolves the host and returns the socket address to bind to. The
    /// address family never changes during resolution.
    pub fn resolve(&self) -> Result<SocketAddr, ServerError> {
        let ip = resolve_host(self.host(), self.family())?;
        Ok(match (self, ip) {
            (Self::V4 { port, .. }, IpAddr::V4(ip)) => SocketAddr::V4(SocketAddrV4::new(ip, *port)),
            (Self::V6 { port, flowinfo, scope_id, .. }, IpAddr::V6(ip)) => SocketAddr::V6(SocketAddrV6::new(ip, *port, *flowinfo, *scope_id)),
            _ => return Err(ServerError::InvalidAddress(self.host().to_owned())),
        })
    }
}

impl From<(&str, u16)> for Address {
    fn from((host, port): (&str, u16)) -> Self {
        Self::V4 { host: host.to_owned(), port }
    }
}

impl From<(&str, u16, u32, u32)> for Address {
    fn from((host, port, flowinfo, scope_id): (&str, u16, u32, u32)) -> Self {
        Self::V6 { host: host.to_owned(), port, flowinfo, scope_id }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(addr) => Self::V4 {
                host: addr.ip().to_string(),
                port: addr.port(),
            },
            SocketAddr::V6(addr) => Self::V6 {
                host: addr.ip().to_string(),
                port: addr.port(),
                flowinfo: addr.flowinfo(),
                scope_id: addr.scope_id(),
            },
        }
    }
}

/// Determines the address to bind to when none was configured.
///
/// The system resolver is asked for the default endpoint of
/// [`DEFAULT_PORT`]; the first answer wins. If resolution fails, the
/// unspecified IPv4 address on the same port is used.
pub fn default_address(kind: SocketKind) -> SocketAddr {
    let hints = AddrInfoHints {
        socktype: match kind {
            SocketKind::Stream => SockType::Stream.into(),
            SocketKind::Datagram => SockType::DGram.into(),
        },
        ..AddrInfoHints::default()
    };
    let service = DEFAULT_PORT.to_string();
    let resolved = dns_lookup::getaddrinfo(None, Some(service.as_str()), Some(hints))
        .ok()
        .and_then(|mut results| results.find_map(Result::ok))
        .map(|info| info.sockaddr);

    match resolved {
        Some(addr) => addr,
        None => {
            debug!("Default address resolution failed, falling back to the unspecified address");
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
        },
    }
}

fn resolve_host(host: &str, family: Family) -> Result<IpAddr, ServerError> {
    if host.is_empty() {
        return Ok(match family {
            Family::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    dns_lookup::lookup_host(host)
        .ok()
        .and_then(|ips| ips.into_iter().find(|ip| family_of(ip) == family))
        .ok_or_else(|| ServerError::InvalidAddress(host.to_owned()))
}

fn family_of(ip: &IpAddr) -> Family {
    match ip {
        IpAddr::V4(_) => Family::Ipv4,
        IpAddr::V6(_) => Family::Ipv6,
    }
}

fn parse_number<T: std::str::FromStr>(text: &str) -> Result<T, ServerError> {
    text.trim().parse().map_err(|_| ServerError::InvalidConfig("address components must be numeric"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_components_select_ipv4() {
        for parts in [["127.0.0.1", "0"], ["", "8080"], ["localhost", "1080"]] {
            let address = Address::from_parts(&parts).unwrap();
            assert_eq!(address.family(), Family::Ipv4);
            assert!(address.resolve().unwrap().is_ipv4());
        }
    }

    #[test]
    fn four_components_select_ipv6() {
        let address = Address::from_parts(&["::1", "9000", "0", "0"]).unwrap();
        assert_eq!(address.family(), Family::Ipv6);
        let resolved = address.resolve().unwrap();
        assert!(resolved.is_ipv6());
        assert_eq!(resolved.port(), 9000);

        let any = Address::from_parts(&["", "0", "7", "0"]).unwrap().resolve().unwrap();
        match any {
            SocketAddr::V6(addr) => {
                assert!(addr.ip().is_unspecified());
                assert_eq!(addr.flowinfo(), 7);
            },
            other => panic!("unexpected address: {}", other),
        }
    }

    #[test]
    fn other_arities_are_rejected() {
        let parts = ["127.0.0.1", "1", "2", "3", "4"];
        for len in [0, 1, 3, 5] {
            match Address::from_parts(&parts[..len]) {
                Err(ServerError::UnknownAddressFamily(arity)) => assert_eq!(arity, len),
                other => panic!("arity {} accepted: {:?}", len, other),
            }
        }
    }

    #[test]
    fn family_mismatch_is_rejected() {
        assert!(matches!(Address::from(("::1", 80u16)).resolve(), Err(ServerError::InvalidAddress(_))));
        assert!(matches!(Address::from(("127.0.0.1", 80u16, 0u32, 0u32)).resolve(), Err(ServerError::InvalidAddress(_))));
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        assert!(matches!(Address::from_parts(&["localhost", "http"]), Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn default_address_uses_well_known_port() {
        assert_eq!(default_address(SocketKind::Stream).port(), DEFAULT_PORT);
        assert_eq!(default_address(SocketKind::Datagram).port(), DEFAULT_PORT);
    }
}
