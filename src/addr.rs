//! Address string helpers shared by the transport, pool, and config layers.

use std::net::SocketAddr;

use crate::error::{Error, Result};

/// Split a `host:port` string into host and port.
///
/// Accepts IPv4, bracketed IPv6, and hostname forms.
pub fn split_host_port(address: &str) -> Result<(String, u16)> {
    // Socket-address literals cover `1.2.3.4:80` and `[::1]:80`.
    if let Ok(sa) = address.parse::<SocketAddr>() {
        return Ok((sa.ip().to_string(), sa.port()));
    }

    let (host, port) = address.rsplit_once(':').ok_or_else(|| Error::InvalidAddress {
        address: address.to_string(),
        reason: "missing port".to_string(),
    })?;

    if host.is_empty() {
        return Err(Error::InvalidAddress {
            address: address.to_string(),
            reason: "empty host".to_string(),
        });
    }

    let port: u16 = port.parse().map_err(|_| Error::InvalidAddress {
        address: address.to_string(),
        reason: format!("invalid port number '{}'", port),
    })?;

    Ok((host.trim_matches(|c| c == '[' || c == ']').to_string(), port))
}

/// Extract the port from a `host:port` string.
pub fn port_number(address: &str) -> Result<u16> {
    split_host_port(address).map(|(_, port)| port)
}

/// Join host and port back into a dialable address string.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ipv4() {
        let (host, port) = split_host_port("10.0.10.115:7654").unwrap();
        assert_eq!(host, "10.0.10.115");
        assert_eq!(port, 7654);
    }

    #[test]
    fn test_split_hostname() {
        let (host, port) = split_host_port("db-3.internal:8000").unwrap();
        assert_eq!(host, "db-3.internal");
        assert_eq!(port, 8000);
    }

    #[test]
    fn test_split_ipv6() {
        let (host, port) = split_host_port("[::1]:9000").unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 9000);
    }

    #[test]
    fn test_split_errors() {
        assert!(split_host_port("no-port").is_err());
        assert!(split_host_port(":8000").is_err());
        assert!(split_host_port("host:notaport").is_err());
    }

    #[test]
    fn test_join_round_trip() {
        assert_eq!(join_host_port("10.0.0.1", 9000), "10.0.0.1:9000");
        assert_eq!(join_host_port("::1", 9000), "[::1]:9000");

        let (host, port) = split_host_port(&join_host_port("::1", 9000)).unwrap();
        assert_eq!((host.as_str(), port), ("::1", 9000));
    }
}
