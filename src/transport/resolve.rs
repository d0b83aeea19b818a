//! Endpoint resolution: host name plus service name or port.

use std::ffi::CString;
use std::net::{SocketAddr, ToSocketAddrs};

use super::TransportError;

/// Resolve `host` and `service` into connection candidates, in resolver
/// order.
pub fn candidates(host: &str, service: &str) -> Result<Vec<SocketAddr>, TransportError> {
    let resolve_err = |reason: String| TransportError::Resolve {
        host: host.to_string(),
        service: service.to_string(),
        reason,
    };

    let port = service_port(service).ok_or_else(|| resolve_err("unknown service".to_string()))?;

    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| resolve_err(e.to_string()))?
        .collect();

    if addrs.is_empty() {
        return Err(resolve_err("no addresses found".to_string()));
    }
    Ok(addrs)
}

/// Map a numeric port or a TCP service name (`/etc/services`) to a port.
pub fn service_port(service: &str) -> Option<u16> {
    if let Ok(port) = service.parse::<u16>() {
        return Some(port);
    }

    let name = CString::new(service).ok()?;
    let proto = c"tcp";
    // SAFETY: both pointers are valid NUL-terminated strings for the
    // duration of the call. The returned entry points into libc's static
    // storage and is only read before the next resolver call.
    let entry = unsafe { libc::getservbyname(name.as_ptr(), proto.as_ptr()) };
    if entry.is_null() {
        return None;
    }
    // SAFETY: non-null pointer returned by getservbyname, see above.
    let raw_port = unsafe { (*entry).s_port };
    // s_port holds the port in network byte order in its low 16 bits
    Some(u16::from_be(raw_port as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_service() {
        assert_eq!(service_port("6667"), Some(6667));
        assert_eq!(service_port("0"), Some(0));
    }

    #[test]
    fn test_unknown_service_name() {
        assert_eq!(service_port("definitely-not-a-service"), None);
    }

    #[test]
    fn test_loopback_candidates() {
        let addrs = candidates("127.0.0.1", "6697").unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:6697".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_resolution_failure_is_resolve_error() {
        let err = candidates("127.0.0.1", "no-such-service-name").unwrap_err();
        assert!(matches!(err, TransportError::Resolve { .. }));
        assert!(err.to_string().starts_with("cannot resolve hostname"));
    }
}
