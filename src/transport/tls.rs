//! TLS client setup over an already connected socket.
//!
//! Uses rustls with the ring provider and the Mozilla root set from
//! `webpki-roots`, so no system certificate store is required.

use std::net::TcpStream;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};

use super::TransportError;

static CLIENT_CONFIG: OnceLock<Result<Arc<ClientConfig>, String>> = OnceLock::new();

/// Shared client configuration, built on first use.
fn client_config() -> Result<Arc<ClientConfig>, TransportError> {
    CLIENT_CONFIG
        .get_or_init(|| {
            let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map(|builder| {
                    Arc::new(builder.with_root_certificates(roots).with_no_client_auth())
                })
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(TransportError::Handshake)
}

/// A client session for `host` that has not talked to anyone yet.
pub(super) fn session(host: &str) -> Result<ClientConnection, TransportError> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::Handshake(format!("invalid server name {host:?}: {e}")))?;
    Ok(ClientConnection::new(client_config()?, server_name)?)
}

/// Perform a blocking TLS handshake on `stream`.
///
/// The socket must still be in blocking mode; `timeout` bounds each read
/// and write of the handshake so a silent peer cannot hang startup.
pub fn handshake(
    host: &str,
    stream: &mut TcpStream,
    timeout: Duration,
) -> Result<ClientConnection, TransportError> {
    let mut tls = session(host)?;

    stream.set_read_timeout(Some(timeout)).map_err(TransportError::Io)?;
    stream.set_write_timeout(Some(timeout)).map_err(TransportError::Io)?;

    while tls.is_handshaking() {
        tls.complete_io(stream)
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
    }

    stream.set_read_timeout(None).map_err(TransportError::Io)?;
    stream.set_write_timeout(None).map_err(TransportError::Io)?;

    log::debug!(
        "TLS established with {} ({:?})",
        host,
        tls.negotiated_cipher_suite().map(|s| s.suite())
    );
    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_is_shared() {
        let a = client_config().unwrap();
        let b = client_config().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_session_rejects_bad_server_name() {
        let err = session("not a host name").unwrap_err();
        assert!(matches!(err, TransportError::Handshake(_)), "got {err:?}");
    }

    #[test]
    fn test_handshake_against_plain_peer_fails() {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            // Not a TLS record
            let _ = stream.write_all(b"NOTICE * :plain text\r\n");
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let err = handshake("localhost", &mut stream, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, TransportError::Handshake(_)), "got {err:?}");
        server.join().unwrap();
    }
}
