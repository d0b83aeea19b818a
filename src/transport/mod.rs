//! Server transport: one TCP connection, optionally wrapped in TLS.
//!
//! # Architecture
//!
//! ```text
//! conn_init(host, service, tls)
//!   └── resolve::candidates()      name/port → [SocketAddr]
//!        └── TcpStream::connect_timeout per candidate, first success wins
//!             └── tls::handshake() (secure mode only, blocking)
//!                  └── set_nonblocking(true)
//! ```
//!
//! After connecting, the socket is non-blocking. [`Connection::read`] maps
//! every "nothing to read yet" condition (EAGAIN, EINTR, a TLS record that
//! did not complete, a pending key update) to [`ReadOutcome::WouldBlock`];
//! the caller simply polls again. Reconnection is never attempted here.

pub mod resolve;
pub mod tls;

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use crate::constants::LINE_TERMINATOR;

/// Whether the byte stream is plain TCP or TLS over TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Plain TCP.
    Plain,
    /// TLS over TCP.
    Secure,
}

/// Result of a single non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were placed in the buffer.
    Data(usize),
    /// Nothing available yet; poll again on the next wake-up.
    WouldBlock,
    /// The peer closed the connection.
    Eof,
}

/// Errors that can occur on the server transport.
#[derive(Debug)]
pub enum TransportError {
    /// Host or service name could not be resolved.
    Resolve {
        /// Host as given by the caller.
        host: String,
        /// Service name or port as given by the caller.
        service: String,
        /// Resolver message.
        reason: String,
    },
    /// Every resolved candidate refused or timed out.
    Connect {
        /// Host as given by the caller.
        host: String,
        /// Error from the last candidate tried.
        source: io::Error,
    },
    /// TLS setup failed before the session was established.
    Handshake(String),
    /// The TLS session reported a protocol error.
    Tls(rustls::Error),
    /// The socket cannot accept data right now.
    WouldBlock,
    /// Fewer bytes were accepted than requested.
    ShortSend {
        /// Bytes the socket accepted.
        sent: usize,
        /// Bytes requested, terminator included.
        expected: usize,
    },
    /// Hard I/O failure.
    Io(io::Error),
    /// No connection is established.
    NotConnected,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolve { host, service, reason } => {
                write!(f, "cannot resolve hostname: {host}:{service}: {reason}")
            }
            Self::Connect { host, source } => write!(f, "cannot connect to host: {host}: {source}"),
            Self::Handshake(msg) => write!(f, "TLS handshake failed: {msg}"),
            Self::Tls(e) => write!(f, "TLS error: {e}"),
            Self::WouldBlock => write!(f, "cannot send: socket would block"),
            Self::ShortSend { sent, expected } => {
                write!(f, "sent != len(data): {sent} of {expected} bytes")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect { source, .. } | Self::Io(source) => Some(source),
            Self::Tls(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rustls::Error> for TransportError {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e)
    }
}

/// An established server connection.
pub struct Connection {
    stream: TcpStream,
    tls: Option<Box<rustls::ClientConnection>>,
    peer: SocketAddr,
    host: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.stream.as_raw_fd())
            .field("peer", &self.peer)
            .field("host", &self.host)
            .field("mode", &self.mode())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Resolve `host`/`service` and connect to the first candidate that
    /// accepts, performing a TLS handshake in secure mode.
    ///
    /// `service` may be a numeric port or a service name (`"ircs"`).
    pub fn connect(
        host: &str,
        service: &str,
        mode: TransportMode,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let candidates = resolve::candidates(host, service)?;

        let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no usable address");
        let mut connected = None;
        for addr in candidates {
            log::debug!("Connecting to {} ({})", host, addr);
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    connected = Some((stream, addr));
                    break;
                }
                Err(e) => {
                    log::debug!("Candidate {} failed: {}", addr, e);
                    last_err = e;
                }
            }
        }

        let Some((mut stream, peer)) = connected else {
            return Err(TransportError::Connect {
                host: host.to_string(),
                source: last_err,
            });
        };

        let tls = match mode {
            TransportMode::Plain => None,
            TransportMode::Secure => Some(Box::new(tls::handshake(host, &mut stream, timeout)?)),
        };

        stream.set_nodelay(true).map_err(TransportError::Io)?;
        stream.set_nonblocking(true).map_err(TransportError::Io)?;

        log::info!("Connected to {} ({}, {:?})", host, peer, mode);
        Ok(Self {
            stream,
            tls,
            peer,
            host: host.to_string(),
        })
    }

    /// Plain or secure.
    pub fn mode(&self) -> TransportMode {
        if self.tls.is_some() {
            TransportMode::Secure
        } else {
            TransportMode::Plain
        }
    }

    /// Non-blocking read into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
        match self.tls.as_deref_mut() {
            None => read_plain(&mut self.stream, buf),
            Some(tls) => read_secure(tls, &mut self.stream, buf),
        }
    }

    /// Send `text` followed by CRLF.
    ///
    /// In plain mode the whole line must be accepted in one go; anything
    /// less is reported as [`TransportError::ShortSend`]. In secure mode a
    /// line is refused with [`TransportError::WouldBlock`] while earlier
    /// records are still stuck in the session; once accepted, whatever the
    /// socket did not take is flushed when the descriptor turns writable
    /// (see [`Connection::wants_write`]).
    pub fn send_line(&mut self, text: &[u8]) -> Result<(), TransportError> {
        match self.tls.as_deref_mut() {
            None => write_line(&mut self.stream, text),
            Some(tls) => send_secure(tls, &mut self.stream, text),
        }
    }

    /// Whether TLS records are queued that the socket has not accepted.
    /// The loop adds `POLLOUT` for the descriptor while this holds.
    pub fn wants_write(&self) -> bool {
        self.tls.as_deref().is_some_and(|tls| tls.wants_write())
    }

    /// Push any buffered TLS records to the socket. No-op in plain mode.
    pub fn flush_pending(&mut self) -> Result<(), TransportError> {
        match self.tls.as_deref_mut() {
            None => Ok(()),
            Some(tls) => flush_tls(tls, &mut self.stream).map(|_| ()),
        }
    }

    /// Close the connection, sending a TLS close_notify when applicable.
    pub fn close(mut self) {
        if let Some(tls) = self.tls.as_deref_mut() {
            tls.send_close_notify();
            let _ = flush_tls(tls, &mut self.stream);
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        log::info!("Closed connection to {}", self.host);
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Write `text` + CRLF with a single write call and verify the count.
pub fn write_line<W: Write + ?Sized>(writer: &mut W, text: &[u8]) -> Result<(), TransportError> {
    let mut line = Vec::with_capacity(text.len() + LINE_TERMINATOR.len());
    line.extend_from_slice(text);
    line.extend_from_slice(LINE_TERMINATOR);

    let sent = loop {
        match writer.write(&line) {
            Ok(n) => break n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(TransportError::WouldBlock),
            Err(e) => return Err(TransportError::Io(e)),
        }
    };

    if sent < line.len() {
        return Err(TransportError::ShortSend {
            sent,
            expected: line.len(),
        });
    }
    Ok(())
}

fn read_plain<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
    loop {
        match stream.read(buf) {
            Ok(0) => return Ok(ReadOutcome::Eof),
            Ok(n) => return Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadOutcome::WouldBlock),
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
}

fn read_secure(
    tls: &mut rustls::ClientConnection,
    stream: &mut TcpStream,
    buf: &mut [u8],
) -> Result<ReadOutcome, TransportError> {
    loop {
        // Plaintext left over from an earlier record comes first
        match tls.reader().read(buf) {
            Ok(0) => return Ok(ReadOutcome::Eof),
            Ok(n) => return Ok(ReadOutcome::Data(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(ReadOutcome::Eof),
            Err(e) => return Err(TransportError::Io(e)),
        }

        match tls.read_tls(stream) {
            Ok(0) => return Ok(ReadOutcome::Eof),
            Ok(_) => {
                if let Err(e) = tls.process_new_packets() {
                    // Best effort: tell the peer why we are giving up
                    let _ = flush_tls(tls, stream);
                    return Err(TransportError::Tls(e));
                }
                // Key updates and alerts may need an answer
                flush_tls(tls, stream)?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                flush_tls(tls, stream)?;
                return Ok(ReadOutcome::WouldBlock);
            }
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
}

fn send_secure<W: Write>(
    tls: &mut rustls::ClientConnection,
    stream: &mut W,
    text: &[u8],
) -> Result<(), TransportError> {
    if !flush_tls(tls, stream)? {
        return Err(TransportError::WouldBlock);
    }
    write_line(&mut tls.writer(), text)?;
    if !flush_tls(tls, stream)? {
        log::debug!("TLS records queued until the socket is writable");
    }
    Ok(())
}

/// Write queued TLS records. Returns `false` if some are still queued
/// because the socket would block.
fn flush_tls<W: Write>(tls: &mut rustls::ClientConnection, stream: &mut W) -> Result<bool, TransportError> {
    while tls.wants_write() {
        match tls.write_tls(stream) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(TransportError::Io(e)),
        }
    }
    Ok(true)
}
