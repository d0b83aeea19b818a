//! State shared between the loop and the engine API exposed to scripts.
//!
//! Hooks run synchronously inside the loop and call back into the engine
//! (`conn_send`, `tb_writeline`, ...). Both sides reach the same [`Core`]
//! through an `Rc<RefCell<_>>`; the loop never holds a borrow across a hook
//! call, so the script's callbacks can always borrow it.

use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use anyhow::Result;
use ratatui::backend::Backend;

use crate::config::Config;
use crate::framing::LineFramer;
use crate::transport::{Connection, ReadOutcome, TransportError, TransportMode};
use crate::tui::{CellRenderer, Screen};

/// Outcome of draining the transport on a read wake-up.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Pump {
    /// Complete lines, terminators stripped, in arrival order.
    pub lines: Vec<Vec<u8>>,
    /// Bytes read from the socket.
    pub received: usize,
    /// Set when the connection is dead: EOF, I/O error or framing overflow.
    pub closed: Option<String>,
}

/// Connection, framer, display and exit request.
#[derive(Debug)]
pub struct Core<B: Backend> {
    connection: Option<Connection>,
    framer: LineFramer,
    generation: u64,
    renderer: CellRenderer<B>,
    screen: Box<dyn Screen>,
    present_interval: Duration,
    connect_timeout: Duration,
    quit: Option<i32>,
}

impl<B> Core<B>
where
    B: Backend,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    /// Assemble the core from a renderer and the screen it draws on.
    pub fn new(renderer: CellRenderer<B>, screen: Box<dyn Screen>, config: &Config) -> Self {
        Self {
            connection: None,
            framer: LineFramer::new(),
            generation: 0,
            renderer,
            screen,
            present_interval: config.present_interval,
            connect_timeout: config.connect_timeout,
            quit: None,
        }
    }

    // ---- transport -------------------------------------------------------

    /// Replace the current connection with a new one to `host`/`service`.
    ///
    /// The old connection (if any) is closed and the framer cleared before
    /// connecting, so a failed attempt leaves the core disconnected.
    pub fn connect(
        &mut self,
        host: &str,
        service: &str,
        mode: TransportMode,
    ) -> Result<(), TransportError> {
        self.drop_connection();
        let connection = Connection::connect(host, service, mode, self.connect_timeout)?;
        self.connection = Some(connection);
        self.generation += 1;
        Ok(())
    }

    /// Close and forget the connection. Does not notify the behavior layer.
    pub fn drop_connection(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            self.generation += 1;
        }
        self.framer.clear();
    }

    /// Returns true while a connection is established.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Descriptor of the connection, for the poll set and `conn_fd`.
    pub fn conn_fd(&self) -> Option<RawFd> {
        self.connection.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Changes every time a connection is established or dropped.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Send one line, CRLF appended.
    pub fn send_line(&mut self, text: &[u8]) -> Result<(), TransportError> {
        self.connection
            .as_mut()
            .ok_or(TransportError::NotConnected)?
            .send_line(text)
    }

    /// Whether TLS records are queued behind a full socket buffer.
    pub fn transport_wants_write(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::wants_write)
    }

    /// Push queued TLS records. Returns the failure text if the write
    /// killed the connection.
    pub fn flush_transport(&mut self) -> Option<String> {
        let connection = self.connection.as_mut()?;
        connection.flush_pending().err().map(|e| e.to_string())
    }

    /// Read everything the socket has and frame it.
    ///
    /// Reads repeat until the socket would block so that plaintext buffered
    /// inside the TLS session is not left behind a poll that will never
    /// fire. The connection itself is left in place; the loop decides when
    /// to drop it.
    pub fn pump(&mut self) -> Pump {
        let mut pump = Pump::default();
        let Some(connection) = self.connection.as_mut() else {
            return pump;
        };

        let mut buf = vec![0u8; self.framer.capacity()];
        loop {
            let budget = self.framer.read_budget();
            match connection.read(&mut buf[..budget]) {
                Ok(ReadOutcome::Data(n)) => {
                    pump.received += n;
                    match self.framer.feed(&buf[..n]) {
                        Ok(lines) => pump.lines.extend(lines),
                        Err(e) => {
                            pump.closed = Some(e.to_string());
                            break;
                        }
                    }
                }
                Ok(ReadOutcome::WouldBlock) => break,
                Ok(ReadOutcome::Eof) => {
                    pump.closed = Some("connection closed by peer".to_string());
                    break;
                }
                Err(e) => {
                    pump.closed = Some(e.to_string());
                    break;
                }
            }
        }

        if let Err(e) = connection.flush_pending() {
            log::debug!("Flushing TLS records failed: {}", e);
        }
        pump
    }

    // ---- display ---------------------------------------------------------

    /// The cell renderer.
    pub fn renderer(&self) -> &CellRenderer<B> {
        &self.renderer
    }

    /// Mutable access to the cell renderer.
    pub fn renderer_mut(&mut self) -> &mut CellRenderer<B> {
        &mut self.renderer
    }

    /// Switch the terminal into cell mode and repaint from scratch.
    pub fn screen_enter(&mut self) -> Result<()> {
        self.screen.enter()?;
        self.renderer.reset()
    }

    /// Restore the terminal.
    pub fn screen_leave(&mut self) {
        self.screen.leave();
    }

    /// Returns true while the terminal is in cell mode.
    pub fn screen_active(&self) -> bool {
        self.screen.is_active()
    }

    /// Present if the screen is active, the grid is dirty and the minimum
    /// interval has passed.
    pub fn present_if_due(&mut self, now: Instant) -> Result<bool> {
        if !self.screen.is_active() {
            return Ok(false);
        }
        self.renderer.present_throttled(now, self.present_interval)
    }

    /// How long until a pending present is due, if one is pending.
    pub fn present_wait(&self, now: Instant) -> Option<Duration> {
        if !self.screen.is_active() {
            return None;
        }
        self.renderer.present_wait(now, self.present_interval)
    }

    // ---- lifecycle -------------------------------------------------------

    /// Ask the loop to exit with `code` once the current hook returns.
    pub fn request_quit(&mut self, code: i32) {
        if self.quit.is_none() {
            log::info!("Quit requested with status {}", code);
            self.quit = Some(code);
        }
    }

    /// Exit status requested by `quit`, if any.
    pub fn quit_requested(&self) -> Option<i32> {
        self.quit
    }

    /// Close the connection and restore the terminal.
    pub fn shutdown(&mut self) {
        self.drop_connection();
        self.screen.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tui::HeadlessScreen;
    use ratatui::backend::TestBackend;
    use std::io::Write;
    use std::net::TcpListener;

    fn core() -> Core<TestBackend> {
        let renderer = CellRenderer::new(TestBackend::new(20, 4)).unwrap();
        Core::new(renderer, Box::new(HeadlessScreen::new()), &Config::default())
    }

    #[test]
    fn test_send_without_connection() {
        let mut core = core();
        let err = core.send_line(b"PING").unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        assert_eq!(core.conn_fd(), None);
    }

    #[test]
    fn test_pump_frames_and_reports_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();

        let mut core = core();
        core.connect("127.0.0.1", &port, TransportMode::Plain).unwrap();
        assert_eq!(core.generation(), 1);
        let (mut peer, _) = listener.accept().unwrap();

        peer.write_all(b"one\r\ntwo\r\nthr").unwrap();
        drop(peer);

        // The peer's data and FIN may arrive separately; pump until closed
        let mut lines = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        let closed = loop {
            let pump = core.pump();
            lines.extend(pump.lines);
            if let Some(reason) = pump.closed {
                break reason;
            }
            assert!(Instant::now() < deadline, "peer close never observed");
            std::thread::sleep(Duration::from_millis(5));
        };

        assert_eq!(lines, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(closed, "connection closed by peer");

        core.drop_connection();
        assert!(!core.is_connected());
        assert_eq!(core.generation(), 2);
    }

    #[test]
    fn test_plain_transport_has_nothing_to_flush() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port().to_string();

        let mut core = core();
        assert!(!core.transport_wants_write());
        assert_eq!(core.flush_transport(), None);

        core.connect("127.0.0.1", &port, TransportMode::Plain).unwrap();
        assert!(!core.transport_wants_write());
        assert_eq!(core.flush_transport(), None);
    }

    #[test]
    fn test_present_requires_active_screen() {
        let mut core = core();
        core.renderer_mut().write_line(0, b"hi");
        let now = Instant::now();
        assert!(!core.present_if_due(now).unwrap());
        assert_eq!(core.present_wait(now), None);

        core.screen_enter().unwrap();
        assert!(core.present_if_due(now).unwrap());
        assert_eq!(core.renderer().present_count(), 1);
    }

    #[test]
    fn test_first_quit_request_wins() {
        let mut core = core();
        core.request_quit(3);
        core.request_quit(0);
        assert_eq!(core.quit_requested(), Some(3));
    }
}
