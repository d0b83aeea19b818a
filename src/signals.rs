//! Signal routing.
//!
//! Two disjoint sets of signals are handled:
//!
//! - **Handleable** (`SIGHUP`, `SIGINT`, `SIGPIPE`, `SIGUSR1`, `SIGUSR2`,
//!   `SIGWINCH`): the handler only sets a flag and writes a byte to a
//!   self-pipe. The engine polls the read end alongside the transport and
//!   the terminal, then hands each pending signal to `on_signal` from the
//!   loop, never from handler context.
//! - **Fatal** (`SIGILL`, `SIGSEGV`, `SIGFPE`, `SIGBUS`): the handler
//!   restores the terminal from state captured at startup, writes a short
//!   diagnostic to stderr and exits with status 1. The Lua state may be
//!   mid-mutation at that point, so it is not touched.

use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Result};
use signal_hook::consts::signal::{
    SIGBUS, SIGFPE, SIGHUP, SIGILL, SIGINT, SIGPIPE, SIGSEGV, SIGUSR1, SIGUSR2, SIGWINCH,
};
use signal_hook::low_level;
use signal_hook::SigId;

/// Signals forwarded to `on_signal`, in dispatch order.
pub const HANDLED_SIGNALS: [i32; 6] = [SIGHUP, SIGINT, SIGPIPE, SIGUSR1, SIGUSR2, SIGWINCH];

/// Signals that terminate the process with a diagnostic.
pub const FATAL_SIGNALS: [i32; 4] = [SIGILL, SIGSEGV, SIGFPE, SIGBUS];

/// Short upper-case name of a signal, for diagnostics.
pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        SIGHUP => "SIGHUP",
        SIGINT => "SIGINT",
        SIGPIPE => "SIGPIPE",
        SIGUSR1 => "SIGUSR1",
        SIGUSR2 => "SIGUSR2",
        SIGWINCH => "SIGWINCH",
        SIGILL => "SIGILL",
        SIGSEGV => "SIGSEGV",
        SIGFPE => "SIGFPE",
        SIGBUS => "SIGBUS",
        _ => "unknown",
    }
}

/// Receives handleable signals and exposes them to the loop.
///
/// Dropping the router unregisters its handlers; the default dispositions
/// are not restored, signal-hook keeps its own handler installed.
#[derive(Debug)]
pub struct SignalRouter {
    flags: Vec<(i32, Arc<AtomicBool>)>,
    wake: UnixStream,
    ids: Vec<SigId>,
}

impl SignalRouter {
    /// Register handlers for [`HANDLED_SIGNALS`].
    pub fn install() -> Result<Self> {
        let (wake, notify) =
            UnixStream::pair().map_err(|e| anyhow!("Failed to create signal pipe: {e}"))?;
        wake.set_nonblocking(true)
            .map_err(|e| anyhow!("Failed to configure signal pipe: {e}"))?;
        notify
            .set_nonblocking(true)
            .map_err(|e| anyhow!("Failed to configure signal pipe: {e}"))?;

        let mut router = Self {
            flags: Vec::with_capacity(HANDLED_SIGNALS.len()),
            wake,
            ids: Vec::with_capacity(HANDLED_SIGNALS.len() * 2),
        };

        for signal in HANDLED_SIGNALS {
            let flag = Arc::new(AtomicBool::new(false));
            let flag_id = signal_hook::flag::register(signal, Arc::clone(&flag))
                .map_err(|e| anyhow!("Failed to register {}: {e}", signal_name(signal)))?;
            router.ids.push(flag_id);

            let writer = notify
                .try_clone()
                .map_err(|e| anyhow!("Failed to clone signal pipe: {e}"))?;
            let pipe_id = low_level::pipe::register(signal, writer)
                .map_err(|e| anyhow!("Failed to register {}: {e}", signal_name(signal)))?;
            router.ids.push(pipe_id);

            router.flags.push((signal, flag));
        }

        log::debug!("Signal router installed for {:?}", HANDLED_SIGNALS);
        Ok(router)
    }

    /// Read end of the self-pipe, readable whenever a signal arrived.
    pub fn raw_fd(&self) -> RawFd {
        self.wake.as_raw_fd()
    }

    /// Signals delivered since the last call, each reported once no matter
    /// how many times it arrived.
    pub fn take_pending(&mut self) -> Vec<i32> {
        let mut sink = [0u8; 64];
        loop {
            match self.wake.read(&mut sink) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }

        self.flags
            .iter()
            .filter(|(_, flag)| flag.swap(false, Ordering::AcqRel))
            .map(|(signal, _)| *signal)
            .collect()
    }
}

impl Drop for SignalRouter {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            low_level::unregister(id);
        }
    }
}

/// Terminal attributes captured before raw mode, restored from the fatal
/// signal handler.
static SAVED_TERMIOS: OnceLock<libc::termios> = OnceLock::new();

/// Record the current terminal attributes of stdin, if it is a terminal.
pub fn capture_terminal_state() {
    let mut termios = std::mem::MaybeUninit::<libc::termios>::uninit();
    // SAFETY: tcgetattr writes a complete termios into the provided
    // pointer on success; the value is only read when it returns 0.
    let rc = unsafe { libc::tcgetattr(libc::STDIN_FILENO, termios.as_mut_ptr()) };
    if rc == 0 {
        // SAFETY: initialized by the successful tcgetattr above.
        let _ = SAVED_TERMIOS.set(unsafe { termios.assume_init() });
    }
}

/// Install the handlers for [`FATAL_SIGNALS`].
pub fn install_fatal_handlers() -> Result<()> {
    for signal in FATAL_SIGNALS {
        // SAFETY: the action only calls async-signal-safe libc functions
        // (tcsetattr, write, alarm, _exit) before the best-effort
        // backtrace, which is bounded by the alarm.
        unsafe {
            signal_hook_registry::register_unchecked(signal, move |_| on_fatal_signal(signal))
        }
            .map_err(|e| anyhow!("Failed to register {}: {e}", signal_name(signal)))?;
    }
    Ok(())
}

/// Leave the alternate screen, stop mouse reporting, show the cursor.
const RESTORE_SEQUENCE: &[u8] = b"\x1b[?1000l\x1b[?1002l\x1b[?1003l\x1b[?1006l\x1b[?1049l\x1b[?25h";

fn on_fatal_signal(signal: i32) -> ! {
    if let Some(termios) = SAVED_TERMIOS.get() {
        // SAFETY: tcsetattr is async-signal-safe; termios is a valid,
        // fully initialized value captured at startup.
        unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, termios) };
    }
    write_raw(libc::STDOUT_FILENO, RESTORE_SEQUENCE);

    let mut digits = [0u8; 12];
    write_raw(libc::STDERR_FILENO, b"fatal: received signal ");
    write_raw(libc::STDERR_FILENO, format_decimal(signal, &mut digits));
    write_raw(libc::STDERR_FILENO, b" (");
    write_raw(libc::STDERR_FILENO, signal_name(signal).as_bytes());
    write_raw(libc::STDERR_FILENO, b"); aborting.\n");

    // The backtrace allocates; if the fault came from inside the
    // allocator the alarm still ends the process.
    // SAFETY: alarm is async-signal-safe.
    unsafe { libc::alarm(2) };
    let backtrace = std::backtrace::Backtrace::force_capture();
    write_raw(libc::STDERR_FILENO, b"backtrace:\n");
    write_raw(libc::STDERR_FILENO, backtrace.to_string().as_bytes());

    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(1) }
}

fn write_raw(fd: RawFd, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        // SAFETY: bytes points to bytes.len() readable bytes.
        let n = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if n <= 0 {
            return;
        }
        bytes = &bytes[n as usize..];
    }
}

/// Format `value` into `buf` without allocating.
fn format_decimal(value: i32, buf: &mut [u8; 12]) -> &[u8] {
    let negative = value < 0;
    let mut n = value.unsigned_abs();
    let mut start = buf.len();
    loop {
        start -= 1;
        buf[start] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    if negative {
        start -= 1;
        buf[start] = b'-';
    }
    &buf[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_sets_are_disjoint() {
        for signal in HANDLED_SIGNALS {
            assert!(!FATAL_SIGNALS.contains(&signal));
        }
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(SIGINT), "SIGINT");
        assert_eq!(signal_name(SIGSEGV), "SIGSEGV");
        assert_eq!(signal_name(0), "unknown");
    }

    #[test]
    fn test_format_decimal() {
        let mut buf = [0u8; 12];
        assert_eq!(format_decimal(0, &mut buf), b"0");
        assert_eq!(format_decimal(11, &mut buf), b"11");
        assert_eq!(format_decimal(-7, &mut buf), b"-7");
        assert_eq!(format_decimal(i32::MIN, &mut buf), b"-2147483648");
    }

    #[test]
    fn test_fatal_handlers_install() {
        capture_terminal_state();
        assert!(install_fatal_handlers().is_ok());
    }

    #[test]
    fn test_router_reports_raised_signals_once() {
        let mut router = SignalRouter::install().unwrap();
        assert!(router.take_pending().is_empty());

        low_level::raise(SIGUSR2).unwrap();
        low_level::raise(SIGUSR2).unwrap();
        low_level::raise(SIGUSR1).unwrap();

        // raise() delivers synchronously to the calling thread
        assert_eq!(router.take_pending(), vec![SIGUSR1, SIGUSR2]);
        assert!(router.take_pending().is_empty());
    }
}
