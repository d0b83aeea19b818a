//! Engine-wide constants for lurch.
//!
//! This module centralizes the magic numbers of the engine so the loop,
//! transport, framer and renderer agree on them. Values that users may want
//! to tune are only *defaults* here; [`crate::config::Config`] carries the
//! effective values.
//!
//! # Categories
//!
//! - **Timing**: readiness-wait, idle and redraw intervals
//! - **Transport**: buffer sizes and connect timeouts
//! - **Rendering**: default colors and style escape bytes

use std::time::Duration;

// ============================================================================
// Timing
// ============================================================================

/// Upper bound on a single readiness wait.
///
/// The loop wakes at least this often even without I/O so the idle check
/// and pending redraws get a chance to run.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(120);

/// Shortest tick accepted from the environment.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Server silence after which `on_timeout` fires on an idle tick.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(4096);

/// Minimum spacing between two physical flushes of the cell grid.
///
/// Bursts of `tb_writeline` calls inside this window collapse into a
/// single present.
pub const DEFAULT_PRESENT_INTERVAL: Duration = Duration::from_millis(1);

/// First delay before `on_disconnect` is asked again while a reconnect is
/// pending.
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Ceiling for the doubling reconnect backoff.
pub const DEFAULT_RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// How long a terminal drain waits for a follow-up event before giving the
/// loop back.
pub const INPUT_PEEK_TIMEOUT: Duration = Duration::from_millis(16);

// ============================================================================
// Transport
// ============================================================================

/// Capacity of the receive buffer, including the reserved sentinel byte.
///
/// A line longer than `RECV_BUFFER_CAPACITY - 1` bytes without a CRLF is a
/// framing overflow.
pub const RECV_BUFFER_CAPACITY: usize = 4096;

/// Line terminator appended by `conn_send` and split on by the framer.
pub const LINE_TERMINATOR: &[u8; 2] = b"\r\n";

/// Per-candidate TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Rendering
// ============================================================================

/// Foreground color index a style cursor starts with (bright white).
pub const DEFAULT_FG_COLOR: u8 = 15;

/// Background color index a style cursor starts with (black).
pub const DEFAULT_BG_COLOR: u8 = 0;

/// Byte that introduces an inline style escape in `tb_writeline` text.
pub const STYLE_ESCAPE: u8 = 0x1b;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_values_are_ordered() {
        // Redraw throttling must be far below the tick or redraws would stall
        assert!(DEFAULT_PRESENT_INTERVAL < INPUT_PEEK_TIMEOUT);
        assert!(INPUT_PEEK_TIMEOUT < MIN_TICK_INTERVAL);
        assert!(MIN_TICK_INTERVAL <= DEFAULT_TICK_INTERVAL);
        assert!(DEFAULT_RECONNECT_BACKOFF <= DEFAULT_RECONNECT_BACKOFF_MAX);
    }

    #[test]
    fn test_receive_buffer_fits_a_terminated_line() {
        assert!(RECV_BUFFER_CAPACITY > LINE_TERMINATOR.len());
    }
}
