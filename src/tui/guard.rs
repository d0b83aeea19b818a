//! Terminal mode switching and RAII cleanup.
//!
//! `tb_init` puts the terminal into raw mode on the alternate screen with
//! mouse reporting; `tb_shutdown`, a graceful exit, a fatal hook failure or
//! a panic all have to put it back. [`TerminalGuard`] does the restoring
//! in `Drop`, so dropping it on any path is enough.

use std::io::Write;

use anyhow::{anyhow, Result};
use crossterm::{
    cursor,
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};

/// Guard struct that restores the terminal on drop (including panics).
///
/// When dropped, this guard:
/// - Disables raw mode
/// - Leaves the alternate screen
/// - Disables mouse capture
/// - Shows the cursor
#[derive(Debug)]
pub struct TerminalGuard {
    _private: (),
}

impl TerminalGuard {
    /// Enter raw mode, the alternate screen and mouse capture.
    ///
    /// If any step fails the steps already taken are undone before the
    /// error is returned.
    pub fn enter() -> Result<Self> {
        enable_raw_mode().map_err(|e| anyhow!("Failed to enable raw mode: {e}"))?;
        let guard = Self { _private: () };
        execute!(
            std::io::stdout(),
            EnterAlternateScreen,
            EnableMouseCapture,
            cursor::Hide
        )
        .map_err(|e| anyhow!("Failed to enter alternate screen: {e}"))?;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        // Always attempt to restore terminal state, ignoring errors
        let _ = disable_raw_mode();
        let mut stdout = std::io::stdout();
        let _ = execute!(stdout, LeaveAlternateScreen, DisableMouseCapture, cursor::Show);
        let _ = stdout.flush();
    }
}

/// Display mode control behind `tb_init`/`tb_shutdown`.
///
/// The engine only presents while the screen is active, so a script that
/// never calls `tb_init` runs without touching the terminal.
pub trait Screen: std::fmt::Debug {
    /// Switch the terminal into full-screen cell mode. Idempotent.
    fn enter(&mut self) -> Result<()>;

    /// Restore the terminal. Idempotent.
    fn leave(&mut self);

    /// Returns true between `enter` and `leave`.
    fn is_active(&self) -> bool;
}

/// The real terminal, driven through crossterm.
#[derive(Debug, Default)]
pub struct CrosstermScreen {
    guard: Option<TerminalGuard>,
}

impl CrosstermScreen {
    /// A screen that has not been entered yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Screen for CrosstermScreen {
    fn enter(&mut self) -> Result<()> {
        if self.guard.is_none() {
            self.guard = Some(TerminalGuard::enter()?);
            log::debug!("Terminal entered cell mode");
        }
        Ok(())
    }

    fn leave(&mut self) {
        if self.guard.take().is_some() {
            log::debug!("Terminal restored");
        }
    }

    fn is_active(&self) -> bool {
        self.guard.is_some()
    }
}

/// A screen that only records its state. Used when the display is a
/// `TestBackend`.
#[derive(Debug, Default)]
pub struct HeadlessScreen {
    active: bool,
    entered: u32,
}

impl HeadlessScreen {
    /// An inactive headless screen.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the screen went from inactive to active.
    pub fn times_entered(&self) -> u32 {
        self.entered
    }
}

impl Screen for HeadlessScreen {
    fn enter(&mut self) -> Result<()> {
        if !self.active {
            self.active = true;
            self.entered += 1;
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_screen_enter_is_idempotent() {
        let mut screen = HeadlessScreen::new();
        assert!(!screen.is_active());
        screen.enter().unwrap();
        screen.enter().unwrap();
        assert!(screen.is_active());
        assert_eq!(screen.times_entered(), 1);

        screen.leave();
        screen.leave();
        assert!(!screen.is_active());
    }

    #[test]
    fn test_crossterm_screen_starts_inactive() {
        let mut screen = CrosstermScreen::new();
        assert!(!screen.is_active());
        // Leaving a screen that was never entered touches nothing
        screen.leave();
        assert!(!screen.is_active());
    }
}
