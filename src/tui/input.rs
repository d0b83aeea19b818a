//! Terminal input events in the record shape `on_input` receives.
//!
//! Scripts match on the numeric codes of the termbox event model, so
//! crossterm events are translated into that model here:
//!
//! ```text
//! crossterm Event::Key    → { type = 1, mod, ch, key }
//! crossterm Event::Resize → { type = 2 }                (grid resized first)
//! crossterm Event::Mouse  → { type = 3, mod, key, mousex, mousey }
//! ```
//!
//! Printable characters arrive in `ch` with `key = 0`; everything else
//! arrives in `key` with `ch = 0`.

use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseButton, MouseEvent,
    MouseEventKind,
};
use serde::{Serialize, Serializer};

/// Modifier bits of the `mod` field.
pub mod modifier {
    /// Alt was held.
    pub const ALT: u8 = 0x01;
    /// Mouse event generated by motion with a button held.
    pub const MOTION: u8 = 0x02;
}

/// Key codes of the `key` field.
#[allow(missing_docs, reason = "names are the documentation")]
pub mod key {
    pub const CTRL_TILDE: u16 = 0x00;
    pub const CTRL_A: u16 = 0x01;
    pub const CTRL_Z: u16 = 0x1A;
    pub const CTRL_BACKSLASH: u16 = 0x1C;
    pub const CTRL_RSQ_BRACKET: u16 = 0x1D;
    pub const CTRL_6: u16 = 0x1E;
    pub const CTRL_SLASH: u16 = 0x1F;
    pub const TAB: u16 = 0x09;
    pub const ENTER: u16 = 0x0D;
    pub const ESC: u16 = 0x1B;
    pub const SPACE: u16 = 0x20;
    pub const BACKSPACE2: u16 = 0x7F;

    pub const F1: u16 = 0xFFFF;
    pub const F12: u16 = 0xFFFF - 11;
    pub const INSERT: u16 = 0xFFFF - 12;
    pub const DELETE: u16 = 0xFFFF - 13;
    pub const HOME: u16 = 0xFFFF - 14;
    pub const END: u16 = 0xFFFF - 15;
    pub const PGUP: u16 = 0xFFFF - 16;
    pub const PGDN: u16 = 0xFFFF - 17;
    pub const ARROW_UP: u16 = 0xFFFF - 18;
    pub const ARROW_DOWN: u16 = 0xFFFF - 19;
    pub const ARROW_LEFT: u16 = 0xFFFF - 20;
    pub const ARROW_RIGHT: u16 = 0xFFFF - 21;
    pub const MOUSE_LEFT: u16 = 0xFFFF - 22;
    pub const MOUSE_RIGHT: u16 = 0xFFFF - 23;
    pub const MOUSE_MIDDLE: u16 = 0xFFFF - 24;
    pub const MOUSE_RELEASE: u16 = 0xFFFF - 25;
    pub const MOUSE_WHEEL_UP: u16 = 0xFFFF - 26;
    pub const MOUSE_WHEEL_DOWN: u16 = 0xFFFF - 27;
}

/// Event category, serialized as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Keyboard input (1).
    Key,
    /// Terminal resized (2).
    Resize,
    /// Mouse button, wheel or drag (3).
    Mouse,
}

impl EventKind {
    /// Numeric code seen by scripts.
    pub fn code(self) -> u8 {
        match self {
            Self::Key => 1,
            Self::Resize => 2,
            Self::Mouse => 3,
        }
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// One input event, shaped like the table handed to `on_input`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InputEvent {
    /// Event category.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// [`modifier`] bits.
    #[serde(rename = "mod")]
    pub modifiers: u8,
    /// Unicode scalar of a printable key, else 0.
    pub ch: u32,
    /// [`key`] code of a special key or mouse button, else 0.
    pub key: u16,
    /// Mouse column.
    #[serde(rename = "mousex")]
    pub mouse_x: i32,
    /// Mouse row.
    #[serde(rename = "mousey")]
    pub mouse_y: i32,
    /// New `(cols, rows)` of a resize event.
    #[serde(skip)]
    pub size: Option<(u16, u16)>,
}

impl InputEvent {
    /// A printable character.
    pub fn char(ch: char) -> Self {
        Self::key_event(u32::from(ch), 0, 0)
    }

    /// A special key.
    pub fn key(code: u16) -> Self {
        Self::key_event(0, code, 0)
    }

    /// A terminal resize to `cols` x `rows`.
    pub fn resize(cols: u16, rows: u16) -> Self {
        Self {
            kind: EventKind::Resize,
            modifiers: 0,
            ch: 0,
            key: 0,
            mouse_x: 0,
            mouse_y: 0,
            size: Some((cols, rows)),
        }
    }

    /// A mouse event at (`x`, `y`).
    pub fn mouse(code: u16, x: u16, y: u16, modifiers: u8) -> Self {
        Self {
            kind: EventKind::Mouse,
            modifiers,
            ch: 0,
            key: code,
            mouse_x: i32::from(x),
            mouse_y: i32::from(y),
            size: None,
        }
    }

    /// Set the alt modifier bit.
    #[must_use]
    pub fn with_alt(mut self) -> Self {
        self.modifiers |= modifier::ALT;
        self
    }

    fn key_event(ch: u32, code: u16, modifiers: u8) -> Self {
        Self {
            kind: EventKind::Key,
            modifiers,
            ch,
            key: code,
            mouse_x: 0,
            mouse_y: 0,
            size: None,
        }
    }

    /// Translate a crossterm event. Events with no counterpart (focus,
    /// paste, key release, plain mouse motion) yield `None`.
    pub fn from_crossterm(event: &Event) -> Option<Self> {
        match event {
            Event::Key(key) => from_key(key),
            Event::Mouse(mouse) => from_mouse(mouse),
            Event::Resize(cols, rows) => Some(Self::resize(*cols, *rows)),
            _ => None,
        }
    }
}

fn from_key(event: &KeyEvent) -> Option<InputEvent> {
    if event.kind == KeyEventKind::Release {
        return None;
    }

    let ctrl = event.modifiers.contains(KeyModifiers::CONTROL);
    let mut translated = match event.code {
        KeyCode::Char(c) if ctrl => InputEvent::key(ctrl_code(c)?),
        KeyCode::Char(' ') => InputEvent::key(key::SPACE),
        KeyCode::Char(c) => InputEvent::char(c),
        KeyCode::Enter => InputEvent::key(key::ENTER),
        KeyCode::Tab | KeyCode::BackTab => InputEvent::key(key::TAB),
        KeyCode::Backspace => InputEvent::key(key::BACKSPACE2),
        KeyCode::Esc => InputEvent::key(key::ESC),
        KeyCode::F(n @ 1..=12) => InputEvent::key(key::F1 - u16::from(n - 1)),
        KeyCode::Insert => InputEvent::key(key::INSERT),
        KeyCode::Delete => InputEvent::key(key::DELETE),
        KeyCode::Home => InputEvent::key(key::HOME),
        KeyCode::End => InputEvent::key(key::END),
        KeyCode::PageUp => InputEvent::key(key::PGUP),
        KeyCode::PageDown => InputEvent::key(key::PGDN),
        KeyCode::Up => InputEvent::key(key::ARROW_UP),
        KeyCode::Down => InputEvent::key(key::ARROW_DOWN),
        KeyCode::Left => InputEvent::key(key::ARROW_LEFT),
        KeyCode::Right => InputEvent::key(key::ARROW_RIGHT),
        _ => return None,
    };

    if event.modifiers.contains(KeyModifiers::ALT) {
        translated = translated.with_alt();
    }
    Some(translated)
}

/// Control-key code for `ctrl+c`, as the terminal would have sent it.
fn ctrl_code(c: char) -> Option<u16> {
    let code = match c.to_ascii_lowercase() {
        c @ 'a'..='z' => key::CTRL_A + (c as u16 - 'a' as u16),
        ' ' | '@' | '2' | '~' | '`' => key::CTRL_TILDE,
        '[' | '3' => key::ESC,
        '\\' | '4' => key::CTRL_BACKSLASH,
        ']' | '5' => key::CTRL_RSQ_BRACKET,
        '^' | '6' => key::CTRL_6,
        '_' | '/' | '7' => key::CTRL_SLASH,
        '8' => key::BACKSPACE2,
        _ => return None,
    };
    Some(code)
}

fn from_mouse(event: &MouseEvent) -> Option<InputEvent> {
    let button = |b: MouseButton| match b {
        MouseButton::Left => key::MOUSE_LEFT,
        MouseButton::Right => key::MOUSE_RIGHT,
        MouseButton::Middle => key::MOUSE_MIDDLE,
    };

    let (code, modifiers) = match event.kind {
        MouseEventKind::Down(b) => (button(b), 0),
        MouseEventKind::Drag(b) => (button(b), modifier::MOTION),
        MouseEventKind::Up(_) => (key::MOUSE_RELEASE, 0),
        MouseEventKind::ScrollUp => (key::MOUSE_WHEEL_UP, 0),
        MouseEventKind::ScrollDown => (key::MOUSE_WHEEL_DOWN, 0),
        _ => return None,
    };

    let mut modifiers = modifiers;
    if event.modifiers.contains(KeyModifiers::ALT) {
        modifiers |= modifier::ALT;
    }
    Some(InputEvent::mouse(code, event.column, event.row, modifiers))
}

/// Where the engine pulls input events from.
pub trait InputSource {
    /// Descriptor to wait on for readiness, if the source has one.
    fn raw_fd(&self) -> Option<RawFd>;

    /// Returns true if an event can be read without blocking.
    fn has_pending(&mut self) -> io::Result<bool>;

    /// Next event, waiting at most `timeout`. `Ok(None)` when nothing
    /// arrived in time.
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>>;
}

/// Keyboard, mouse and resize events from the controlling terminal.
#[derive(Debug)]
pub struct CrosstermInput {
    /// `/dev/tty`, held open when stdin is not the terminal. crossterm
    /// reads from that device then, so readiness must come from it too.
    tty: Option<File>,
}

impl CrosstermInput {
    /// Read from the process's terminal.
    pub fn new() -> Self {
        if io::stdin().is_terminal() {
            return Self { tty: None };
        }
        let tty = OpenOptions::new()
            .read(true)
            .open("/dev/tty")
            .inspect_err(|e| log::warn!("stdin is not a terminal and /dev/tty is unavailable: {}", e))
            .ok();
        Self { tty }
    }
}

impl Default for CrosstermInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for CrosstermInput {
    fn raw_fd(&self) -> Option<RawFd> {
        if io::stdin().is_terminal() {
            return Some(libc::STDIN_FILENO);
        }
        // Without a descriptor, has_pending() still runs every tick
        self.tty.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn has_pending(&mut self) -> io::Result<bool> {
        event::poll(Duration::ZERO)
    }

    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<InputEvent>> {
        // Untranslatable events are consumed and skipped within the window
        while event::poll(timeout)? {
            if let Some(translated) = InputEvent::from_crossterm(&event::read()?) {
                return Ok(Some(translated));
            }
        }
        Ok(None)
    }
}
