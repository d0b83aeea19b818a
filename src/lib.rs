//! Lurch - a terminal client engine driven by Lua.
//!
//! The engine multiplexes one line-oriented server connection, the
//! terminal and process signals in a single loop, and hands every event to
//! a Lua behavior layer through a fixed set of hooks. The behavior layer
//! draws on a cell grid and talks back to the server through the `lurch`
//! API table.
//!
//! # Architecture
//!
//! - **Engine** - The loop and its connection state machine
//! - **Transport** - Plain TCP or TLS, non-blocking after connect
//! - **Framing** - CRLF line splitting of the receive stream
//! - **Hooks** - Bridge between the loop and the behavior layer
//! - **TUI** - Cell grid, style escapes, terminal input
//! - **Signals** - Self-pipe delivery and fatal-signal cleanup
//!
//! # Modules
//!
//! - [`engine`] - Event loop
//! - [`lua`] - Lua host and the script API
//! - [`config`] - Configuration defaults and environment overrides

// Library modules
pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod engine;
pub mod framing;
pub mod hooks;
pub mod lua;
pub mod signals;
pub mod transport;
pub mod tui;

// Re-export commonly used types
pub use config::Config;
pub use engine::{Engine, EngineError, EngineState, SharedCore};
pub use hooks::{Behavior, Bridge, Hook};
pub use lua::LuaBehavior;
pub use transport::{Connection, TransportError, TransportMode};
