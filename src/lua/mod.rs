//! Lua behavior layer.
//!
//! All client behavior (protocol handling, commands, layout) lives in Lua.
//! The engine loads `<rt>/init.lua` at startup and drives the hook table it
//! returns.
//!
//! # Architecture
//!
//! ```text
//! Engine
//!  └── Bridge
//!       └── LuaBehavior
//!            ├── Lua state (mlua)
//!            ├── HookTable (init, on_reply, on_disconnect, ...)
//!            └── Primitives
//!                 ├── log (info, warn, error, debug)
//!                 ├── conn (conn_init, conn_fd, conn_send, conn_close)
//!                 ├── term (tb_*)
//!                 └── quit
//! ```
//!
//! # Configuration
//!
//! - `LURCH_RT_PATH` - Runtime directory holding `init.lua`
//! - `LURCH_CONF_PATH` - User module directory searched before the runtime
//!
//! # Usage
//!
//! ```ignore
//! let behavior = LuaBehavior::load(&config, &core)?;
//! let bridge = Bridge::new(behavior)?;
//! ```

pub mod primitives;
pub mod runtime;

pub use runtime::LuaBehavior;
