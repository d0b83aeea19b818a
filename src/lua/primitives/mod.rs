//! Engine API exposed to Lua scripts.
//!
//! Everything lives in the global `lurch` table, plus the `log` table:
//!
//! - `conn` - server connection (`conn_init`, `conn_fd`, `conn_send`, `conn_close`)
//! - `term` - cell grid and terminal mode (`tb_*`)
//! - `log` - logging through the `log` crate
//! - `quit` - graceful exit request, registered here
//!
//! Fallible functions follow the Lua convention of returning a value on
//! success and `nil, "error text"` on failure. Only misuse (wrong argument
//! types, re-entering the engine while it is busy) raises.
//!
//! # Adding New Primitives
//!
//! 1. Create a new module (e.g., `foo.rs`)
//! 2. Implement `register(lua, &lurch_table, core)`
//! 3. Add `pub mod foo;` here and call it from `register_all`

pub mod conn;
pub mod log;
pub mod term;

use std::fmt::Display;
use std::rc::Rc;

use anyhow::{anyhow, Result};
use mlua::{IntoLuaMulti, Lua, MultiValue, Table, Value};
use ratatui::backend::Backend;

use crate::engine::{Core, SharedCore};

/// Name of the global API table.
pub const API_TABLE: &str = "lurch";

/// Register the `lurch` and `log` globals.
pub fn register_all<B>(lua: &Lua, core: &SharedCore<B>) -> Result<()>
where
    B: Backend + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    log::register(lua)?;

    let api = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create {API_TABLE} table: {e}"))?;

    conn::register(lua, &api, core)?;
    term::register(lua, &api, core)?;
    register_quit(lua, &api, core)?;

    lua.globals()
        .set(API_TABLE, api)
        .map_err(|e| anyhow!("Failed to register {API_TABLE} table globally: {e}"))?;
    Ok(())
}

/// `quit([code])` - leave the loop after the current hook returns.
fn register_quit<B>(lua: &Lua, api: &Table, core: &SharedCore<B>) -> Result<()>
where
    B: Backend + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let core = Rc::clone(core);
    let quit_fn = lua
        .create_function(move |_, code: Option<i64>| {
            let code = code.map_or(0, |c| i32::try_from(c).unwrap_or(1));
            with_core(&core, |core| core.request_quit(code))
        })
        .map_err(|e| anyhow!("Failed to create quit function: {e}"))?;
    api.set("quit", quit_fn)
        .map_err(|e| anyhow!("Failed to set quit: {e}"))?;
    Ok(())
}

/// Run `f` with the core mutably borrowed.
///
/// The loop never holds the core across a hook call, so a failed borrow
/// means a script managed to re-enter the engine; that is reported as a
/// Lua error rather than a panic.
pub(crate) fn with_core<B, R>(
    core: &SharedCore<B>,
    f: impl FnOnce(&mut Core<B>) -> R,
) -> mlua::Result<R>
where
    B: Backend,
{
    let mut guard = core
        .try_borrow_mut()
        .map_err(|e| mlua::Error::runtime(format!("lurch: engine state is busy ({e})")))?;
    Ok(f(&mut guard))
}

/// `nil, message`
pub(crate) fn failure(lua: &Lua, message: impl Display) -> mlua::Result<MultiValue> {
    (Value::Nil, message.to_string()).into_lua_multi(lua)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::cell::RefCell;
    use std::rc::Rc;

    use mlua::Lua;
    use ratatui::backend::TestBackend;

    use crate::config::Config;
    use crate::engine::{Core, SharedCore};
    use crate::tui::{CellRenderer, HeadlessScreen};

    /// A Lua state with the full API over a headless 20x4 core.
    pub fn lua_with_api() -> (Lua, SharedCore<TestBackend>) {
        let renderer = CellRenderer::new(TestBackend::new(20, 4)).unwrap();
        let core = Rc::new(RefCell::new(Core::new(
            renderer,
            Box::new(HeadlessScreen::new()),
            &Config::default(),
        )));
        let lua = Lua::new();
        super::register_all(&lua, &core).unwrap();
        (lua, core)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::lua_with_api;
    use mlua::{Function, Table};

    #[test]
    fn test_api_table_has_every_function() {
        let (lua, _core) = lua_with_api();
        let api: Table = lua.globals().get("lurch").unwrap();
        for name in [
            "conn_init", "conn_fd", "conn_send", "conn_close", "tb_init", "tb_shutdown",
            "tb_size", "tb_clear", "tb_present", "tb_writeline", "tb_clearline",
            "tb_hidecursor", "tb_showcursor", "quit",
        ] {
            let _: Function = api.get(name).unwrap_or_else(|e| panic!("{name}: {e}"));
        }
    }

    #[test]
    fn test_quit_records_exit_code() {
        let (lua, core) = lua_with_api();
        lua.load("lurch.quit(4)").exec().unwrap();
        assert_eq!(core.borrow().quit_requested(), Some(4));
    }

    #[test]
    fn test_quit_defaults_to_zero() {
        let (lua, core) = lua_with_api();
        lua.load("lurch.quit()").exec().unwrap();
        assert_eq!(core.borrow().quit_requested(), Some(0));
    }

    #[test]
    fn test_reentrant_borrow_is_a_lua_error() {
        let (lua, core) = lua_with_api();
        let _held = core.borrow_mut();
        let err = lua.load("lurch.tb_clear()").exec().unwrap_err();
        assert!(err.to_string().contains("engine state is busy"));
    }
}
