//! Terminal primitives: cell mode and the cell grid.
//!
//! # Usage in Lua
//!
//! ```lua
//! assert(lurch.tb_init())
//! local rows, cols = lurch.tb_size()
//! lurch.tb_writeline(rows - 1, "\x1b1\x1b2\x0bstatus\x1br ok")
//! lurch.tb_showcursor(4, rows - 1)
//! lurch.tb_present()
//! ```
//!
//! Rows and columns are zero-based. Writes outside the grid are ignored.
//! `tb_present` is throttled; a skipped present is picked up by the loop.

use std::rc::Rc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use mlua::{IntoLuaMulti, Lua, MultiValue, Table};
use ratatui::backend::Backend;

use super::{failure, with_core};
use crate::engine::SharedCore;

/// Register the `tb_*` functions.
pub fn register<B>(lua: &Lua, api: &Table, core: &SharedCore<B>) -> Result<()>
where
    B: Backend + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    // tb_init() -> true | nil, err
    let shared = Rc::clone(core);
    let init_fn = lua
        .create_function(move |lua, ()| -> mlua::Result<MultiValue> {
            match with_core(&shared, |core| core.screen_enter())? {
                Ok(()) => true.into_lua_multi(lua),
                Err(e) => failure(lua, format!("cannot initialize terminal: {e:#}")),
            }
        })
        .map_err(|e| anyhow!("Failed to create tb_init function: {e}"))?;
    api.set("tb_init", init_fn)
        .map_err(|e| anyhow!("Failed to set tb_init: {e}"))?;

    let shared = Rc::clone(core);
    let shutdown_fn = lua
        .create_function(move |_, ()| with_core(&shared, |core| core.screen_leave()))
        .map_err(|e| anyhow!("Failed to create tb_shutdown function: {e}"))?;
    api.set("tb_shutdown", shutdown_fn)
        .map_err(|e| anyhow!("Failed to set tb_shutdown: {e}"))?;

    // tb_size() -> rows, cols
    let shared = Rc::clone(core);
    let size_fn = lua
        .create_function(move |_, ()| with_core(&shared, |core| core.renderer().size()))
        .map_err(|e| anyhow!("Failed to create tb_size function: {e}"))?;
    api.set("tb_size", size_fn)
        .map_err(|e| anyhow!("Failed to set tb_size: {e}"))?;

    let shared = Rc::clone(core);
    let clear_fn = lua
        .create_function(move |_, ()| with_core(&shared, |core| core.renderer_mut().clear()))
        .map_err(|e| anyhow!("Failed to create tb_clear function: {e}"))?;
    api.set("tb_clear", clear_fn)
        .map_err(|e| anyhow!("Failed to set tb_clear: {e}"))?;

    // tb_present() -> nothing | nil, err
    let shared = Rc::clone(core);
    let present_fn = lua
        .create_function(move |lua, ()| -> mlua::Result<MultiValue> {
            match with_core(&shared, |core| core.present_if_due(Instant::now()))? {
                Ok(_) => Ok(MultiValue::new()),
                Err(e) => failure(lua, format!("cannot present: {e:#}")),
            }
        })
        .map_err(|e| anyhow!("Failed to create tb_present function: {e}"))?;
    api.set("tb_present", present_fn)
        .map_err(|e| anyhow!("Failed to set tb_present: {e}"))?;

    // tb_writeline(row, text)
    let shared = Rc::clone(core);
    let writeline_fn = lua
        .create_function(move |_, (row, text): (i64, mlua::String)| {
            let bytes = text.as_bytes();
            with_core(&shared, |core| core.renderer_mut().write_line(row, &bytes))
        })
        .map_err(|e| anyhow!("Failed to create tb_writeline function: {e}"))?;
    api.set("tb_writeline", writeline_fn)
        .map_err(|e| anyhow!("Failed to set tb_writeline: {e}"))?;

    let shared = Rc::clone(core);
    let clearline_fn = lua
        .create_function(move |_, row: i64| {
            with_core(&shared, |core| core.renderer_mut().clear_line(row))
        })
        .map_err(|e| anyhow!("Failed to create tb_clearline function: {e}"))?;
    api.set("tb_clearline", clearline_fn)
        .map_err(|e| anyhow!("Failed to set tb_clearline: {e}"))?;

    let shared = Rc::clone(core);
    let hide_fn = lua
        .create_function(move |_, ()| with_core(&shared, |core| core.renderer_mut().hide_cursor()))
        .map_err(|e| anyhow!("Failed to create tb_hidecursor function: {e}"))?;
    api.set("tb_hidecursor", hide_fn)
        .map_err(|e| anyhow!("Failed to set tb_hidecursor: {e}"))?;

    // tb_showcursor(x, y); negative coordinates hide it
    let shared = Rc::clone(core);
    let show_fn = lua
        .create_function(move |_, (x, y): (i64, i64)| {
            with_core(&shared, |core| core.renderer_mut().show_cursor(x, y))
        })
        .map_err(|e| anyhow!("Failed to create tb_showcursor function: {e}"))?;
    api.set("tb_showcursor", show_fn)
        .map_err(|e| anyhow!("Failed to set tb_showcursor: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::lua_with_api;

    #[test]
    fn test_size_reports_rows_then_cols() {
        let (lua, _core) = lua_with_api();
        let (rows, cols): (u16, u16) = lua.load("return lurch.tb_size()").eval().unwrap();
        assert_eq!((rows, cols), (4, 20));
    }

    #[test]
    fn test_writeline_fills_grid_row() {
        let (lua, core) = lua_with_api();
        lua.load(r#"lurch.tb_writeline(1, "hello\x1b1!")"#).exec().unwrap();

        let core = core.borrow();
        let grid = core.renderer().grid();
        assert!(grid.row_text(1).starts_with("hello!"));
        assert!(grid.get(5, 1).unwrap().fg.bold);
        assert!(core.renderer().is_dirty());
    }

    #[test]
    fn test_out_of_range_rows_are_ignored() {
        let (lua, core) = lua_with_api();
        lua.load(r#"lurch.tb_writeline(-1, "x"); lurch.tb_writeline(99, "y"); lurch.tb_clearline(42)"#)
            .exec()
            .unwrap();
        let core = core.borrow();
        for row in 0..4 {
            assert_eq!(core.renderer().grid().row_text(row).trim(), "");
        }
    }

    #[test]
    fn test_clearline_and_clear() {
        let (lua, core) = lua_with_api();
        lua.load(
            r#"
            lurch.tb_writeline(0, "top")
            lurch.tb_writeline(2, "middle")
            lurch.tb_clearline(0)
            "#,
        )
        .exec()
        .unwrap();
        assert_eq!(core.borrow().renderer().grid().row_text(0).trim(), "");
        assert!(core.borrow().renderer().grid().row_text(2).starts_with("middle"));

        lua.load("lurch.tb_clear()").exec().unwrap();
        assert_eq!(core.borrow().renderer().grid().row_text(2).trim(), "");
    }

    #[test]
    fn test_cursor_show_and_hide() {
        let (lua, core) = lua_with_api();
        lua.load("lurch.tb_showcursor(3, 2)").exec().unwrap();
        assert_eq!(core.borrow().renderer().cursor(), Some((3, 2)));

        lua.load("lurch.tb_hidecursor()").exec().unwrap();
        assert_eq!(core.borrow().renderer().cursor(), None);

        lua.load("lurch.tb_showcursor(-1, -1)").exec().unwrap();
        assert_eq!(core.borrow().renderer().cursor(), None);
    }

    #[test]
    fn test_init_present_shutdown() {
        let (lua, core) = lua_with_api();
        let ok: bool = lua.load("return lurch.tb_init()").eval().unwrap();
        assert!(ok);
        assert!(core.borrow().screen_active());

        lua.load(
            r#"
            lurch.tb_writeline(0, "ready")
            local r = table.pack(lurch.tb_present())
            assert(r.n == 0)
            "#,
        )
        .exec()
        .unwrap();
        assert_eq!(core.borrow().renderer().present_count(), 1);
        assert!(!core.borrow().renderer().is_dirty());

        lua.load("lurch.tb_shutdown()").exec().unwrap();
        assert!(!core.borrow().screen_active());
    }

    #[test]
    fn test_present_without_cell_mode_is_a_no_op() {
        let (lua, core) = lua_with_api();
        lua.load(r#"lurch.tb_writeline(0, "x"); lurch.tb_present()"#)
            .exec()
            .unwrap();
        assert_eq!(core.borrow().renderer().present_count(), 0);
        assert!(core.borrow().renderer().is_dirty());
    }
}
