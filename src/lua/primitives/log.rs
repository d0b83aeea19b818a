//! Logging primitive for Lua scripts.
//!
//! Exposes the `log` crate to scripts through a global `log` table:
//!
//! ```lua
//! log.info("connected to " .. host)
//! log.warn("nick in use, retrying")
//! log.error("cannot parse reply: " .. line)
//! log.debug("<< " .. line)
//! ```
//!
//! Messages use the target `lua`, so `RUST_LOG=lua=debug` shows script
//! output without the engine's own debug noise. Since the terminal belongs
//! to the cell grid, this is the only safe way for a script to print.

use anyhow::{anyhow, Result};
use log::Level;
use mlua::{Lua, Value};

/// Register the global `log` table.
pub fn register(lua: &Lua) -> Result<()> {
    let log_table = lua
        .create_table()
        .map_err(|e| anyhow!("Failed to create log table: {e}"))?;

    for (name, level) in [
        ("error", Level::Error),
        ("warn", Level::Warn),
        ("info", Level::Info),
        ("debug", Level::Debug),
    ] {
        let function = lua
            .create_function(move |lua, msg: Value| {
                let text = match lua.coerce_string(msg)? {
                    Some(s) => s.to_string_lossy(),
                    None => "nil".to_string(),
                };
                log::log!(target: "lua", level, "{}", text);
                Ok(())
            })
            .map_err(|e| anyhow!("Failed to create log.{name} function: {e}"))?;
        log_table
            .set(name, function)
            .map_err(|e| anyhow!("Failed to set log.{name}: {e}"))?;
    }

    lua.globals()
        .set("log", log_table)
        .map_err(|e| anyhow!("Failed to register log table globally: {e}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::{Function, Table};

    #[test]
    fn test_log_table_created() {
        let lua = Lua::new();
        register(&lua).expect("Should register log primitives");

        let log_table: Table = lua.globals().get("log").expect("log table should exist");
        for name in ["info", "warn", "error", "debug"] {
            let _: Function = log_table.get(name).expect("log function should exist");
        }
    }

    #[test]
    fn test_log_accepts_non_strings() {
        let lua = Lua::new();
        register(&lua).expect("Should register log primitives");

        lua.load(r#"log.info("text"); log.warn(42); log.debug(nil); log.error(1.5)"#)
            .exec()
            .expect("log functions should coerce their argument");
    }
}
