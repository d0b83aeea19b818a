//! Server connection primitives.
//!
//! # Usage in Lua
//!
//! ```lua
//! local ok, err = lurch.conn_init("irc.libera.chat", "6697", true)
//! if not ok then
//!     log.error(err)          -- "cannot connect to host: ..."
//! end
//!
//! local _, err = lurch.conn_send("NICK lurch")   -- CRLF is appended
//! lurch.conn_close()          -- no on_disconnect for an explicit close
//! ```
//!
//! `conn_init` replaces any existing connection. Lines already buffered
//! for the old connection are discarded.

use std::rc::Rc;

use anyhow::{anyhow, Result};
use mlua::{IntoLuaMulti, Lua, MultiValue, Table};
use ratatui::backend::Backend;

use super::{failure, with_core};
use crate::engine::SharedCore;
use crate::transport::{TransportError, TransportMode};

/// Register `conn_init`, `conn_fd`, `conn_send` and `conn_close`.
pub fn register<B>(lua: &Lua, api: &Table, core: &SharedCore<B>) -> Result<()>
where
    B: Backend + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    // conn_init(host, service[, tls]) -> 1 | nil, err
    let shared = Rc::clone(core);
    let init_fn = lua
        .create_function(
            move |lua, (host, service, tls): (String, String, Option<bool>)| -> mlua::Result<MultiValue> {
                let mode = if tls.unwrap_or(false) {
                    TransportMode::Secure
                } else {
                    TransportMode::Plain
                };
                match with_core(&shared, |core| core.connect(&host, &service, mode))? {
                    Ok(()) => 1.into_lua_multi(lua),
                    Err(e) => {
                        log::warn!("conn_init {}:{} failed: {}", host, service, e);
                        failure(lua, e)
                    }
                }
            },
        )
        .map_err(|e| anyhow!("Failed to create conn_init function: {e}"))?;
    api.set("conn_init", init_fn)
        .map_err(|e| anyhow!("Failed to set conn_init: {e}"))?;

    // conn_fd() -> fd | nil
    let shared = Rc::clone(core);
    let fd_fn = lua
        .create_function(move |_, ()| with_core(&shared, |core| core.conn_fd()))
        .map_err(|e| anyhow!("Failed to create conn_fd function: {e}"))?;
    api.set("conn_fd", fd_fn)
        .map_err(|e| anyhow!("Failed to set conn_fd: {e}"))?;

    // conn_send(text) -> nothing | nil, err
    let shared = Rc::clone(core);
    let send_fn = lua
        .create_function(move |lua, text: mlua::String| -> mlua::Result<MultiValue> {
            let bytes = text.as_bytes();
            match with_core(&shared, |core| core.send_line(&bytes))? {
                Ok(()) => Ok(MultiValue::new()),
                Err(e) => failure(lua, send_error_text(&e)),
            }
        })
        .map_err(|e| anyhow!("Failed to create conn_send function: {e}"))?;
    api.set("conn_send", send_fn)
        .map_err(|e| anyhow!("Failed to set conn_send: {e}"))?;

    // conn_close()
    let shared = Rc::clone(core);
    let close_fn = lua
        .create_function(move |_, ()| with_core(&shared, |core| core.drop_connection()))
        .map_err(|e| anyhow!("Failed to create conn_close function: {e}"))?;
    api.set("conn_close", close_fn)
        .map_err(|e| anyhow!("Failed to set conn_close: {e}"))?;

    Ok(())
}

/// Error text for a failed send, prefixed the way scripts match on it.
fn send_error_text(err: &TransportError) -> String {
    match err {
        TransportError::Io(e) => format!("cannot send: {e}"),
        TransportError::Tls(e) => format!("cannot send: {e}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::lua_with_api;
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    #[test]
    fn test_send_without_connection_returns_error() {
        let (lua, _core) = lua_with_api();
        let (ok, err): (Option<bool>, String) =
            lua.load(r#"return lurch.conn_send("PING")"#).eval().unwrap();
        assert_eq!(ok, None);
        assert_eq!(err, "not connected");
    }

    #[test]
    fn test_conn_fd_nil_when_disconnected() {
        let (lua, _core) = lua_with_api();
        let fd: Option<i64> = lua.load("return lurch.conn_fd()").eval().unwrap();
        assert_eq!(fd, None);
    }

    #[test]
    fn test_conn_init_failure_is_a_value() {
        let (lua, _core) = lua_with_api();
        let (ok, err): (Option<i64>, String) = lua
            .load(r#"return lurch.conn_init("127.0.0.1", "no-such-service-name")"#)
            .eval()
            .unwrap();
        assert_eq!(ok, None);
        assert!(err.starts_with("cannot resolve hostname"), "got {err}");
    }

    #[test]
    fn test_connect_send_close_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let (lua, core) = lua_with_api();
        let script = format!(
            r#"
            local ok, err = lurch.conn_init("127.0.0.1", {port})
            assert(ok == 1, err)
            assert(type(lurch.conn_fd()) == "number")
            local r = table.pack(lurch.conn_send("NICK lurch"))
            assert(r.n == 0)
            "#
        );
        lua.load(&script).exec().unwrap();

        let (peer, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(peer).read_line(&mut line).unwrap();
        assert_eq!(line, "NICK lurch\r\n");

        lua.load("lurch.conn_close()").exec().unwrap();
        assert!(!core.borrow().is_connected());
    }

    #[test]
    fn test_send_error_prefixes() {
        let io = TransportError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(send_error_text(&io).starts_with("cannot send: "));
        let short = TransportError::ShortSend { sent: 1, expected: 6 };
        assert!(send_error_text(&short).starts_with("sent != len(data): "));
    }
}
