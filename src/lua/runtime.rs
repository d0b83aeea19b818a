//! Lua runtime management.
//!
//! Provides [`LuaBehavior`], which owns the Lua interpreter, loads the
//! runtime's `init.lua` and implements [`Behavior`] on top of the hook
//! table that script returns.

use std::fmt;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use mlua::{Function, Lua, LuaSerdeExt, MultiValue, Table, Value};
use ratatui::backend::Backend;

use super::primitives;
use crate::config::Config;
use crate::diagnostics::{split_traceback, StateValue};
use crate::engine::SharedCore;
use crate::hooks::{Behavior, Hook, HookArgs, HookFailure};

/// Global holding the directory of the running executable.
pub const EXEDIR_GLOBAL: &str = "__LURCH_EXEDIR";

/// Global the hook table is stored under.
pub const RT_GLOBAL: &str = "rt";

/// The hook table, resolved once after `init.lua` has run.
#[derive(Debug, Default)]
struct HookTable {
    init: Option<Function>,
    on_reply: Option<Function>,
    on_disconnect: Option<Function>,
    on_input: Option<Function>,
    on_signal: Option<Function>,
    on_timeout: Option<Function>,
    on_lerror: Option<Function>,
}

impl HookTable {
    /// Pick the hook functions out of `table`. Absent entries are fine,
    /// anything that is not a function is not.
    fn resolve(table: &Table) -> Result<Self> {
        let mut hooks = Self::default();
        for hook in Hook::ALL {
            let value: Value = table
                .get(hook.name())
                .map_err(|e| anyhow!("Failed to read hook '{hook}': {e}"))?;
            let function = match value {
                Value::Nil => None,
                Value::Function(f) => Some(f),
                other => bail!("hook '{hook}' must be a function, got {}", other.type_name()),
            };
            *hooks.slot(hook) = function;
        }
        Ok(hooks)
    }

    fn slot(&mut self, hook: Hook) -> &mut Option<Function> {
        match hook {
            Hook::Init => &mut self.init,
            Hook::OnReply => &mut self.on_reply,
            Hook::OnDisconnect => &mut self.on_disconnect,
            Hook::OnInput => &mut self.on_input,
            Hook::OnSignal => &mut self.on_signal,
            Hook::OnTimeout => &mut self.on_timeout,
            Hook::OnLerror => &mut self.on_lerror,
        }
    }

    fn get(&self, hook: Hook) -> Option<&Function> {
        match hook {
            Hook::Init => self.init.as_ref(),
            Hook::OnReply => self.on_reply.as_ref(),
            Hook::OnDisconnect => self.on_disconnect.as_ref(),
            Hook::OnInput => self.on_input.as_ref(),
            Hook::OnSignal => self.on_signal.as_ref(),
            Hook::OnTimeout => self.on_timeout.as_ref(),
            Hook::OnLerror => self.on_lerror.as_ref(),
        }
    }
}

/// The Lua behavior layer.
///
/// The Lua state is not `Send`; the behavior lives on the loop thread
/// together with the engine core its primitives borrow.
pub struct LuaBehavior {
    lua: Lua,
    hooks: HookTable,
}

impl fmt::Debug for LuaBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let defined: Vec<&str> = Hook::ALL
            .into_iter()
            .filter(|hook| self.hooks.get(*hook).is_some())
            .map(Hook::name)
            .collect();
        f.debug_struct("LuaBehavior")
            .field("hooks", &defined)
            .finish_non_exhaustive()
    }
}

impl LuaBehavior {
    /// Create the interpreter, register the engine API and run
    /// `<rt_dir>/init.lua`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - primitive registration fails
    /// - `init.lua` cannot be read, does not compile or raises
    /// - it does not return a table, or a hook entry is not a function
    pub fn load<B>(config: &Config, core: &SharedCore<B>) -> Result<Self>
    where
        B: Backend + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let lua = Lua::new();

        lua.globals()
            .set(EXEDIR_GLOBAL, config.exe_dir.to_string_lossy().into_owned())
            .map_err(|e| anyhow!("Failed to set {EXEDIR_GLOBAL}: {e}"))?;
        Self::setup_package_path(&lua, &config.rt_dir, &config.conf_dir)?;
        primitives::register_all(&lua, core).context("Failed to register Lua primitives")?;

        let init_path = config.rt_dir.join("init.lua");
        let table = Self::run_init_file(&lua, &init_path)?;
        let hooks = HookTable::resolve(&table)
            .with_context(|| format!("Invalid hook table in {}", init_path.display()))?;
        lua.globals()
            .set(RT_GLOBAL, table)
            .map_err(|e| anyhow!("Failed to set {RT_GLOBAL}: {e}"))?;

        log::debug!("Loaded behavior layer from {}", init_path.display());
        Ok(Self { lua, hooks })
    }

    /// Prepend the runtime and config directories to `package.path`, so
    /// `require("irc")` finds `<rt>/irc.lua` and user overrides in `<conf>`
    /// win over both.
    fn setup_package_path(lua: &Lua, rt_dir: &Path, conf_dir: &Path) -> Result<()> {
        let package: Table = lua
            .globals()
            .get("package")
            .map_err(|e| anyhow!("Failed to get package table: {e}"))?;

        let current_path: String = package
            .get("path")
            .map_err(|e| anyhow!("Failed to get package.path: {e}"))?;

        let new_path = format!(
            "{conf}/?.lua;{rt}/?.lua;{rt}/?/init.lua;{current}",
            conf = conf_dir.display(),
            rt = rt_dir.display(),
            current = current_path
        );

        package
            .set("path", new_path)
            .map_err(|e| anyhow!("Failed to set package.path: {e}"))?;
        Ok(())
    }

    fn run_init_file(lua: &Lua, path: &Path) -> Result<Table> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read Lua file: {}", path.display()))?;

        let value: Value = lua
            .load(&source)
            .set_name(format!("@{}", path.display()))
            .eval()
            .map_err(|e| anyhow!("Failed to execute Lua file {}: {}", path.display(), e))?;

        match value {
            Value::Table(table) => Ok(table),
            other => bail!(
                "{} must return the hook table, got {}",
                path.display(),
                other.type_name()
            ),
        }
    }

    /// The underlying Lua state.
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    fn lua_args(&self, args: HookArgs<'_>) -> mlua::Result<MultiValue> {
        let lua = &self.lua;
        let value = match args {
            HookArgs::None => return Ok(MultiValue::new()),
            HookArgs::Startup(argv) => {
                return argv
                    .iter()
                    .map(|arg| lua.create_string(arg).map(Value::String))
                    .collect();
            }
            HookArgs::Reply(line) => Value::String(lua.create_string(line)?),
            HookArgs::Disconnect(reason) => Value::String(lua.create_string(reason)?),
            HookArgs::Input(event) => lua.to_value(event)?,
            HookArgs::Signal(signal) => Value::Integer(signal.into()),
        };
        Ok(MultiValue::from_iter([value]))
    }
}

impl Behavior for LuaBehavior {
    fn has_hook(&self, hook: Hook) -> bool {
        self.hooks.get(hook).is_some()
    }

    fn invoke(&mut self, hook: Hook, args: HookArgs<'_>) -> Result<Option<bool>, HookFailure> {
        let Some(function) = self.hooks.get(hook) else {
            return Ok(None);
        };
        let lua_args = self
            .lua_args(args)
            .map_err(|e| HookFailure::fault(format!("cannot convert arguments: {e}")))?;

        match function.call::<MultiValue>(lua_args) {
            Ok(values) => interpret_results(values),
            Err(e) => Err(raised(e)),
        }
    }

    fn dump_state(&self, args: HookArgs<'_>) -> Vec<StateValue> {
        let mut state = match self.lua_args(args) {
            Ok(values) => values.iter().map(state_value).collect(),
            Err(_) => args.describe(),
        };
        for hook in Hook::ALL {
            let value = self
                .hooks
                .get(hook)
                .map_or(Value::Nil, |f| Value::Function(f.clone()));
            state.push(state_value(&value));
        }
        state
    }
}

/// Apply the hook return convention: `nil, "message"` is a fault, otherwise
/// the first value's truthiness is the result. Nothing (or a lone `nil`)
/// carries no result.
fn interpret_results(values: MultiValue) -> Result<Option<bool>, HookFailure> {
    let mut values = values.into_iter();
    match (values.next(), values.next()) {
        (None, _) | (Some(Value::Nil), None) => Ok(None),
        (Some(Value::Nil), Some(Value::String(message))) => {
            Err(HookFailure::fault(message.to_string_lossy()))
        }
        (Some(Value::Nil | Value::Boolean(false)), _) => Ok(Some(false)),
        (Some(_), _) => Ok(Some(true)),
    }
}

/// A raised Lua error as a panic failure, with the traceback split off.
fn raised(err: mlua::Error) -> HookFailure {
    match err {
        mlua::Error::CallbackError { traceback, cause } => {
            let (message, _) = split_traceback(&cause.to_string());
            HookFailure::panic(message, Some(traceback))
        }
        other => {
            let (message, traceback) = split_traceback(&other.to_string());
            HookFailure::panic(message, traceback)
        }
    }
}

fn state_value(value: &Value) -> StateValue {
    match value {
        Value::Nil => StateValue::Nil,
        Value::Boolean(b) => StateValue::Bool(*b),
        Value::Integer(i) => StateValue::Number(*i as f64),
        Value::Number(n) => StateValue::Number(*n),
        Value::String(s) => StateValue::Str(s.to_string_lossy()),
        other => StateValue::Other {
            type_name: other.type_name().to_string(),
            len: match other {
                Value::Table(t) => t.raw_len(),
                _ => 0,
            },
            ptr: other.to_pointer() as usize,
        },
    }
}
