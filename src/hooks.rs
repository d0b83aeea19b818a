//! Hook invocation protocol between the engine and the behavior layer.
//!
//! The behavior layer implements a fixed set of named hooks. The engine
//! never talks to it directly; every call goes through a [`Bridge`], which
//! enforces the failure policy:
//!
//! - missing `init` is refused at construction, other missing hooks are
//!   skipped
//! - a *fault* (the hook reported an error) is handed back to the caller
//!   and the loop carries on
//! - a *panic* (the hook blew up) gets one best-effort `on_lerror`, then
//!   becomes a [`FatalReport`] the loop must act on

use std::fmt;

use crate::diagnostics::{FatalReport, StateValue};
use crate::tui::InputEvent;

/// The hooks a behavior layer can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Startup, receives the command line arguments.
    Init,
    /// One server message.
    OnReply,
    /// The connection went away (also re-asked while reconnect is pending).
    OnDisconnect,
    /// One terminal input event.
    OnInput,
    /// A handleable signal arrived.
    OnSignal,
    /// No server traffic for the idle threshold.
    OnTimeout,
    /// Another hook panicked.
    OnLerror,
}

impl Hook {
    /// Every hook, in table order.
    pub const ALL: [Hook; 7] = [
        Hook::Init,
        Hook::OnReply,
        Hook::OnDisconnect,
        Hook::OnInput,
        Hook::OnSignal,
        Hook::OnTimeout,
        Hook::OnLerror,
    ];

    /// Name of the hook in the script's hook table.
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::OnReply => "on_reply",
            Self::OnDisconnect => "on_disconnect",
            Self::OnInput => "on_input",
            Self::OnSignal => "on_signal",
            Self::OnTimeout => "on_timeout",
            Self::OnLerror => "on_lerror",
        }
    }

    /// Only `init` must exist.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Init)
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Positional arguments of a hook call.
#[derive(Debug, Clone, Copy)]
pub enum HookArgs<'a> {
    /// No arguments.
    None,
    /// `init(args...)`
    Startup(&'a [String]),
    /// `on_reply(message)`
    Reply(&'a [u8]),
    /// `on_disconnect(reason)`
    Disconnect(&'a str),
    /// `on_input(event)`
    Input(&'a InputEvent),
    /// `on_signal(signal)`
    Signal(i32),
}

impl HookArgs<'_> {
    /// The arguments as dump entries, for when the behavior layer cannot
    /// produce its own.
    pub fn describe(&self) -> Vec<StateValue> {
        match self {
            Self::None => Vec::new(),
            Self::Startup(args) => args.iter().map(|a| StateValue::Str(a.clone())).collect(),
            Self::Reply(line) => vec![StateValue::Str(String::from_utf8_lossy(line).into_owned())],
            Self::Disconnect(reason) => vec![StateValue::Str((*reason).to_string())],
            Self::Input(event) => vec![StateValue::Other {
                type_name: "table".to_string(),
                len: 0,
                ptr: std::ptr::from_ref(*event) as usize,
            }],
            Self::Signal(signal) => vec![StateValue::Number(f64::from(*signal))],
        }
    }
}

/// How a hook failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The hook returned an explicit error.
    Fault,
    /// The hook raised; its invariants can no longer be trusted.
    Panic,
}

/// A failed hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    /// Fault or panic.
    pub kind: FailureKind,
    /// Error text.
    pub message: String,
    /// Script stack trace, if any.
    pub traceback: Option<String>,
}

impl HookFailure {
    /// An explicit error return.
    pub fn fault(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fault,
            message: message.into(),
            traceback: None,
        }
    }

    /// A raised error.
    pub fn panic(message: impl Into<String>, traceback: Option<String>) -> Self {
        Self {
            kind: FailureKind::Panic,
            message: message.into(),
            traceback,
        }
    }

    /// Returns true for [`FailureKind::Panic`].
    pub fn is_panic(&self) -> bool {
        self.kind == FailureKind::Panic
    }
}

impl fmt::Display for HookFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Fault => write!(f, "fault: {}", self.message),
            FailureKind::Panic => write!(f, "panic: {}", self.message),
        }
    }
}

impl std::error::Error for HookFailure {}

/// The behavior layer as seen by the bridge.
pub trait Behavior {
    /// Returns true if the hook table provides `hook`.
    fn has_hook(&self, hook: Hook) -> bool;

    /// Call `hook`. `Ok(Some(b))` carries the truthiness of the first
    /// return value, `Ok(None)` means nothing was returned.
    fn invoke(&mut self, hook: Hook, args: HookArgs<'_>) -> Result<Option<bool>, HookFailure>;

    /// Dump of the invocation arguments and the hook table.
    fn dump_state(&self, args: HookArgs<'_>) -> Vec<StateValue> {
        args.describe()
    }
}

/// Result of a non-fatal dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The hook ran; its boolean result if it returned one.
    Returned(Option<bool>),
    /// The hook is not provided.
    Skipped,
    /// The hook reported an error.
    Faulted(HookFailure),
}

impl Dispatch {
    /// The boolean result, if the hook returned one.
    pub fn flag(&self) -> Option<bool> {
        match self {
            Self::Returned(flag) => *flag,
            Self::Skipped | Self::Faulted(_) => None,
        }
    }
}

/// Startup problems with the hook table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// A required hook is missing.
    MissingHook(Hook),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHook(hook) => write!(f, "required hook '{hook}' is not defined"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Applies the failure policy around a [`Behavior`].
#[derive(Debug)]
pub struct Bridge<H> {
    behavior: H,
    lerror_attempted: bool,
}

impl<H: Behavior> Bridge<H> {
    /// Check that every required hook exists.
    pub fn new(behavior: H) -> Result<Self, BridgeError> {
        if let Some(missing) = Hook::ALL
            .into_iter()
            .find(|hook| hook.is_required() && !behavior.has_hook(*hook))
        {
            return Err(BridgeError::MissingHook(missing));
        }
        Ok(Self {
            behavior,
            lerror_attempted: false,
        })
    }

    /// The wrapped behavior.
    pub fn behavior(&self) -> &H {
        &self.behavior
    }

    /// Invoke `hook`.
    ///
    /// # Errors
    ///
    /// A panicking hook yields the [`FatalReport`]; the caller must stop
    /// the loop and run the exit path.
    pub fn invoke(&mut self, hook: Hook, args: HookArgs<'_>) -> Result<Dispatch, Box<FatalReport>> {
        if !self.behavior.has_hook(hook) {
            return Ok(Dispatch::Skipped);
        }

        match self.behavior.invoke(hook, args) {
            Ok(flag) => Ok(Dispatch::Returned(flag)),
            Err(failure) if !failure.is_panic() => {
                log::warn!("Hook {} failed: {}", hook, failure.message);
                Ok(Dispatch::Faulted(failure))
            }
            Err(failure) => {
                log::error!("Hook {} panicked: {}", hook, failure.message);
                let notified = hook != Hook::OnLerror && self.notify_lerror();
                let state = self.behavior.dump_state(args);
                Err(Box::new(FatalReport::new(
                    hook.name(),
                    failure.message,
                    state,
                    failure.traceback,
                    notified,
                )))
            }
        }
    }

    /// Give the behavior layer one chance to react to a panic. Failures
    /// here are logged and otherwise ignored.
    fn notify_lerror(&mut self) -> bool {
        if self.lerror_attempted || !self.behavior.has_hook(Hook::OnLerror) {
            return false;
        }
        self.lerror_attempted = true;

        match self.behavior.invoke(Hook::OnLerror, HookArgs::None) {
            Ok(_) => true,
            Err(failure) => {
                log::warn!("on_lerror failed, ignoring: {}", failure.message);
                false
            }
        }
    }
}
