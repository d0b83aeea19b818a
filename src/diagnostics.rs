//! Diagnostic report for unrecoverable hook failures.
//!
//! The report is built while the terminal is still in cell mode and
//! written only after it has been restored, so it ends up readable on the
//! user's normal screen (and in the log file).

use std::backtrace::Backtrace;
use std::fmt;
use std::io::{self, Write};

/// One entry of the state dump, tagged like the Lua type it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    /// `[string] 'text'`
    Str(String),
    /// `[number] '1.5'`
    Number(f64),
    /// `[bool] 'true'`
    Bool(bool),
    /// `[nil]`
    Nil,
    /// `[table] #3 <0x...>` and every other reference type.
    Other {
        /// Lua type name.
        type_name: String,
        /// Raw length (0 where it has no meaning).
        len: usize,
        /// Address for telling values apart.
        ptr: usize,
    },
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "[string] '{s}'"),
            Self::Number(n) => write!(f, "[number] '{n}'"),
            Self::Bool(b) => write!(f, "[bool]   '{b}'"),
            Self::Nil => write!(f, "[nil]"),
            Self::Other {
                type_name,
                len,
                ptr,
            } => write!(f, "[{type_name}] #{len} <{ptr:#x}>"),
        }
    }
}

/// Everything known about a fatal hook failure.
#[derive(Debug)]
pub struct FatalReport {
    /// Hook that failed.
    pub hook: &'static str,
    /// Error text from the behavior layer.
    pub message: String,
    /// Invocation arguments followed by the hook table.
    pub state: Vec<StateValue>,
    /// Script-level stack trace, when the runtime provided one.
    pub traceback: Option<String>,
    /// Whether `on_lerror` ran to completion before the report was built.
    pub lerror_notified: bool,
    /// Native stack at the point the failure was observed.
    pub backtrace: Backtrace,
}

impl FatalReport {
    /// Build a report, capturing the native backtrace now.
    pub fn new(
        hook: &'static str,
        message: String,
        state: Vec<StateValue>,
        traceback: Option<String>,
        lerror_notified: bool,
    ) -> Self {
        Self {
            hook,
            message,
            state,
            traceback,
            lerror_notified,
            backtrace: Backtrace::force_capture(),
        }
    }

    /// Write the full report.
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "lua_call error in {}: {}", self.hook, self.message)?;
        writeln!(out)?;

        writeln!(out, "----- STATE DUMP -----")?;
        for (i, value) in self.state.iter().enumerate() {
            writeln!(out, "{:4}: {}", i + 1, value)?;
        }
        writeln!(out, "----- STATE DUMP END -----")?;

        if let Some(traceback) = &self.traceback {
            writeln!(out)?;
            writeln!(out, "traceback: {}", traceback.trim_end())?;
        }
        if !self.lerror_notified {
            writeln!(out)?;
            writeln!(out, "(on_lerror was not run)")?;
        }

        writeln!(out)?;
        writeln!(out, "fatal: unable to recover; exiting")?;
        writeln!(out, "backtrace:")?;
        writeln!(out, "{}", self.backtrace)?;
        Ok(())
    }
}

impl fmt::Display for FatalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecoverable error in {}: {}", self.hook, self.message)
    }
}

/// Split an error message that carries an appended `stack traceback:`
/// section into the message and the traceback.
pub fn split_traceback(text: &str) -> (String, Option<String>) {
    match text.find("stack traceback:") {
        Some(at) => (
            text[..at].trim_end().to_string(),
            Some(text[at..].to_string()),
        ),
        None => (text.to_string(), None),
    }
}
