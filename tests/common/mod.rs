// Shared fixtures for the engine integration tests.
//
// Everything here runs headless: a ratatui TestBackend stands in for the
// terminal and ScriptedInput replays a fixed list of input events.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use lurch::engine::{Core, SharedCore};
use lurch::hooks::{Behavior, Hook, HookArgs, HookFailure};
use lurch::tui::{CellRenderer, HeadlessScreen, InputEvent, InputSource};
use lurch::Config;
use ratatui::backend::TestBackend;

/// Config with timings short enough for tests.
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.tick_interval = Duration::from_millis(20);
    config.idle_threshold = Duration::from_secs(3600);
    config.present_interval = Duration::ZERO;
    config.reconnect_backoff = Duration::from_millis(5);
    config.reconnect_backoff_max = Duration::from_millis(20);
    config.connect_timeout = Duration::from_secs(2);
    config
}

/// A headless core on a `cols` x `rows` test backend.
pub fn headless_core(cols: u16, rows: u16, config: &Config) -> SharedCore<TestBackend> {
    let renderer = CellRenderer::new(TestBackend::new(cols, rows)).unwrap();
    Rc::new(RefCell::new(Core::new(
        renderer,
        Box::new(HeadlessScreen::new()),
        config,
    )))
}

/// Input source that hands out queued events and never blocks.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    events: VecDeque<InputEvent>,
}

impl ScriptedInput {
    pub fn new(events: impl IntoIterator<Item = InputEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn push(&mut self, event: InputEvent) {
        self.events.push_back(event);
    }
}

impl InputSource for ScriptedInput {
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }

    fn has_pending(&mut self) -> io::Result<bool> {
        Ok(!self.events.is_empty())
    }

    fn next_event(&mut self, _timeout: Duration) -> io::Result<Option<InputEvent>> {
        Ok(self.events.pop_front())
    }
}

type Handler = Box<dyn FnMut(Hook, HookArgs<'_>) -> Result<Option<bool>, HookFailure>>;

/// Behavior whose hooks are Rust closures. Every invocation is recorded
/// with its arguments rendered as text.
pub struct FnBehavior {
    defined: HashSet<Hook>,
    handler: Handler,
    pub calls: Rc<RefCell<Vec<(Hook, String)>>>,
}

impl std::fmt::Debug for FnBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnBehavior")
            .field("defined", &self.defined)
            .finish_non_exhaustive()
    }
}

impl FnBehavior {
    pub fn new(
        hooks: &[Hook],
        handler: impl FnMut(Hook, HookArgs<'_>) -> Result<Option<bool>, HookFailure> + 'static,
    ) -> Self {
        Self {
            defined: hooks.iter().copied().collect(),
            handler: Box::new(handler),
            calls: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Hooks invoked so far, in order.
    pub fn hooks_called(&self) -> Vec<Hook> {
        self.calls.borrow().iter().map(|(hook, _)| *hook).collect()
    }

    /// Recorded arguments of every call to `hook`.
    pub fn args_of(&self, hook: Hook) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|(h, _)| *h == hook)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

impl Behavior for FnBehavior {
    fn has_hook(&self, hook: Hook) -> bool {
        self.defined.contains(&hook)
    }

    fn invoke(&mut self, hook: Hook, args: HookArgs<'_>) -> Result<Option<bool>, HookFailure> {
        let rendered = match args {
            HookArgs::None => String::new(),
            HookArgs::Startup(argv) => argv.join(" "),
            HookArgs::Reply(line) => String::from_utf8_lossy(line).into_owned(),
            HookArgs::Disconnect(reason) => reason.to_string(),
            HookArgs::Input(event) => format!("{:?}:{}:{}", event.kind, event.ch, event.key),
            HookArgs::Signal(signal) => signal.to_string(),
        };
        self.calls.borrow_mut().push((hook, rendered));
        (self.handler)(hook, args)
    }
}
