//! The event loop.
//!
//! # States
//!
//! ```text
//!              init() → true / connected
//! CONNECTING ────────────────────────────→ RUNNING ←──────────┐
//!     │ init() → false / not connected       │ EOF, error,     │ on_disconnect()
//!     └──────────────────────────→ RECONNECT_PENDING ←─────────┘  → true
//!                                            │      overflow
//!             quit() / fatal hook panic      ↓
//!                                        SHUTDOWN
//! ```
//!
//! Each [`Engine::tick`] performs one readiness wait over the terminal, the
//! transport (only while `RUNNING` with a connection) and the signal pipe,
//! then dispatches what became ready:
//!
//! 1. pending signals → `on_signal`
//! 2. transport data → framer → `on_reply` per line; a dead connection
//!    → `on_disconnect` right away
//! 3. terminal input, drained → `on_input` per event
//! 4. a quiet tick past the idle threshold → `on_timeout`
//!
//! and finally flushes the grid if it is dirty and the present interval has
//! passed. While `RECONNECT_PENDING`, `on_disconnect` is asked again each
//! tick once the backoff delay has elapsed.

pub mod backoff;
pub mod poll;
pub mod shared;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use ratatui::backend::Backend;

use crate::config::Config;
use crate::constants::INPUT_PEEK_TIMEOUT;
use crate::diagnostics::FatalReport;
use crate::hooks::{Behavior, Bridge, Dispatch, Hook, HookArgs, HookFailure};
use crate::signals::{signal_name, SignalRouter};
use crate::tui::InputSource;

pub use self::backoff::Backoff;
pub use self::poll::{PollSet, Readiness};
pub use self::shared::{Core, Pump};

/// Core shared between the loop and the script API.
pub type SharedCore<B> = Rc<RefCell<Core<B>>>;

/// Loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Before `init` has returned.
    Connecting,
    /// Normal multiplexing.
    Running,
    /// The connection is gone; waiting for `on_disconnect` to say otherwise.
    ReconnectPending,
    /// The loop has exited.
    Shutdown,
}

/// Reasons the loop cannot continue. All of them exit with status 1.
#[derive(Debug)]
pub enum EngineError {
    /// The behavior layer could not be loaded.
    Startup(anyhow::Error),
    /// `init` reported an error.
    InitFailed(HookFailure),
    /// A hook panicked.
    Fatal(Box<FatalReport>),
    /// The terminal or the readiness wait failed.
    Io(anyhow::Error),
}

impl EngineError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup(e) => write!(f, "startup failed: {e:#}"),
            Self::InitFailed(failure) => write!(f, "init failed: {}", failure.message),
            Self::Fatal(report) => write!(f, "{report}"),
            Self::Io(e) => write!(f, "engine I/O error: {e:#}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// The event loop, generic over the behavior, the display backend and the
/// input source so tests can drive it headless.
#[derive(Debug)]
pub struct Engine<H, B: Backend, I> {
    bridge: Bridge<H>,
    core: SharedCore<B>,
    input: I,
    signals: Option<SignalRouter>,
    state: EngineState,
    tick_interval: Duration,
    idle_threshold: Duration,
    backoff: Backoff,
    last_traffic: Instant,
    quiet_since: Instant,
    disconnect_reason: String,
}

impl<H, B, I> Engine<H, B, I>
where
    H: Behavior,
    B: Backend,
    B::Error: std::error::Error + Send + Sync + 'static,
    I: InputSource,
{
    /// Assemble a loop. `signals` is optional so tests can run without
    /// installing process-wide handlers.
    pub fn new(
        bridge: Bridge<H>,
        core: SharedCore<B>,
        input: I,
        signals: Option<SignalRouter>,
        config: &Config,
    ) -> Self {
        let now = Instant::now();
        Self {
            bridge,
            core,
            input,
            signals,
            state: EngineState::Connecting,
            tick_interval: config.tick_interval,
            idle_threshold: config.idle_threshold,
            backoff: Backoff::new(config.reconnect_backoff, config.reconnect_backoff_max),
            last_traffic: now,
            quiet_since: now,
            disconnect_reason: String::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The shared core.
    pub fn core(&self) -> &SharedCore<B> {
        &self.core
    }

    /// The hook bridge.
    pub fn bridge(&self) -> &Bridge<H> {
        &self.bridge
    }

    /// Run `init` and seed the loop state from its result.
    ///
    /// `true` starts the loop running, `false` starts it with a reconnect
    /// pending. With no result the state follows whether `init` left a
    /// connection behind.
    pub fn start(&mut self, args: &[String]) -> Result<(), EngineError> {
        self.state = EngineState::Connecting;
        let outcome = self.dispatch(Hook::Init, HookArgs::Startup(args))?;
        if let Dispatch::Faulted(failure) = outcome {
            return Err(EngineError::InitFailed(failure));
        }

        let connected = self.core.borrow().is_connected();
        let now = Instant::now();
        self.last_traffic = now;
        self.quiet_since = now;

        if outcome.flag().unwrap_or(connected) {
            self.state = EngineState::Running;
        } else {
            self.disconnect_reason = "not connected".to_string();
            self.backoff.reset();
            self.state = EngineState::ReconnectPending;
        }
        log::info!("Engine started ({:?})", self.state);
        Ok(())
    }

    /// Run until `quit` or a fatal error, then shut down.
    pub fn run(&mut self, args: &[String]) -> Result<i32, EngineError> {
        let result = self.run_loop(args);
        self.shutdown();
        result
    }

    fn run_loop(&mut self, args: &[String]) -> Result<i32, EngineError> {
        self.start(args)?;
        loop {
            if let Some(code) = self.tick()? {
                return Ok(code);
            }
        }
    }

    /// One loop iteration. Returns the exit status once `quit` was
    /// requested.
    pub fn tick(&mut self) -> Result<Option<i32>, EngineError> {
        if let Some(code) = self.quit_requested() {
            return Ok(Some(code));
        }

        let now = Instant::now();
        if self.state == EngineState::ReconnectPending && self.backoff.is_due(now) {
            self.ask_reconnect(now)?;
            if let Some(code) = self.quit_requested() {
                return Ok(Some(code));
            }
        }

        let ready = poll::wait(self.poll_set(), self.wait_timeout(now))
            .map_err(|e| EngineError::Io(anyhow!("Readiness wait failed: {e}")))?;
        let mut active = !ready.is_idle();

        if ready.signal {
            self.dispatch_signals()?;
        }
        if ready.writable && self.quit_requested().is_none() {
            self.flush_transport()?;
        }
        if ready.transport && self.quit_requested().is_none() {
            self.service_transport()?;
        }
        if self.quit_requested().is_none() && (ready.input || self.input_pending()?) {
            active = true;
            self.drain_input()?;
        }

        let now = Instant::now();
        if active {
            self.quiet_since = now;
        } else if now.saturating_duration_since(self.quiet_since) >= self.tick_interval {
            self.quiet_since = now;
            if now.saturating_duration_since(self.last_traffic) >= self.idle_threshold {
                self.dispatch(Hook::OnTimeout, HookArgs::None)?;
            }
        }

        self.core
            .borrow_mut()
            .present_if_due(Instant::now())
            .map_err(EngineError::Io)?;

        Ok(self.quit_requested())
    }

    /// Close the connection and restore the terminal.
    pub fn shutdown(&mut self) {
        self.core.borrow_mut().shutdown();
        self.state = EngineState::Shutdown;
        log::info!("Engine shut down");
    }

    fn quit_requested(&self) -> Option<i32> {
        self.core.borrow().quit_requested()
    }

    fn dispatch(&mut self, hook: Hook, args: HookArgs<'_>) -> Result<Dispatch, EngineError> {
        self.bridge.invoke(hook, args).map_err(EngineError::Fatal)
    }

    fn poll_set(&self) -> PollSet {
        let core = self.core.borrow();
        let transport = if self.state == EngineState::Running {
            core.conn_fd()
        } else {
            None
        };
        PollSet {
            input: self.input.raw_fd(),
            transport,
            signal: self.signals.as_ref().map(SignalRouter::raw_fd),
            transport_write: transport.is_some() && core.transport_wants_write(),
        }
    }

    fn wait_timeout(&self, now: Instant) -> Duration {
        let mut timeout = self
            .tick_interval
            .saturating_sub(now.saturating_duration_since(self.quiet_since));
        if let Some(present) = self.core.borrow().present_wait(now) {
            timeout = timeout.min(present);
        }
        if self.state == EngineState::ReconnectPending {
            if let Some(backoff) = self.backoff.remaining(now) {
                timeout = timeout.min(backoff);
            }
        }
        timeout
    }

    fn input_pending(&mut self) -> Result<bool, EngineError> {
        self.input
            .has_pending()
            .map_err(|e| EngineError::Io(anyhow!("Failed to poll terminal input: {e}")))
    }

    fn dispatch_signals(&mut self) -> Result<(), EngineError> {
        let pending = self
            .signals
            .as_mut()
            .map(SignalRouter::take_pending)
            .unwrap_or_default();
        for signal in pending {
            log::debug!("Dispatching {}", signal_name(signal));
            self.dispatch(Hook::OnSignal, HookArgs::Signal(signal))?;
            if self.quit_requested().is_some() {
                break;
            }
        }
        Ok(())
    }

    fn flush_transport(&mut self) -> Result<(), EngineError> {
        let closed = self.core.borrow_mut().flush_transport();
        match closed {
            Some(reason) => self.handle_disconnect(reason),
            None => Ok(()),
        }
    }

    fn service_transport(&mut self) -> Result<(), EngineError> {
        let (pump, generation) = {
            let mut core = self.core.borrow_mut();
            let pump = core.pump();
            (pump, core.generation())
        };
        if pump.received > 0 {
            self.last_traffic = Instant::now();
        }

        for line in &pump.lines {
            // A hook may have replaced or closed the connection; the rest
            // of the batch belongs to the old one.
            if self.core.borrow().generation() != generation || self.quit_requested().is_some() {
                return Ok(());
            }
            self.dispatch(Hook::OnReply, HookArgs::Reply(line))?;
        }

        if let Some(reason) = pump.closed {
            if self.core.borrow().generation() == generation && self.quit_requested().is_none() {
                self.handle_disconnect(reason)?;
            }
        }
        Ok(())
    }

    fn handle_disconnect(&mut self, reason: String) -> Result<(), EngineError> {
        log::warn!("Connection lost: {}", reason);
        self.core.borrow_mut().drop_connection();
        self.state = EngineState::ReconnectPending;
        self.disconnect_reason = reason;
        self.backoff.reset();
        self.ask_reconnect(Instant::now())
    }

    fn ask_reconnect(&mut self, now: Instant) -> Result<(), EngineError> {
        let reason = self.disconnect_reason.clone();
        let outcome = self.dispatch(Hook::OnDisconnect, HookArgs::Disconnect(&reason))?;
        if outcome.flag() == Some(true) {
            log::info!("Reconnect acknowledged, resuming");
            self.state = EngineState::Running;
            self.backoff.reset();
        } else {
            if outcome == Dispatch::Skipped {
                log::warn!("on_disconnect is not defined; the connection stays down");
            }
            self.backoff.schedule(now);
        }
        Ok(())
    }

    fn drain_input(&mut self) -> Result<(), EngineError> {
        loop {
            let event = self
                .input
                .next_event(INPUT_PEEK_TIMEOUT)
                .map_err(|e| EngineError::Io(anyhow!("Failed to read terminal input: {e}")))?;
            let Some(event) = event else {
                return Ok(());
            };

            if let Some((cols, rows)) = event.size {
                self.core.borrow_mut().renderer_mut().resize(cols, rows);
            }
            self.dispatch(Hook::OnInput, HookArgs::Input(&event))?;
            if self.quit_requested().is_some() {
                return Ok(());
            }
        }
    }
}
