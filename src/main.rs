//! Lurch - terminal client engine.
//!
//! This is the main binary entry point. See the `lurch` library for the
//! engine itself; behavior is loaded from `<rt>/init.lua`.

use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossterm::{
    event::DisableMouseCapture,
    execute,
    terminal::{disable_raw_mode, LeaveAlternateScreen},
};
use lurch::engine::Core;
use lurch::signals::{self, SignalRouter};
use lurch::tui::{CellRenderer, CrosstermInput, CrosstermScreen};
use lurch::{Bridge, Config, Engine, EngineError, LuaBehavior};
use mimalloc::MiMalloc;
use ratatui::backend::CrosstermBackend;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser, Debug)]
#[command(name = "lurch")]
#[command(version)]
#[command(about = "Terminal client engine driven by Lua hooks")]
struct Cli {
    /// Runtime directory holding init.lua (overrides LURCH_RT_PATH)
    #[arg(long, value_name = "DIR")]
    rt: Option<PathBuf>,

    /// Arguments passed to the init hook
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

/// Set up file logging so log output never lands on the cell grid.
///
/// Uses `LURCH_LOG_FILE`, or `lurch.log` in the temp directory.
fn init_logging() -> Result<PathBuf> {
    let log_path = std::env::var_os("LURCH_LOG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("lurch.log"));
    let log_file = std::fs::File::create(&log_path)
        .with_context(|| format!("Failed to create log file at {}", log_path.display()))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .format_timestamp_secs()
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {e}"))?;
    Ok(log_path)
}

/// Log panics and restore the terminal before the default hook prints.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);

        let _ = disable_raw_mode();
        let _ = execute!(
            std::io::stdout(),
            LeaveAlternateScreen,
            DisableMouseCapture,
            crossterm::cursor::Show
        );

        default_hook(panic_info);
    }));
}

/// Build the engine and run it to completion.
fn run(cli: &Cli) -> Result<i32, EngineError> {
    let mut config = Config::load();
    if let Some(rt) = &cli.rt {
        config = config.with_rt_dir(rt);
    }
    log::info!("Starting lurch v{} (rt={})", env!("CARGO_PKG_VERSION"), config.rt_dir.display());

    signals::capture_terminal_state();
    signals::install_fatal_handlers().map_err(EngineError::Startup)?;

    let renderer = CellRenderer::new(CrosstermBackend::new(std::io::stdout()))
        .context("Failed to create cell renderer")
        .map_err(EngineError::Startup)?;
    let core = Rc::new(RefCell::new(Core::new(
        renderer,
        Box::new(CrosstermScreen::new()),
        &config,
    )));

    let behavior = LuaBehavior::load(&config, &core).map_err(EngineError::Startup)?;
    let bridge = Bridge::new(behavior).map_err(|e| EngineError::Startup(e.into()))?;
    let router = SignalRouter::install().map_err(EngineError::Startup)?;

    let mut engine = Engine::new(bridge, core, CrosstermInput::new(), Some(router), &config);
    engine.run(&cli.args)
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("lurch: {e:#}; continuing without a log file");
    }
    install_panic_hook();

    let code = match run(&cli) {
        Ok(code) => code,
        Err(EngineError::Fatal(report)) => {
            log::error!("{}", report);
            let mut stderr = std::io::stderr().lock();
            if let Err(e) = report.write_to(&mut stderr) {
                log::error!("Failed to write the fatal report: {}", e);
            }
            let _ = stderr.flush();
            1
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("lurch: {e}");
            e.exit_code()
        }
    };

    log::info!("Exiting with status {}", code);
    log::logger().flush();
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_args_are_forwarded_verbatim() {
        let cli = Cli::try_parse_from(["lurch", "--rt", "/opt/rt", "irc.example.net", "-p", "6697"])
            .unwrap();
        assert_eq!(cli.rt, Some(PathBuf::from("/opt/rt")));
        assert_eq!(cli.args, vec!["irc.example.net", "-p", "6697"]);
    }

    #[test]
    fn test_no_arguments() {
        let cli = Cli::try_parse_from(["lurch"]).unwrap();
        assert_eq!(cli.rt, None);
        assert!(cli.args.is_empty());
    }
}
