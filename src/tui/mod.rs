//! TUI - the cell-grid display and terminal input.
//!
//! # Architecture
//!
//! ```text
//! lurch.tb_writeline / tb_clearline / tb_showcursor
//!     └→ CellRenderer (Grid + dirty flag)  ──present──→ ratatui Terminal
//! crossterm events
//!     └→ InputSource → InputEvent          ──────────→ on_input
//! ```
//!
//! # Modules
//!
//! - [`guard`] - Terminal mode switching and RAII cleanup
//! - [`input`] - Input events in the shape scripts receive
//! - [`render`] - Grid, presentation and redraw throttling
//! - [`style`] - Cells and the inline style escape format

pub mod guard;
pub mod input;
pub mod render;
pub mod style;

pub use guard::{CrosstermScreen, HeadlessScreen, Screen, TerminalGuard};
pub use input::{CrosstermInput, EventKind, InputEvent, InputSource};
pub use render::{CellRenderer, Grid};
pub use style::{Cell, StyledCells};
