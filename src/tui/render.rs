//! Cell grid and presentation to the physical terminal.
//!
//! Hooks mutate an in-memory [`Grid`]; nothing reaches the terminal until
//! a present. [`CellRenderer`] tracks whether the grid changed since the
//! last present and when that present happened, so the engine can flush at
//! most once per redraw interval no matter how many lines a hook writes.

use std::time::{Duration, Instant};

use anyhow::Result;
use ratatui::backend::Backend;
use ratatui::buffer::Buffer;
use ratatui::layout::{Position, Rect};
use ratatui::widgets::Widget;
use ratatui::Terminal;

use super::style::{Cell, StyledCells};

/// Rectangular array of cells addressed by (column, row), origin top-left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    cols: u16,
    rows: u16,
    cells: Vec<Cell>,
}

impl Grid {
    /// A blank grid of the given size.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            cells: vec![Cell::BLANK; usize::from(cols) * usize::from(rows)],
        }
    }

    /// Number of columns.
    pub fn cols(&self) -> u16 {
        self.cols
    }

    /// Number of rows.
    pub fn rows(&self) -> u16 {
        self.rows
    }

    fn index(&self, col: u16, row: u16) -> Option<usize> {
        (col < self.cols && row < self.rows)
            .then(|| usize::from(row) * usize::from(self.cols) + usize::from(col))
    }

    /// The cell at (`col`, `row`), if in range.
    pub fn get(&self, col: u16, row: u16) -> Option<&Cell> {
        self.index(col, row).map(|i| &self.cells[i])
    }

    /// Characters of one row as a string (test and debug helper).
    pub fn row_text(&self, row: u16) -> String {
        (0..self.cols)
            .filter_map(|col| self.get(col, row))
            .map(|cell| cell.ch)
            .collect()
    }

    /// Overwrite cells of `row` from column 0 with a styled line.
    ///
    /// Cells past the end of the text are left untouched. Characters
    /// beyond the last column, and rows out of range, are dropped. Returns
    /// the number of cells written.
    pub fn write_styled(&mut self, row: i64, text: &[u8]) -> usize {
        let Ok(row) = u16::try_from(row) else {
            return 0;
        };
        if row >= self.rows {
            return 0;
        }

        let mut written = 0;
        for (col, cell) in (0..self.cols).zip(StyledCells::new(text)) {
            if let Some(i) = self.index(col, row) {
                self.cells[i] = cell;
                written += 1;
            }
        }
        written
    }

    /// Blank every cell of `row` in default colors.
    pub fn clear_row(&mut self, row: i64) {
        let Ok(row) = u16::try_from(row) else {
            return;
        };
        if row >= self.rows {
            return;
        }
        let start = usize::from(row) * usize::from(self.cols);
        self.cells[start..start + usize::from(self.cols)].fill(Cell::BLANK);
    }

    /// Blank the whole grid.
    pub fn clear(&mut self) {
        self.cells.fill(Cell::BLANK);
    }

    /// Change dimensions, keeping the overlapping top-left region.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        if cols == self.cols && rows == self.rows {
            return;
        }
        let mut resized = Self::new(cols, rows);
        for row in 0..rows.min(self.rows) {
            for col in 0..cols.min(self.cols) {
                if let (Some(dst), Some(src)) = (resized.index(col, row), self.get(col, row)) {
                    resized.cells[dst] = *src;
                }
            }
        }
        *self = resized;
    }
}

impl Widget for &Grid {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for row in 0..area.height.min(self.rows) {
            for col in 0..area.width.min(self.cols) {
                let Some(cell) = self.get(col, row) else {
                    continue;
                };
                if let Some(buf_cell) = buf.cell_mut((area.x + col, area.y + row)) {
                    apply_cell(cell, buf_cell);
                }
            }
        }
    }
}

fn apply_cell(cell: &Cell, buf_cell: &mut ratatui::buffer::Cell) {
    buf_cell.set_char(cell.ch).set_style(cell.style());
}

/// Owns the grid, the cursor and the ratatui terminal it is flushed to.
#[derive(Debug)]
pub struct CellRenderer<B: Backend> {
    terminal: Terminal<B>,
    grid: Grid,
    cursor: Option<(u16, u16)>,
    dirty: bool,
    last_present: Option<Instant>,
    presents: u64,
}

impl<B> CellRenderer<B>
where
    B: Backend,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    /// Wrap `backend`; the grid starts blank at the backend's size.
    pub fn new(backend: B) -> Result<Self> {
        let terminal = Terminal::new(backend)?;
        let size = terminal.size()?;
        Ok(Self {
            terminal,
            grid: Grid::new(size.width, size.height),
            cursor: None,
            dirty: false,
            last_present: None,
            presents: 0,
        })
    }

    /// The grid as hooks last left it.
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The backend (tests inspect `TestBackend` buffers through this).
    pub fn backend(&self) -> &B {
        self.terminal.backend()
    }

    /// Screen size as `(rows, cols)`.
    pub fn size(&self) -> (u16, u16) {
        (self.grid.rows(), self.grid.cols())
    }

    /// Write a styled line at `row`. See [`Grid::write_styled`].
    pub fn write_line(&mut self, row: i64, text: &[u8]) {
        self.grid.write_styled(row, text);
        self.dirty = true;
    }

    /// Blank `row`.
    pub fn clear_line(&mut self, row: i64) {
        self.grid.clear_row(row);
        self.dirty = true;
    }

    /// Blank the whole grid.
    pub fn clear(&mut self) {
        self.grid.clear();
        self.dirty = true;
    }

    /// Show the cursor at (`col`, `row`); negative coordinates hide it.
    pub fn show_cursor(&mut self, col: i64, row: i64) {
        self.cursor = u16::try_from(col).ok().zip(u16::try_from(row).ok());
        self.dirty = true;
    }

    /// Hide the cursor.
    pub fn hide_cursor(&mut self) {
        self.cursor = None;
        self.dirty = true;
    }

    /// Current cursor position, `None` when hidden.
    pub fn cursor(&self) -> Option<(u16, u16)> {
        self.cursor
    }

    /// Follow a terminal resize.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.grid.resize(cols, rows);
        self.dirty = true;
    }

    /// Re-read the backend size and force a full repaint on the next
    /// present. Used after entering the alternate screen.
    pub fn reset(&mut self) -> Result<()> {
        let size = self.terminal.size()?;
        self.grid.resize(size.width, size.height);
        self.terminal.clear()?;
        self.dirty = true;
        Ok(())
    }

    /// Returns true if the grid changed since the last present.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of flushes performed so far.
    pub fn present_count(&self) -> u64 {
        self.presents
    }

    /// Returns true if a throttled present at `now` would flush.
    pub fn present_due(&self, now: Instant, interval: Duration) -> bool {
        self.dirty
            && self
                .last_present
                .is_none_or(|last| now.saturating_duration_since(last) >= interval)
    }

    /// Time until a pending present becomes due, `None` if nothing is
    /// pending.
    pub fn present_wait(&self, now: Instant, interval: Duration) -> Option<Duration> {
        if !self.dirty {
            return None;
        }
        Some(self.last_present.map_or(Duration::ZERO, |last| {
            interval.saturating_sub(now.saturating_duration_since(last))
        }))
    }

    /// Flush the grid if it changed. Returns whether a flush happened.
    pub fn present(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }

        let grid = &self.grid;
        let cursor = self.cursor;
        self.terminal.draw(|frame| {
            frame.render_widget(grid, frame.area());
            if let Some((col, row)) = cursor {
                frame.set_cursor_position(Position::new(col, row));
            }
        })?;

        self.dirty = false;
        self.last_present = Some(Instant::now());
        self.presents += 1;
        Ok(true)
    }

    /// Flush only if dirty and at least `interval` has passed since the
    /// previous flush.
    pub fn present_throttled(&mut self, now: Instant, interval: Duration) -> Result<bool> {
        if !self.present_due(now, interval) {
            return Ok(false);
        }
        self.present()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::style::{Color, Modifier};

    fn renderer(cols: u16, rows: u16) -> CellRenderer<TestBackend> {
        CellRenderer::new(TestBackend::new(cols, rows)).unwrap()
    }

    #[test]
    fn test_size_is_rows_then_cols() {
        let r = renderer(80, 24);
        assert_eq!(r.size(), (24, 80));
    }

    #[test]
    fn test_write_line_clips_at_width() {
        let mut grid = Grid::new(4, 2);
        assert_eq!(grid.write_styled(1, b"abcdef"), 4);
        assert_eq!(grid.row_text(1), "abcd");
        assert_eq!(grid.row_text(0), "    ");
    }

    #[test]
    fn test_write_line_out_of_range_row_is_ignored() {
        let mut grid = Grid::new(4, 2);
        assert_eq!(grid.write_styled(2, b"x"), 0);
        assert_eq!(grid.write_styled(-1, b"x"), 0);
        assert_eq!(grid, Grid::new(4, 2));
    }

    #[test]
    fn test_write_line_keeps_cells_past_text() {
        let mut grid = Grid::new(6, 1);
        grid.write_styled(0, b"abcdef");
        grid.write_styled(0, b"XY");
        assert_eq!(grid.row_text(0), "XYcdef");
    }

    #[test]
    fn test_clear_row_uses_default_colors() {
        let mut grid = Grid::new(3, 2);
        grid.write_styled(0, b"\x1b2\x01abc");
        grid.clear_row(0);
        assert_eq!(grid.get(1, 0), Some(&Cell::BLANK));
        grid.clear_row(7);
    }

    #[test]
    fn test_resize_keeps_overlap() {
        let mut grid = Grid::new(4, 2);
        grid.write_styled(0, b"abcd");
        grid.write_styled(1, b"efgh");
        grid.resize(2, 3);
        assert_eq!(grid.row_text(0), "ab");
        assert_eq!(grid.row_text(1), "ef");
        assert_eq!(grid.row_text(2), "  ");
    }

    #[test]
    fn test_present_flushes_only_when_dirty() {
        let mut r = renderer(10, 2);
        assert!(!r.present().unwrap());

        r.write_line(0, b"hello");
        assert!(r.present().unwrap());
        assert!(!r.present().unwrap());
        assert_eq!(r.present_count(), 1);

        let buffer = r.backend().buffer();
        assert_eq!(buffer[(0, 0)].symbol(), "h");
        assert_eq!(buffer[(4, 0)].symbol(), "o");
    }

    #[test]
    fn test_present_applies_styles() {
        let mut r = renderer(10, 1);
        r.write_line(0, b"\x1b1\x1b2\x09R\x1brN");
        r.present().unwrap();

        let buffer = r.backend().buffer();
        assert_eq!(buffer[(0, 0)].fg, Color::Indexed(9));
        assert!(buffer[(0, 0)].modifier.contains(Modifier::BOLD));
        assert_eq!(buffer[(1, 0)].fg, Color::Indexed(15));
        assert_eq!(buffer[(1, 0)].bg, Color::Indexed(0));
        assert!(!buffer[(1, 0)].modifier.contains(Modifier::BOLD));
    }

    #[test]
    fn test_throttled_present_respects_interval() {
        let mut r = renderer(10, 1);
        let interval = Duration::from_millis(50);

        r.write_line(0, b"a");
        let t0 = Instant::now();
        assert!(r.present_throttled(t0, interval).unwrap());

        r.write_line(0, b"b");
        let last = r.last_present.unwrap();
        assert!(!r.present_throttled(last + Duration::from_millis(10), interval).unwrap());
        assert!(r.is_dirty());
        assert_eq!(
            r.present_wait(last + Duration::from_millis(10), interval),
            Some(Duration::from_millis(40))
        );

        assert!(r.present_throttled(last + interval, interval).unwrap());
        assert_eq!(r.present_count(), 2);
    }

    #[test]
    fn test_present_wait_when_clean() {
        let r = renderer(10, 1);
        assert_eq!(r.present_wait(Instant::now(), Duration::from_millis(5)), None);
    }

    #[test]
    fn test_cursor_show_and_hide() {
        let mut r = renderer(10, 3);
        r.show_cursor(2, 1);
        assert_eq!(r.cursor(), Some((2, 1)));
        r.present().unwrap();

        r.hide_cursor();
        assert_eq!(r.cursor(), None);
        r.show_cursor(-1, -1);
        assert_eq!(r.cursor(), None);
    }

    #[test]
    fn test_resize_marks_dirty_and_updates_size() {
        let mut r = renderer(10, 3);
        r.resize(20, 5);
        assert_eq!(r.size(), (5, 20));
        assert!(r.is_dirty());
    }
}
