//! Cells and the inline style escape format of `tb_writeline`.
//!
//! Text handed to `tb_writeline` may embed style switches. Each switch is
//! the escape byte `0x1b` followed by one mode byte:
//!
//! | mode | effect                                              |
//! |------|-----------------------------------------------------|
//! | `r`  | reset foreground and background to the defaults      |
//! | `1`  | bold on                                              |
//! | `2`  | next byte is the foreground color; bold/reverse kept |
//! | `3`  | reverse video on                                     |
//! | `4`  | underline on                                         |
//! | `5`  | italic (reserved, no visual effect)                  |
//! | `6`  | blink (reserved, no visual effect)                   |
//! | `7`  | next byte is the background color; reverse kept      |
//!
//! Unknown mode bytes are skipped. Every other character occupies exactly
//! one cell; there is no width handling for wide glyphs.

use ratatui::style::{Color, Modifier, Style};

use crate::constants::{DEFAULT_BG_COLOR, DEFAULT_FG_COLOR, STYLE_ESCAPE};

/// Foreground style of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Foreground {
    /// 256-color palette index, `None` for the terminal default.
    pub color: Option<u8>,
    /// Bold attribute.
    pub bold: bool,
    /// Reverse video attribute.
    pub reverse: bool,
    /// Underline attribute.
    pub underline: bool,
}

/// Background style of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Background {
    /// 256-color palette index, `None` for the terminal default.
    pub color: Option<u8>,
    /// Reverse video attribute.
    pub reverse: bool,
}

/// One character position on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// Displayed character.
    pub ch: char,
    /// Foreground style.
    pub fg: Foreground,
    /// Background style.
    pub bg: Background,
}

impl Cell {
    /// A space in terminal-default colors.
    pub const BLANK: Self = Self {
        ch: ' ',
        fg: Foreground {
            color: None,
            bold: false,
            reverse: false,
            underline: false,
        },
        bg: Background {
            color: None,
            reverse: false,
        },
    };

    /// The ratatui style equivalent of this cell's attributes.
    pub fn style(&self) -> Style {
        let mut style = Style::default()
            .fg(palette(self.fg.color))
            .bg(palette(self.bg.color));
        if self.fg.bold {
            style = style.add_modifier(Modifier::BOLD);
        }
        if self.fg.underline {
            style = style.add_modifier(Modifier::UNDERLINED);
        }
        if self.fg.reverse || self.bg.reverse {
            style = style.add_modifier(Modifier::REVERSED);
        }
        style
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::BLANK
    }
}

fn palette(color: Option<u8>) -> Color {
    color.map_or(Color::Reset, Color::Indexed)
}

/// Current foreground/background while interpreting one styled line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleCursor {
    /// Foreground applied to the next character.
    pub fg: Foreground,
    /// Background applied to the next character.
    pub bg: Background,
}

impl StyleCursor {
    /// White on black, no attributes.
    pub const fn new() -> Self {
        Self {
            fg: Foreground {
                color: Some(DEFAULT_FG_COLOR),
                bold: false,
                reverse: false,
                underline: false,
            },
            bg: Background {
                color: Some(DEFAULT_BG_COLOR),
                reverse: false,
            },
        }
    }

    fn apply(&mut self, escape: StyleEscape) {
        match escape {
            StyleEscape::Reset => *self = Self::new(),
            StyleEscape::Bold => self.fg.bold = true,
            StyleEscape::Foreground(color) => {
                self.fg = Foreground {
                    color: Some(color),
                    bold: self.fg.bold,
                    reverse: self.fg.reverse,
                    underline: false,
                };
            }
            StyleEscape::Reverse => self.fg.reverse = true,
            StyleEscape::Underline => self.fg.underline = true,
            StyleEscape::Background(color) => {
                self.bg = Background {
                    color: Some(color),
                    reverse: self.bg.reverse,
                };
            }
            StyleEscape::Italic | StyleEscape::Blink | StyleEscape::Unknown(_) => {}
        }
    }

    fn cell(&self, ch: char) -> Cell {
        Cell {
            ch,
            fg: self.fg,
            bg: self.bg,
        }
    }
}

impl Default for StyleCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded style switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleEscape {
    /// `r`
    Reset,
    /// `1`
    Bold,
    /// `2` + color byte
    Foreground(u8),
    /// `3`
    Reverse,
    /// `4`
    Underline,
    /// `5`
    Italic,
    /// `6`
    Blink,
    /// `7` + color byte
    Background(u8),
    /// Any other mode byte.
    Unknown(u8),
}

/// Iterator over the visible cells of a styled line.
///
/// Escapes are consumed silently; a truncated escape at the end of the
/// text ends the iteration.
#[derive(Debug, Clone)]
pub struct StyledCells<'a> {
    text: &'a [u8],
    pos: usize,
    cursor: StyleCursor,
}

impl<'a> StyledCells<'a> {
    /// Start interpreting `text` with a fresh [`StyleCursor`].
    pub fn new(text: &'a [u8]) -> Self {
        Self {
            text,
            pos: 0,
            cursor: StyleCursor::new(),
        }
    }

    fn next_escape(&mut self) -> Option<StyleEscape> {
        let mode = *self.text.get(self.pos)?;
        self.pos += 1;
        let escape = match mode {
            b'r' => StyleEscape::Reset,
            b'1' => StyleEscape::Bold,
            b'2' | b'7' => {
                let color = *self.text.get(self.pos)?;
                self.pos += 1;
                if mode == b'2' {
                    StyleEscape::Foreground(color)
                } else {
                    StyleEscape::Background(color)
                }
            }
            b'3' => StyleEscape::Reverse,
            b'4' => StyleEscape::Underline,
            b'5' => StyleEscape::Italic,
            b'6' => StyleEscape::Blink,
            other => StyleEscape::Unknown(other),
        };
        Some(escape)
    }
}

impl Iterator for StyledCells<'_> {
    type Item = Cell;

    fn next(&mut self) -> Option<Cell> {
        loop {
            let byte = *self.text.get(self.pos)?;
            if byte == STYLE_ESCAPE {
                self.pos += 1;
                let escape = self.next_escape()?;
                self.cursor.apply(escape);
                continue;
            }

            let (ch, len) = decode_char(&self.text[self.pos..]);
            self.pos += len;
            return Some(self.cursor.cell(ch));
        }
    }
}

/// Decode one UTF-8 scalar from the front of `bytes`.
///
/// Invalid sequences decode as U+FFFD and consume a single byte, so a raw
/// Latin-1 byte never swallows its neighbours.
fn decode_char(bytes: &[u8]) -> (char, usize) {
    let width = match bytes[0] {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => return (char::REPLACEMENT_CHARACTER, 1),
    };
    bytes
        .get(..width)
        .and_then(|seq| std::str::from_utf8(seq).ok())
        .and_then(|s| s.chars().next())
        .map_or((char::REPLACEMENT_CHARACTER, 1), |ch| (ch, width))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(text: &[u8]) -> Vec<Cell> {
        StyledCells::new(text).collect()
    }

    #[test]
    fn test_plain_text_uses_default_cursor() {
        let out = cells(b"hi");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].ch, 'h');
        assert_eq!(out[0].fg.color, Some(15));
        assert_eq!(out[0].bg.color, Some(0));
    }

    #[test]
    fn test_reset_then_foreground_switch() {
        let out = cells(b"\x1brA\x1b2\x09B");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], StyleCursor::new().cell('A'));
        assert_eq!(out[1].ch, 'B');
        assert_eq!(out[1].fg.color, Some(9));
        assert_eq!(out[1].bg, StyleCursor::new().bg);
    }

    #[test]
    fn test_foreground_switch_keeps_bold_and_reverse() {
        let out = cells(b"\x1b1\x1b3\x1b4\x1b2\x05x");
        let fg = out[0].fg;
        assert_eq!(fg.color, Some(5));
        assert!(fg.bold);
        assert!(fg.reverse);
        assert!(!fg.underline);
    }

    #[test]
    fn test_background_switch_keeps_reverse() {
        let mut cursor = StyleCursor::new();
        cursor.bg.reverse = true;
        cursor.apply(StyleEscape::Background(4));
        assert_eq!(cursor.bg, Background { color: Some(4), reverse: true });
    }

    #[test]
    fn test_reset_mid_line_restores_defaults() {
        let out = cells(b"\x1b1\x1b2\x01\x1b7\x02a\x1brb");
        assert!(out[0].fg.bold);
        assert_eq!(out[0].bg.color, Some(2));
        assert_eq!(out[1], StyleCursor::new().cell('b'));
    }

    #[test]
    fn test_reserved_and_unknown_modes_are_skipped() {
        let out = cells(b"\x1b5a\x1b6b\x1bzc");
        let chars: String = out.iter().map(|c| c.ch).collect();
        assert_eq!(chars, "abc");
        assert!(out.iter().all(|c| c.fg == StyleCursor::new().fg));
    }

    #[test]
    fn test_truncated_escape_ends_line() {
        assert_eq!(cells(b"ab\x1b").len(), 2);
        assert_eq!(cells(b"ab\x1b2").len(), 2);
    }

    #[test]
    fn test_multibyte_characters_take_one_cell() {
        let out = cells("héé→".as_bytes());
        let chars: String = out.iter().map(|c| c.ch).collect();
        assert_eq!(chars, "héé→");
    }

    #[test]
    fn test_high_color_byte_is_not_text() {
        // 0xc4 would start a UTF-8 sequence if it were treated as text
        let out = cells(b"\x1b2\xc4x");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].fg.color, Some(0xc4));
    }

    #[test]
    fn test_invalid_utf8_byte_is_replacement() {
        let out = cells(b"a\xffb");
        let chars: String = out.iter().map(|c| c.ch).collect();
        assert_eq!(chars, "a\u{fffd}b");
    }

    #[test]
    fn test_cell_style_conversion() {
        let cell = Cell {
            ch: 'x',
            fg: Foreground { color: Some(1), bold: true, reverse: false, underline: true },
            bg: Background { color: None, reverse: true },
        };
        let style = cell.style();
        assert_eq!(style.fg, Some(Color::Indexed(1)));
        assert_eq!(style.bg, Some(Color::Reset));
        assert!(style.add_modifier.contains(Modifier::BOLD | Modifier::UNDERLINED | Modifier::REVERSED));
    }
}
