//! VT sequence interpreter
//!
//! The byte-level state machine (escape framing, CSI/OSC/DCS collection,
//! UTF-8 decoding) is `vte`'s; this module implements the terminal
//! semantics on top of it: two screens, cursor, scroll region, modes,
//! SGR pen, and terminal properties. State changes are published as
//! [`TermEvent`]s on an internal queue which the session drains on the UI
//! thread, in emission order.
//!
//! Coordinates are zero-based everywhere in this API; the one-based CSI
//! convention is translated at the dispatch boundary. Parameters past the
//! screen edge are clamped. Unknown sequences are logged at trace level
//! and ignored; no byte of them reaches a cell.

use std::collections::VecDeque;

use tracing::trace;

use crate::cell::{char_width, Attrs, Cell, Color, Row, UnderlineStyle};
use crate::input::{self, Modifiers, MouseEvent, NamedKey};
use crate::screen::Screen;

/// Cursor glyph requested via DECSCUSR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorShape {
    #[default]
    Block,
    Underline,
    Bar,
}

/// Mouse reporting state as the shell requested it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MouseMode {
    #[default]
    None,
    X10,
    Normal,
    Sgr,
}

/// Cursor position and presentation, for the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub row: usize,
    pub col: usize,
    pub visible: bool,
    pub blink: bool,
    pub shape: CursorShape,
}

/// Terminal properties outside the cell grid. Snapshots of this struct are
/// published whenever one of them changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermProps {
    pub title: String,
    pub icon_name: String,
    /// Directory reported via OSC 7, when the shell integration emits it.
    pub working_dir: String,
    pub cursor_visible: bool,
    pub cursor_blink: bool,
    pub cursor_shape: CursorShape,
    pub alt_screen: bool,
    pub mouse_mode: MouseMode,
    pub bracketed_paste: bool,
    pub application_cursor_keys: bool,
}

impl Default for TermProps {
    fn default() -> Self {
        Self {
            title: String::new(),
            icon_name: String::new(),
            working_dir: String::new(),
            cursor_visible: true,
            cursor_blink: true,
            cursor_shape: CursorShape::Block,
            alt_screen: false,
            mouse_mode: MouseMode::None,
            bracketed_paste: false,
            application_cursor_keys: false,
        }
    }
}

/// Half-open rectangle of changed cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageRect {
    pub row_start: usize,
    pub row_end: usize,
    pub col_start: usize,
    pub col_end: usize,
}

/// Parser notifications, drained by the session in emission order.
///
/// A `ScrollbackPush` always precedes the damage that refers to the rows
/// it shifted. `MoveRect` is a scrolling optimization; a consumer that
/// does not implement it must treat both rectangles as damaged.
#[derive(Debug, Clone)]
pub enum TermEvent {
    Damage(DamageRect),
    MoveRect { dest: DamageRect, src: DamageRect },
    MoveCursor { row: usize, col: usize, visible: bool },
    SetProp(TermProps),
    Bell,
    Resize { rows: usize, cols: usize },
    ScrollbackPush(Row),
    Output(Vec<u8>),
}

/// Current SGR rendition applied to printed cells.
#[derive(Debug, Clone, Copy, Default)]
struct Pen {
    fg: Color,
    bg: Color,
    attrs: Attrs,
}

#[derive(Debug, Clone, Copy, Default)]
struct SavedCursor {
    row: usize,
    col: usize,
    pen: Pen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum MouseTracking {
    #[default]
    None,
    X10,
    Normal,
}

/// The VT parser: feed bytes in, drain [`TermEvent`]s out.
pub struct Parser {
    machine: vte::Parser,
    term: TermState,
}

impl Parser {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            machine: vte::Parser::new(),
            term: TermState::new(rows.max(1), cols.max(1)),
        }
    }

    /// Interpret a chunk of shell output. Always consumes the whole
    /// buffer; the return value exists for symmetry with the write APIs.
    pub fn input_write(&mut self, bytes: &[u8]) -> usize {
        self.machine.advance(&mut self.term, bytes);
        bytes.len()
    }

    /// Convert the accumulated dirty rows into `Damage` events, followed
    /// by a `MoveCursor` event when the cursor moved since the last flush.
    pub fn flush_damage(&mut self) {
        self.term.flush_damage();
    }

    /// Drain pending events in emission order.
    pub fn take_events(&mut self) -> Vec<TermEvent> {
        self.term.events.drain(..).collect()
    }

    pub fn resize(&mut self, rows: usize, cols: usize) {
        self.term.resize(rows.max(1), cols.max(1));
    }

    /// Full reset (RIS): both screens cleared, cursor home, modes and pen
    /// back to defaults. The title survives, as it does in xterm.
    pub fn reset(&mut self) {
        self.term.reset();
    }

    pub fn rows(&self) -> usize {
        self.term.rows
    }

    pub fn cols(&self) -> usize {
        self.term.cols
    }

    pub fn cursor(&self) -> CursorState {
        CursorState {
            row: self.term.cursor_row,
            col: self.term.cursor_col,
            visible: self.term.props.cursor_visible,
            blink: self.term.props.cursor_blink,
            shape: self.term.props.cursor_shape,
        }
    }

    pub fn props(&self) -> &TermProps {
        &self.term.props
    }

    /// A row of the active screen.
    pub fn visible_row(&self, row: usize) -> Option<&Row> {
        self.term.active().row(row)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.term.active().cell(row, col)
    }

    /// Encode a printable keystroke and queue it as an `Output` event.
    /// The IME composition path delivers through here as well.
    pub fn keyboard_unichar(&mut self, c: char, mods: Modifiers) {
        let bytes = input::encode_char(c, mods);
        if !bytes.is_empty() {
            self.term.events.push_back(TermEvent::Output(bytes));
        }
    }

    /// Encode a named key honoring the application-cursor-keys mode.
    pub fn keyboard_key(&mut self, key: NamedKey, mods: Modifiers) {
        let app = self.term.props.application_cursor_keys;
        let bytes = input::encode_key(key, mods, app);
        if !bytes.is_empty() {
            self.term.events.push_back(TermEvent::Output(bytes));
        }
    }

    /// Encode a mouse event under the current reporting mode; a no-op when
    /// reporting is off or the mode cannot express the event.
    pub fn mouse_input(&mut self, ev: MouseEvent) {
        let bytes = match self.term.props.mouse_mode {
            MouseMode::None => return,
            MouseMode::X10 => {
                // X10 reports button presses only, without modifiers.
                if !ev.press || ev.button.is_wheel() {
                    return;
                }
                input::encode_mouse_legacy(&ev, false)
            }
            MouseMode::Normal => input::encode_mouse_legacy(&ev, true),
            MouseMode::Sgr => input::encode_mouse_sgr(&ev),
        };
        self.term.events.push_back(TermEvent::Output(bytes));
    }
}

struct TermState {
    rows: usize,
    cols: usize,
    primary: Screen,
    alternate: Screen,
    alt_active: bool,

    cursor_row: usize,
    cursor_col: usize,
    wrap_pending: bool,
    saved_primary: SavedCursor,
    saved_alt: SavedCursor,

    /// Scroll region, inclusive rows.
    scroll_top: usize,
    scroll_bottom: usize,

    pen: Pen,
    autowrap: bool,
    mouse_tracking: MouseTracking,
    mouse_sgr: bool,
    props: TermProps,

    /// Cell the last base character went to, for combining marks.
    last_print: Option<(usize, usize)>,

    dirty: Vec<bool>,
    reported_cursor: (usize, usize, bool),
    events: VecDeque<TermEvent>,
}

impl TermState {
    fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            primary: Screen::new(rows, cols),
            alternate: Screen::new(rows, cols),
            alt_active: false,
            cursor_row: 0,
            cursor_col: 0,
            wrap_pending: false,
            saved_primary: SavedCursor::default(),
            saved_alt: SavedCursor::default(),
            scroll_top: 0,
            scroll_bottom: rows - 1,
            pen: Pen::default(),
            autowrap: true,
            mouse_tracking: MouseTracking::None,
            mouse_sgr: false,
            props: TermProps::default(),
            last_print: None,
            dirty: vec![true; rows],
            reported_cursor: (0, 0, true),
            events: VecDeque::new(),
        }
    }

    fn active(&self) -> &Screen {
        if self.alt_active {
            &self.alternate
        } else {
            &self.primary
        }
    }

    fn active_mut(&mut self) -> &mut Screen {
        if self.alt_active {
            &mut self.alternate
        } else {
            &mut self.primary
        }
    }

    fn mark_row(&mut self, row: usize) {
        if let Some(flag) = self.dirty.get_mut(row) {
            *flag = true;
        }
    }

    fn mark_rows(&mut self, range: std::ops::Range<usize>) {
        let end = range.end.min(self.rows);
        for flag in &mut self.dirty[range.start.min(end)..end] {
            *flag = true;
        }
    }

    fn mark_all(&mut self) {
        self.dirty.fill(true);
    }

    fn flush_damage(&mut self) {
        let mut row = 0;
        while row < self.rows {
            if !self.dirty[row] {
                row += 1;
                continue;
            }
            let start = row;
            while row < self.rows && self.dirty[row] {
                self.dirty[row] = false;
                row += 1;
            }
            self.events.push_back(TermEvent::Damage(DamageRect {
                row_start: start,
                row_end: row,
                col_start: 0,
                col_end: self.cols,
            }));
        }

        let cursor = (self.cursor_row, self.cursor_col, self.props.cursor_visible);
        if cursor != self.reported_cursor {
            self.reported_cursor = cursor;
            self.events.push_back(TermEvent::MoveCursor {
                row: cursor.0,
                col: cursor.1,
                visible: cursor.2,
            });
        }
    }

    fn emit_props(&mut self) {
        self.events.push_back(TermEvent::SetProp(self.props.clone()));
    }

    fn cancel_wrap(&mut self) {
        self.wrap_pending = false;
        self.last_print = None;
    }

    // --- printing ---

    fn put_char(&mut self, c: char) {
        let width = char_width(c);
        if width == 0 {
            if let Some((row, col)) = self.last_print {
                if let Some(cell) = self.active_mut().cell_mut(row, col) {
                    cell.push_combining(c);
                }
                self.mark_row(row);
            }
            return;
        }

        if self.wrap_pending {
            self.wrap_line();
        }
        if width == 2 && self.cursor_col + 2 > self.cols {
            // A wide character never straddles the right edge.
            if self.cols < 2 {
                return;
            }
            if self.autowrap {
                self.wrap_line();
            } else {
                self.cursor_col = self.cols - 2;
            }
        }

        let (row, col) = (self.cursor_row, self.cursor_col);
        self.scrub_for_write(row, col);
        if width == 2 {
            self.scrub_for_write(row, col + 1);
        }

        let pen = self.pen;
        if let Some(cell) = self.active_mut().cell_mut(row, col) {
            *cell = Cell::new(c, pen.fg, pen.bg, pen.attrs, width as u8);
        }
        if width == 2 {
            if let Some(cell) = self.active_mut().cell_mut(row, col + 1) {
                *cell = Cell::wide_companion(pen.fg, pen.bg);
            }
        }

        self.last_print = Some((row, col));
        self.mark_row(row);

        let next = col + width;
        if next >= self.cols {
            self.cursor_col = self.cols - 1;
            self.wrap_pending = self.autowrap;
        } else {
            self.cursor_col = next;
        }
    }

    /// Overwriting half of a wide pair blanks the other half.
    fn scrub_for_write(&mut self, row: usize, col: usize) {
        let Some(target) = self.active().cell(row, col).copied() else {
            return;
        };
        if target.is_wide() {
            if let Some(companion) = self.active_mut().cell_mut(row, col + 1) {
                if companion.is_wide_companion() {
                    *companion = Cell::erased(companion.bg);
                }
            }
        } else if target.is_wide_companion() {
            if col > 0 {
                if let Some(base) = self.active_mut().cell_mut(row, col - 1) {
                    if base.is_wide() {
                        *base = Cell::erased(base.bg);
                    }
                }
            }
        }
    }

    fn wrap_line(&mut self) {
        self.wrap_pending = false;
        self.cursor_col = 0;
        self.linefeed();
    }

    fn linefeed(&mut self) {
        if self.cursor_row == self.scroll_bottom {
            self.scroll_region_up(1);
        } else if self.cursor_row + 1 < self.rows {
            self.cursor_row += 1;
        }
    }

    fn reverse_linefeed(&mut self) {
        if self.cursor_row == self.scroll_top {
            self.scroll_region_down(1);
        } else if self.cursor_row > 0 {
            self.cursor_row -= 1;
        }
    }

    // --- scrolling ---

    fn scroll_region_up(&mut self, n: usize) {
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);
        let n = n.min(bottom + 1 - top);
        if n == 0 {
            return;
        }
        let bg = self.pen.bg;
        let preserve = !self.alt_active && top == 0;
        let evicted = self.active_mut().scroll_up(top, bottom, n, bg);
        if preserve {
            for row in evicted {
                self.events.push_back(TermEvent::ScrollbackPush(row));
            }
        }
        if bottom + 1 - top > n {
            self.events.push_back(TermEvent::MoveRect {
                dest: self.region_rect(top, bottom + 1 - n),
                src: self.region_rect(top + n, bottom + 1),
            });
        }
        self.mark_rows(top..bottom + 1);
        self.last_print = None;
    }

    fn scroll_region_down(&mut self, n: usize) {
        let (top, bottom) = (self.scroll_top, self.scroll_bottom);
        let n = n.min(bottom + 1 - top);
        if n == 0 {
            return;
        }
        let bg = self.pen.bg;
        self.active_mut().scroll_down(top, bottom, n, bg);
        if bottom + 1 - top > n {
            self.events.push_back(TermEvent::MoveRect {
                dest: self.region_rect(top + n, bottom + 1),
                src: self.region_rect(top, bottom + 1 - n),
            });
        }
        self.mark_rows(top..bottom + 1);
        self.last_print = None;
    }

    fn region_rect(&self, row_start: usize, row_end: usize) -> DamageRect {
        DamageRect {
            row_start,
            row_end,
            col_start: 0,
            col_end: self.cols,
        }
    }

    // --- cursor motion ---

    fn cursor_up(&mut self, n: usize) {
        let limit = if self.cursor_row >= self.scroll_top {
            self.scroll_top
        } else {
            0
        };
        self.cursor_row = self.cursor_row.saturating_sub(n).max(limit);
        self.cancel_wrap();
    }

    fn cursor_down(&mut self, n: usize) {
        let limit = if self.cursor_row <= self.scroll_bottom {
            self.scroll_bottom
        } else {
            self.rows - 1
        };
        self.cursor_row = (self.cursor_row + n).min(limit);
        self.cancel_wrap();
    }

    fn move_to(&mut self, row: usize, col: usize) {
        self.cursor_row = row.min(self.rows - 1);
        self.cursor_col = col.min(self.cols - 1);
        self.cancel_wrap();
    }

    fn tab(&mut self) {
        self.cursor_col = ((self.cursor_col / 8 + 1) * 8).min(self.cols - 1);
        self.cancel_wrap();
    }

    fn save_cursor(&mut self) {
        let saved = SavedCursor {
            row: self.cursor_row,
            col: self.cursor_col,
            pen: self.pen,
        };
        if self.alt_active {
            self.saved_alt = saved;
        } else {
            self.saved_primary = saved;
        }
    }

    fn restore_cursor(&mut self) {
        let saved = if self.alt_active {
            self.saved_alt
        } else {
            self.saved_primary
        };
        self.cursor_row = saved.row.min(self.rows - 1);
        self.cursor_col = saved.col.min(self.cols - 1);
        self.pen = saved.pen;
        self.cancel_wrap();
    }

    // --- erase / edit ---

    fn erase_display(&mut self, mode: u16) {
        let bg = self.pen.bg;
        match mode {
            0 => {
                let row = self.cursor_row;
                let col = self.cursor_col;
                let cols = self.cols;
                let rows = self.rows;
                if let Some(r) = self.active_mut().row_mut(row) {
                    r.clear_range(col..cols, bg);
                    r.normalize_pairs();
                }
                self.active_mut().clear_rows(row + 1..rows, bg);
                self.mark_rows(row..rows);
            }
            1 => {
                let row = self.cursor_row;
                let col = self.cursor_col;
                self.active_mut().clear_rows(0..row, bg);
                if let Some(r) = self.active_mut().row_mut(row) {
                    r.clear_range(0..col + 1, bg);
                    r.normalize_pairs();
                }
                self.mark_rows(0..row + 1);
            }
            2 => {
                self.active_mut().clear_all(bg);
                self.mark_all();
            }
            other => trace!(mode = other, "ignored ED mode"),
        }
        self.last_print = None;
    }

    fn erase_line(&mut self, mode: u16) {
        let bg = self.pen.bg;
        let row = self.cursor_row;
        let col = self.cursor_col;
        let cols = self.cols;
        if let Some(r) = self.active_mut().row_mut(row) {
            match mode {
                0 => r.clear_range(col..cols, bg),
                1 => r.clear_range(0..col + 1, bg),
                2 => r.clear_range(0..cols, bg),
                other => {
                    trace!(mode = other, "ignored EL mode");
                    return;
                }
            }
            r.normalize_pairs();
        }
        self.mark_row(row);
        self.last_print = None;
    }

    fn insert_lines(&mut self, n: usize) {
        let row = self.cursor_row;
        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }
        let bg = self.pen.bg;
        let bottom = self.scroll_bottom;
        self.active_mut().scroll_down(row, bottom, n, bg);
        self.mark_rows(row..bottom + 1);
        self.last_print = None;
    }

    fn delete_lines(&mut self, n: usize) {
        let row = self.cursor_row;
        if row < self.scroll_top || row > self.scroll_bottom {
            return;
        }
        let bg = self.pen.bg;
        let bottom = self.scroll_bottom;
        // Rows removed at the cursor are discarded; only scroll-up at the
        // top of the region feeds scrollback.
        let _ = self.active_mut().scroll_up(row, bottom, n, bg);
        self.mark_rows(row..bottom + 1);
        self.last_print = None;
    }

    fn insert_chars(&mut self, n: usize) {
        let bg = self.pen.bg;
        let row = self.cursor_row;
        let col = self.cursor_col;
        if let Some(r) = self.active_mut().row_mut(row) {
            r.insert_blank(col, n, bg);
        }
        self.mark_row(row);
        self.last_print = None;
    }

    fn delete_chars(&mut self, n: usize) {
        let bg = self.pen.bg;
        let row = self.cursor_row;
        let col = self.cursor_col;
        if let Some(r) = self.active_mut().row_mut(row) {
            r.delete_chars(col, n, bg);
        }
        self.mark_row(row);
        self.last_print = None;
    }

    fn erase_chars(&mut self, n: usize) {
        let bg = self.pen.bg;
        let row = self.cursor_row;
        let col = self.cursor_col;
        if let Some(r) = self.active_mut().row_mut(row) {
            r.clear_range(col..col + n, bg);
            r.normalize_pairs();
        }
        self.mark_row(row);
        self.last_print = None;
    }

    fn set_scroll_region(&mut self, top: u16, bottom: u16) {
        let top = top.max(1) as usize - 1;
        let bottom = if bottom == 0 {
            self.rows - 1
        } else {
            (bottom as usize - 1).min(self.rows - 1)
        };
        if top < bottom {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
        } else {
            self.scroll_top = 0;
            self.scroll_bottom = self.rows - 1;
        }
        self.move_to(0, 0);
    }

    // --- screens and modes ---

    fn set_alt_screen(&mut self, on: bool) {
        if self.alt_active == on {
            return;
        }
        self.alt_active = on;
        self.props.alt_screen = on;
        self.mark_all();
        self.last_print = None;
        self.wrap_pending = false;
        self.emit_props();
    }

    fn set_private_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => {
                if self.props.application_cursor_keys != enable {
                    self.props.application_cursor_keys = enable;
                    self.emit_props();
                }
            }
            7 => {
                self.autowrap = enable;
                if !enable {
                    self.wrap_pending = false;
                }
            }
            9 => {
                if enable {
                    self.mouse_tracking = MouseTracking::X10;
                } else if self.mouse_tracking == MouseTracking::X10 {
                    self.mouse_tracking = MouseTracking::None;
                }
                self.update_mouse_mode();
            }
            12 => {
                if self.props.cursor_blink != enable {
                    self.props.cursor_blink = enable;
                    self.emit_props();
                }
            }
            25 => {
                if self.props.cursor_visible != enable {
                    self.props.cursor_visible = enable;
                    self.emit_props();
                }
            }
            47 => self.set_alt_screen(enable),
            1000 | 1002 | 1003 => {
                if enable {
                    self.mouse_tracking = MouseTracking::Normal;
                } else if self.mouse_tracking == MouseTracking::Normal {
                    self.mouse_tracking = MouseTracking::None;
                }
                self.update_mouse_mode();
            }
            1006 => {
                self.mouse_sgr = enable;
                self.update_mouse_mode();
            }
            1015 => trace!("urxvt mouse encoding requested; keeping current encoding"),
            1047 => {
                if enable {
                    self.set_alt_screen(true);
                } else {
                    if self.alt_active {
                        let bg = self.pen.bg;
                        self.alternate.clear_all(bg);
                    }
                    self.set_alt_screen(false);
                }
            }
            1048 => {
                if enable {
                    self.save_cursor();
                } else {
                    self.restore_cursor();
                }
            }
            1049 => {
                if enable {
                    if !self.alt_active {
                        self.save_cursor();
                        let bg = self.pen.bg;
                        self.alternate.clear_all(bg);
                        self.set_alt_screen(true);
                    }
                } else if self.alt_active {
                    self.set_alt_screen(false);
                    self.restore_cursor();
                }
            }
            2004 => {
                if self.props.bracketed_paste != enable {
                    self.props.bracketed_paste = enable;
                    self.emit_props();
                }
            }
            other => trace!(mode = other, enable, "ignored private mode"),
        }
    }

    fn update_mouse_mode(&mut self) {
        let mode = match (self.mouse_tracking, self.mouse_sgr) {
            (MouseTracking::None, _) => MouseMode::None,
            (MouseTracking::X10, _) => MouseMode::X10,
            (MouseTracking::Normal, false) => MouseMode::Normal,
            (MouseTracking::Normal, true) => MouseMode::Sgr,
        };
        if self.props.mouse_mode != mode {
            self.props.mouse_mode = mode;
            self.emit_props();
        }
    }

    fn set_cursor_style(&mut self, param: u16) {
        let (shape, blink) = match param {
            0 | 1 => (CursorShape::Block, true),
            2 => (CursorShape::Block, false),
            3 => (CursorShape::Underline, true),
            4 => (CursorShape::Underline, false),
            5 => (CursorShape::Bar, true),
            6 => (CursorShape::Bar, false),
            other => {
                trace!(style = other, "ignored cursor style");
                return;
            }
        };
        if self.props.cursor_shape != shape || self.props.cursor_blink != blink {
            self.props.cursor_shape = shape;
            self.props.cursor_blink = blink;
            self.emit_props();
        }
    }

    fn resize(&mut self, rows: usize, cols: usize) {
        if rows == self.rows && cols == self.cols {
            return;
        }
        let was_full_region = self.scroll_top == 0 && self.scroll_bottom == self.rows - 1;

        self.primary.resize(rows, cols);
        self.alternate.resize(rows, cols);
        self.rows = rows;
        self.cols = cols;

        if was_full_region {
            self.scroll_top = 0;
            self.scroll_bottom = rows - 1;
        } else {
            self.scroll_top = self.scroll_top.min(rows - 1);
            self.scroll_bottom = self.scroll_bottom.min(rows - 1);
            if self.scroll_top >= self.scroll_bottom {
                self.scroll_top = 0;
                self.scroll_bottom = rows - 1;
            }
        }

        self.cursor_row = self.cursor_row.min(rows - 1);
        self.cursor_col = self.cursor_col.min(cols - 1);
        self.saved_primary.row = self.saved_primary.row.min(rows - 1);
        self.saved_primary.col = self.saved_primary.col.min(cols - 1);
        self.saved_alt.row = self.saved_alt.row.min(rows - 1);
        self.saved_alt.col = self.saved_alt.col.min(cols - 1);

        self.dirty = vec![true; rows];
        self.cancel_wrap();
        self.events.push_back(TermEvent::Resize { rows, cols });
    }

    fn reset(&mut self) {
        let (rows, cols) = (self.rows, self.cols);
        self.primary = Screen::new(rows, cols);
        self.alternate = Screen::new(rows, cols);
        self.alt_active = false;
        self.cursor_row = 0;
        self.cursor_col = 0;
        self.wrap_pending = false;
        self.saved_primary = SavedCursor::default();
        self.saved_alt = SavedCursor::default();
        self.scroll_top = 0;
        self.scroll_bottom = rows - 1;
        self.pen = Pen::default();
        self.autowrap = true;
        self.mouse_tracking = MouseTracking::None;
        self.mouse_sgr = false;
        self.last_print = None;

        let title = std::mem::take(&mut self.props.title);
        let icon = std::mem::take(&mut self.props.icon_name);
        let dir = std::mem::take(&mut self.props.working_dir);
        self.props = TermProps {
            title,
            icon_name: icon,
            working_dir: dir,
            ..TermProps::default()
        };

        self.mark_all();
        self.emit_props();
    }

    // --- SGR ---

    fn sgr(&mut self, params: &[&[u16]]) {
        if params.is_empty() {
            self.pen = Pen::default();
            return;
        }
        let mut i = 0;
        while i < params.len() {
            let sub = params[i];
            let code = sub.first().copied().unwrap_or(0);
            match code {
                0 => self.pen = Pen::default(),
                1 => self.pen.attrs.bold = true,
                2 => {} // faint: not represented
                3 => self.pen.attrs.italic = true,
                4 => {
                    self.pen.attrs.underline = match sub.get(1).copied() {
                        None | Some(1) => UnderlineStyle::Single,
                        Some(0) => UnderlineStyle::None,
                        Some(2) => UnderlineStyle::Double,
                        Some(3) => UnderlineStyle::Curly,
                        Some(_) => UnderlineStyle::Single,
                    };
                }
                5 | 6 => self.pen.attrs.blink = true,
                7 => self.pen.attrs.reverse = true,
                8 => self.pen.attrs.conceal = true,
                9 => self.pen.attrs.strikethrough = true,
                21 => self.pen.attrs.underline = UnderlineStyle::Double,
                22 => self.pen.attrs.bold = false,
                23 => self.pen.attrs.italic = false,
                24 => self.pen.attrs.underline = UnderlineStyle::None,
                25 => self.pen.attrs.blink = false,
                27 => self.pen.attrs.reverse = false,
                28 => self.pen.attrs.conceal = false,
                29 => self.pen.attrs.strikethrough = false,
                30..=37 => self.pen.fg = Color::Indexed(code as u8 - 30),
                39 => self.pen.fg = Color::Default,
                40..=47 => self.pen.bg = Color::Indexed(code as u8 - 40),
                49 => self.pen.bg = Color::Default,
                90..=97 => self.pen.fg = Color::Indexed(code as u8 - 90 + 8),
                100..=107 => self.pen.bg = Color::Indexed(code as u8 - 100 + 8),
                38 | 48 => {
                    let (color, consumed) = extended_color(params, i);
                    if let Some(color) = color {
                        if code == 38 {
                            self.pen.fg = color;
                        } else {
                            self.pen.bg = color;
                        }
                    }
                    i += consumed;
                    continue;
                }
                other => trace!(sgr = other, "ignored SGR attribute"),
            }
            i += 1;
        }
    }
}

/// Parse an extended color at `params[i]` (SGR 38/48), supporting both the
/// colon-subparameter form and the legacy semicolon form. Returns the color
/// and the number of parameter slots consumed.
fn extended_color(params: &[&[u16]], i: usize) -> (Option<Color>, usize) {
    let sub = params[i];
    if sub.len() > 1 {
        // Colon form: 38:5:n, 38:2:r:g:b, or 38:2:<colorspace>:r:g:b.
        let color = match sub.get(1).copied() {
            Some(5) => sub.get(2).map(|&n| Color::Indexed(n.min(255) as u8)),
            Some(2) if sub.len() >= 6 => Some(rgb(sub[3], sub[4], sub[5])),
            Some(2) if sub.len() == 5 => Some(rgb(sub[2], sub[3], sub[4])),
            _ => None,
        };
        return (color, 1);
    }

    // Semicolon form: 38;5;n or 38;2;r;g;b.
    match params.get(i + 1).and_then(|p| p.first()).copied() {
        Some(5) => {
            let color = params
                .get(i + 2)
                .and_then(|p| p.first())
                .map(|&n| Color::Indexed(n.min(255) as u8));
            (color, 3)
        }
        Some(2) => {
            if i + 4 < params.len() {
                let channel = |k: usize| params[i + k].first().copied().unwrap_or(0);
                (Some(rgb(channel(2), channel(3), channel(4))), 5)
            } else {
                (None, params.len() - i)
            }
        }
        _ => (None, 2),
    }
}

fn rgb(r: u16, g: u16, b: u16) -> Color {
    Color::Rgb(r.min(255) as u8, g.min(255) as u8, b.min(255) as u8)
}

/// One-based CSI parameter with `default` substituted for absent or zero.
fn arg(params: &[&[u16]], i: usize, default: u16) -> u16 {
    match params.get(i).and_then(|p| p.first()).copied() {
        None | Some(0) => default,
        Some(v) => v,
    }
}

/// CSI parameter where zero is meaningful (ED, EL, DSR, DECSCUSR).
fn raw_arg(params: &[&[u16]], i: usize, default: u16) -> u16 {
    params.get(i).and_then(|p| p.first()).copied().unwrap_or(default)
}

fn osc_text(params: &[&[u8]]) -> String {
    let parts: Vec<String> = params[1..]
        .iter()
        .map(|p| String::from_utf8_lossy(p).into_owned())
        .collect();
    parts.join(";")
}

impl vte::Perform for TermState {
    fn print(&mut self, c: char) {
        self.put_char(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            0x07 => self.events.push_back(TermEvent::Bell),
            0x08 => {
                self.wrap_pending = false;
                if self.cursor_col > 0 {
                    self.cursor_col -= 1;
                }
            }
            0x09 => self.tab(),
            // Line feed returns the carriage as well; the shell side of
            // the PTY is expected to run without ONLCR post-processing.
            0x0a..=0x0c => {
                self.cursor_col = 0;
                self.wrap_pending = false;
                self.linefeed();
            }
            0x0d => {
                self.cursor_col = 0;
                self.wrap_pending = false;
            }
            _ => trace!(byte, "ignored control byte"),
        }
    }

    fn csi_dispatch(
        &mut self,
        params: &vte::Params,
        intermediates: &[u8],
        ignore: bool,
        action: char,
    ) {
        if ignore {
            return;
        }
        let params: Vec<&[u16]> = params.iter().collect();

        match intermediates {
            [] => {}
            [b'?'] => {
                match action {
                    'h' | 'l' => {
                        let enable = action == 'h';
                        for sub in &params {
                            if let Some(&mode) = sub.first() {
                                self.set_private_mode(mode, enable);
                            }
                        }
                    }
                    other => trace!(action = %other, "ignored private CSI sequence"),
                }
                return;
            }
            [b' '] if action == 'q' => {
                self.set_cursor_style(raw_arg(&params, 0, 0));
                return;
            }
            _ => {
                trace!(action = %action, ?intermediates, "ignored CSI sequence");
                return;
            }
        }

        match action {
            'A' => self.cursor_up(arg(&params, 0, 1) as usize),
            'B' | 'e' => self.cursor_down(arg(&params, 0, 1) as usize),
            'C' | 'a' => {
                let n = arg(&params, 0, 1) as usize;
                self.cursor_col = (self.cursor_col + n).min(self.cols - 1);
                self.cancel_wrap();
            }
            'D' => {
                let n = arg(&params, 0, 1) as usize;
                self.cursor_col = self.cursor_col.saturating_sub(n);
                self.cancel_wrap();
            }
            'E' => {
                self.cursor_down(arg(&params, 0, 1) as usize);
                self.cursor_col = 0;
            }
            'F' => {
                self.cursor_up(arg(&params, 0, 1) as usize);
                self.cursor_col = 0;
            }
            'G' | '`' => {
                let col = arg(&params, 0, 1) as usize - 1;
                self.cursor_col = col.min(self.cols - 1);
                self.cancel_wrap();
            }
            'H' | 'f' => {
                let row = arg(&params, 0, 1) as usize - 1;
                let col = arg(&params, 1, 1) as usize - 1;
                self.move_to(row, col);
            }
            'J' => self.erase_display(raw_arg(&params, 0, 0)),
            'K' => self.erase_line(raw_arg(&params, 0, 0)),
            'L' => self.insert_lines(arg(&params, 0, 1) as usize),
            'M' => self.delete_lines(arg(&params, 0, 1) as usize),
            'P' => self.delete_chars(arg(&params, 0, 1) as usize),
            'S' => self.scroll_region_up(arg(&params, 0, 1) as usize),
            'T' => self.scroll_region_down(arg(&params, 0, 1) as usize),
            'X' => self.erase_chars(arg(&params, 0, 1) as usize),
            '@' => self.insert_chars(arg(&params, 0, 1) as usize),
            'd' => {
                let row = arg(&params, 0, 1) as usize - 1;
                self.cursor_row = row.min(self.rows - 1);
                self.cancel_wrap();
            }
            'm' => self.sgr(&params),
            'r' => self.set_scroll_region(raw_arg(&params, 0, 0), raw_arg(&params, 1, 0)),
            'c' => {
                if raw_arg(&params, 0, 0) == 0 {
                    // Identify as a VT102.
                    self.events
                        .push_back(TermEvent::Output(b"\x1b[?6c".to_vec()));
                }
            }
            'n' => match raw_arg(&params, 0, 0) {
                5 => self
                    .events
                    .push_back(TermEvent::Output(b"\x1b[0n".to_vec())),
                6 => {
                    let reply = format!("\x1b[{};{}R", self.cursor_row + 1, self.cursor_col + 1);
                    self.events.push_back(TermEvent::Output(reply.into_bytes()));
                }
                other => trace!(report = other, "ignored DSR request"),
            },
            'h' | 'l' => {
                for sub in &params {
                    if let Some(&mode) = sub.first() {
                        trace!(mode, set = (action == 'h'), "ignored ANSI mode");
                    }
                }
            }
            other => trace!(action = %other, "ignored CSI sequence"),
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], ignore: bool, byte: u8) {
        if ignore {
            return;
        }
        match (intermediates, byte) {
            ([], b'7') => self.save_cursor(),
            ([], b'8') => self.restore_cursor(),
            ([b'#'], b'8') => {
                // DECALN: fill the screen with E for alignment checks.
                for row in 0..self.rows {
                    for col in 0..self.cols {
                        if let Some(cell) = self.active_mut().cell_mut(row, col) {
                            *cell = Cell::new(
                                'E',
                                Color::Default,
                                Color::Default,
                                Attrs::default(),
                                1,
                            );
                        }
                    }
                }
                self.mark_all();
            }
            ([], b'D') => self.linefeed(),
            ([], b'E') => {
                self.cursor_col = 0;
                self.linefeed();
            }
            ([], b'M') => self.reverse_linefeed(),
            ([], b'c') => self.reset(),
            ([], b'=') | ([], b'>') => {} // keypad modes: nothing to track
            ([b'('], _) | ([b')'], _) => {} // charset designation: ASCII only
            _ => trace!(byte, ?intermediates, "ignored escape sequence"),
        }
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        let Some(selector) = params.first() else {
            return;
        };
        match *selector {
            b"0" => {
                let text = osc_text(params);
                if self.props.title != text || self.props.icon_name != text {
                    self.props.title = text.clone();
                    self.props.icon_name = text;
                    self.emit_props();
                }
            }
            b"1" => {
                let text = osc_text(params);
                if self.props.icon_name != text {
                    self.props.icon_name = text;
                    self.emit_props();
                }
            }
            b"2" => {
                let text = osc_text(params);
                if self.props.title != text {
                    self.props.title = text;
                    self.emit_props();
                }
            }
            b"7" => {
                let text = osc_text(params);
                if self.props.working_dir != text {
                    self.props.working_dir = text;
                    self.emit_props();
                }
            }
            other => trace!(selector = ?other, "ignored OSC sequence"),
        }
    }

    fn hook(&mut self, _params: &vte::Params, _intermediates: &[u8], _ignore: bool, action: char) {
        trace!(action = %action, "ignored DCS sequence");
    }

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut Parser, bytes: &[u8]) {
        parser.input_write(bytes);
    }

    fn row_text(parser: &Parser, row: usize) -> String {
        parser.visible_row(row).map(|r| r.text()).unwrap_or_default()
    }

    fn outputs(events: &[TermEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                TermEvent::Output(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    #[test]
    fn plain_text_advances_cursor() {
        let mut parser = Parser::new(25, 80);
        feed(&mut parser, b"Hello");
        assert_eq!(row_text(&parser, 0), "Hello");
        let cursor = parser.cursor();
        assert_eq!((cursor.row, cursor.col), (0, 5));
    }

    #[test]
    fn crlf_moves_to_next_row() {
        let mut parser = Parser::new(25, 80);
        feed(&mut parser, b"Hello\r\n");
        let cursor = parser.cursor();
        assert_eq!((cursor.row, cursor.col), (1, 0));
    }

    #[test]
    fn cup_is_one_based_and_clamped() {
        let mut parser = Parser::new(10, 20);
        feed(&mut parser, b"\x1b[5;7H");
        assert_eq!((parser.cursor().row, parser.cursor().col), (4, 6));
        feed(&mut parser, b"\x1b[99;99H");
        assert_eq!((parser.cursor().row, parser.cursor().col), (9, 19));
        feed(&mut parser, b"\x1b[H");
        assert_eq!((parser.cursor().row, parser.cursor().col), (0, 0));
    }

    #[test]
    fn relative_moves_clamp_at_edges() {
        let mut parser = Parser::new(5, 5);
        feed(&mut parser, b"\x1b[10A\x1b[10D");
        assert_eq!((parser.cursor().row, parser.cursor().col), (0, 0));
        feed(&mut parser, b"\x1b[10B\x1b[10C");
        assert_eq!((parser.cursor().row, parser.cursor().col), (4, 4));
    }

    #[test]
    fn autowrap_wraps_after_last_column() {
        let mut parser = Parser::new(5, 4);
        feed(&mut parser, b"abcdE");
        assert_eq!(row_text(&parser, 0), "abcd");
        assert_eq!(row_text(&parser, 1), "E");
        assert_eq!((parser.cursor().row, parser.cursor().col), (1, 1));
    }

    #[test]
    fn wide_char_occupies_two_cells() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, "あ".as_bytes());
        let base = parser.cell(0, 0).unwrap();
        assert_eq!(base.ch, 'あ');
        assert_eq!(base.width, 2);
        assert!(parser.cell(0, 1).unwrap().is_wide_companion());
        assert_eq!(parser.cursor().col, 2);
    }

    #[test]
    fn wide_char_never_splits_at_right_edge() {
        let mut parser = Parser::new(5, 4);
        feed(&mut parser, "abcあ".as_bytes());
        // The wide char did not fit in the last column and wrapped whole.
        assert_eq!(row_text(&parser, 0), "abc");
        assert_eq!(row_text(&parser, 1), "あ");
        assert!(parser.cell(1, 1).unwrap().is_wide_companion());
    }

    #[test]
    fn combining_marks_attach_to_previous_cell() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, "e\u{301}".as_bytes());
        let cell = parser.cell(0, 0).unwrap();
        assert_eq!(cell.ch, 'e');
        assert_eq!(cell.combining().collect::<Vec<_>>(), vec!['\u{301}']);
        assert_eq!(parser.cursor().col, 1);
    }

    #[test]
    fn malformed_utf8_becomes_replacement() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, &[0xff, b'x']);
        assert_eq!(parser.cell(0, 0).unwrap().ch, '\u{fffd}');
        assert_eq!(parser.cell(0, 1).unwrap().ch, 'x');
    }

    #[test]
    fn sgr_bold_red_then_reset() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[1;31mX\x1b[0mY");
        let x = parser.cell(0, 0).unwrap();
        assert!(x.attrs.bold);
        assert_eq!(x.fg, Color::Indexed(1));
        let y = parser.cell(0, 1).unwrap();
        assert!(!y.attrs.bold);
        assert_eq!(y.fg, Color::Default);
    }

    #[test]
    fn sgr_256_and_truecolor() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[38;5;123ma\x1b[48;2;10;20;30mb");
        assert_eq!(parser.cell(0, 0).unwrap().fg, Color::Indexed(123));
        assert_eq!(parser.cell(0, 1).unwrap().bg, Color::Rgb(10, 20, 30));
    }

    #[test]
    fn sgr_colon_subparams() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[38:5:200ma");
        assert_eq!(parser.cell(0, 0).unwrap().fg, Color::Indexed(200));
        feed(&mut parser, b"\x1b[4:3mb");
        assert_eq!(
            parser.cell(0, 1).unwrap().attrs.underline,
            UnderlineStyle::Curly
        );
        feed(&mut parser, b"\x1b[4:0mc");
        assert_eq!(
            parser.cell(0, 2).unwrap().attrs.underline,
            UnderlineStyle::None
        );
    }

    #[test]
    fn bright_colors_map_to_upper_indices() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[97;104mZ");
        let z = parser.cell(0, 0).unwrap();
        assert_eq!(z.fg, Color::Indexed(15));
        assert_eq!(z.bg, Color::Indexed(12));
    }

    #[test]
    fn erase_line_variants() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"abcdefghij\x1b[5;1H");
        feed(&mut parser, b"\x1b[1;5H\x1b[K");
        assert_eq!(row_text(&parser, 0), "abcd");
        feed(&mut parser, b"\x1b[1;3H\x1b[1K");
        assert_eq!(row_text(&parser, 0), "   d");
    }

    #[test]
    fn erase_display_clears_screen() {
        let mut parser = Parser::new(3, 10);
        feed(&mut parser, b"one\r\ntwo\r\nthree");
        feed(&mut parser, b"\x1b[2J");
        for row in 0..3 {
            assert_eq!(row_text(&parser, row), "");
        }
    }

    #[test]
    fn scroll_region_confines_linefeed() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"top\x1b[2;4r");
        // Cursor homed by DECSTBM; move into the region and overflow it.
        feed(&mut parser, b"\x1b[2;1Ha\r\nb\r\nc\r\nd\r\ne");
        // Row 0 is outside the region and untouched.
        assert_eq!(row_text(&parser, 0), "top");
        // The region scrolled: the earliest region lines are gone.
        assert_eq!(row_text(&parser, 3), "e");
        assert_eq!(parser.cursor().row, 3);
    }

    #[test]
    fn scroll_up_pushes_scrollback_only_from_row_zero() {
        let mut parser = Parser::new(3, 10);
        feed(&mut parser, b"a\r\nb\r\nc\r\nd");
        parser.flush_damage();
        let events = parser.take_events();
        let pushes: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                TermEvent::ScrollbackPush(row) => Some(row.text()),
                _ => None,
            })
            .collect();
        assert_eq!(pushes, vec!["a"]);

        // Pushes precede damage covering the shifted rows.
        let push_idx = events
            .iter()
            .position(|e| matches!(e, TermEvent::ScrollbackPush(_)))
            .unwrap();
        let damage_idx = events
            .iter()
            .position(|e| matches!(e, TermEvent::Damage(_)))
            .unwrap();
        assert!(push_idx < damage_idx);
    }

    #[test]
    fn alt_screen_suspends_scrollback() {
        let mut parser = Parser::new(3, 10);
        feed(&mut parser, b"\x1b[?1049h");
        feed(&mut parser, b"a\r\nb\r\nc\r\nd\r\ne");
        let events = parser.take_events();
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, TermEvent::ScrollbackPush(_))),
            "alt screen must not feed scrollback"
        );
    }

    #[test]
    fn alt_screen_round_trip_restores_content_and_cursor() {
        let mut parser = Parser::new(5, 20);
        feed(&mut parser, b"primary\x1b[?1049h");
        assert!(parser.props().alt_screen);
        assert_eq!(row_text(&parser, 0), "");
        feed(&mut parser, b"\x1b[2Jalt text\x1b[?1049l");
        assert!(!parser.props().alt_screen);
        assert_eq!(row_text(&parser, 0), "primary");
        assert_eq!(parser.cursor().col, 7);
    }

    #[test]
    fn insert_and_delete_lines_respect_region() {
        let mut parser = Parser::new(4, 10);
        feed(&mut parser, b"a\r\nb\r\nc\r\nd");
        feed(&mut parser, b"\x1b[2;1H\x1b[L");
        assert_eq!(row_text(&parser, 0), "a");
        assert_eq!(row_text(&parser, 1), "");
        assert_eq!(row_text(&parser, 2), "b");
        feed(&mut parser, b"\x1b[M");
        assert_eq!(row_text(&parser, 1), "b");
    }

    #[test]
    fn insert_and_delete_chars() {
        let mut parser = Parser::new(2, 8);
        feed(&mut parser, b"abcdef\x1b[1;2H\x1b[2@");
        assert_eq!(row_text(&parser, 0), "a  bcdef");
        feed(&mut parser, b"\x1b[2P");
        assert_eq!(row_text(&parser, 0), "abcdef");
    }

    #[test]
    fn device_attributes_reply() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[c");
        assert_eq!(outputs(&parser.take_events()), b"\x1b[?6c");
    }

    #[test]
    fn cursor_position_report() {
        let mut parser = Parser::new(10, 20);
        feed(&mut parser, b"\x1b[4;9H\x1b[6n");
        assert_eq!(outputs(&parser.take_events()), b"\x1b[4;9R");
    }

    #[test]
    fn title_and_icon_via_osc() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b]2;hello world\x07");
        assert_eq!(parser.props().title, "hello world");
        feed(&mut parser, b"\x1b]0;both\x1b\\");
        assert_eq!(parser.props().title, "both");
        assert_eq!(parser.props().icon_name, "both");
    }

    #[test]
    fn bracketed_paste_mode_toggles() {
        let mut parser = Parser::new(5, 10);
        assert!(!parser.props().bracketed_paste);
        feed(&mut parser, b"\x1b[?2004h");
        assert!(parser.props().bracketed_paste);
        feed(&mut parser, b"\x1b[?2004l");
        assert!(!parser.props().bracketed_paste);
    }

    #[test]
    fn mouse_mode_progression() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[?1000h");
        assert_eq!(parser.props().mouse_mode, MouseMode::Normal);
        feed(&mut parser, b"\x1b[?1006h");
        assert_eq!(parser.props().mouse_mode, MouseMode::Sgr);
        feed(&mut parser, b"\x1b[?1000l");
        assert_eq!(parser.props().mouse_mode, MouseMode::None);
        feed(&mut parser, b"\x1b[?9h");
        assert_eq!(parser.props().mouse_mode, MouseMode::X10);
    }

    #[test]
    fn cursor_style_sequence() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[5 q");
        assert_eq!(parser.props().cursor_shape, CursorShape::Bar);
        assert!(parser.props().cursor_blink);
        feed(&mut parser, b"\x1b[2 q");
        assert_eq!(parser.props().cursor_shape, CursorShape::Block);
        assert!(!parser.props().cursor_blink);
    }

    #[test]
    fn cursor_visibility_toggles() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[?25l");
        assert!(!parser.cursor().visible);
        feed(&mut parser, b"\x1b[?25h");
        assert!(parser.cursor().visible);
    }

    #[test]
    fn unknown_sequences_leak_nothing() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[99z\x1b]777;x\x07\x1bPq1;2;3\x1b\\ok");
        assert_eq!(row_text(&parser, 0), "ok");
    }

    #[test]
    fn decsc_decrc_round_trip() {
        let mut parser = Parser::new(5, 10);
        feed(&mut parser, b"\x1b[3;4H\x1b7\x1b[H\x1b8");
        assert_eq!((parser.cursor().row, parser.cursor().col), (2, 3));
    }

    #[test]
    fn reverse_index_scrolls_down_at_top() {
        let mut parser = Parser::new(3, 10);
        feed(&mut parser, b"a\r\nb\x1b[H\x1bM");
        assert_eq!(row_text(&parser, 0), "");
        assert_eq!(row_text(&parser, 1), "a");
        assert_eq!(row_text(&parser, 2), "b");
    }

    #[test]
    fn ris_resets_but_keeps_title() {
        let mut parser = Parser::new(3, 10);
        feed(&mut parser, b"\x1b]2;kept\x07text\x1b[?25l\x1bc");
        assert_eq!(row_text(&parser, 0), "");
        assert!(parser.cursor().visible);
        assert_eq!((parser.cursor().row, parser.cursor().col), (0, 0));
        assert_eq!(parser.props().title, "kept");
    }

    #[test]
    fn resize_emits_event_and_keeps_cursor_in_bounds() {
        let mut parser = Parser::new(10, 20);
        feed(&mut parser, b"\x1b[10;20H");
        parser.resize(4, 5);
        assert_eq!((parser.cursor().row, parser.cursor().col), (3, 4));
        let events = parser.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, TermEvent::Resize { rows: 4, cols: 5 })));
    }

    #[test]
    fn damage_flush_coalesces_rows_and_reports_cursor() {
        let mut parser = Parser::new(5, 10);
        parser.flush_damage();
        parser.take_events();

        feed(&mut parser, b"x\r\ny");
        parser.flush_damage();
        let events = parser.take_events();
        let damages: Vec<DamageRect> = events
            .iter()
            .filter_map(|e| match e {
                TermEvent::Damage(rect) => Some(*rect),
                _ => None,
            })
            .collect();
        assert_eq!(damages.len(), 1);
        assert_eq!(damages[0].row_start, 0);
        assert_eq!(damages[0].row_end, 2);
        assert!(events
            .iter()
            .any(|e| matches!(e, TermEvent::MoveCursor { row: 1, col: 1, .. })));
    }

    #[test]
    fn keyboard_key_honors_application_mode() {
        let mut parser = Parser::new(5, 10);
        parser.keyboard_key(NamedKey::Up, Modifiers::NONE);
        assert_eq!(outputs(&parser.take_events()), b"\x1b[A");
        feed(&mut parser, b"\x1b[?1h");
        parser.keyboard_key(NamedKey::Up, Modifiers::NONE);
        assert_eq!(outputs(&parser.take_events()), b"\x1bOA");
    }

    #[test]
    fn mouse_input_respects_mode() {
        let mut parser = Parser::new(5, 10);
        let ev = MouseEvent {
            button: input::MouseButton::Left,
            press: true,
            col: 2,
            row: 1,
            mods: Modifiers::NONE,
        };
        parser.mouse_input(ev);
        assert!(outputs(&parser.take_events()).is_empty());

        feed(&mut parser, b"\x1b[?1000h\x1b[?1006h");
        parser.mouse_input(ev);
        assert_eq!(outputs(&parser.take_events()), b"\x1b[<0;3;2M");
    }
}
