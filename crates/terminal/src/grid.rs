//! Render-facing cell grid: visible screen, scrollback, dirty tracking
//!
//! The grid mirrors the parser's active screen and owns the scrollback
//! history. It is not thread-safe; only the UI thread touches it. The
//! renderer reads `dirty_rows()`, iterates cells, and calls `clear_dirty()`
//! after a frame.

use std::collections::VecDeque;

use thiserror::Error;

use crate::cell::{Cell, Color, Row};

#[derive(Error, Debug)]
pub enum GridError {
    #[error("invalid grid geometry: {rows}x{cols}")]
    InvalidGeometry { rows: usize, cols: usize },
}

pub struct Grid {
    rows: usize,
    cols: usize,
    screen: Vec<Row>,
    /// Front = most recently evicted line.
    scrollback: VecDeque<Row>,
    scrollback_cap: usize,
    dirty: Vec<bool>,
    /// Shrinking while the primary screen is shown preserves evicted rows;
    /// the session keeps this in sync with the parser's alt-screen flag.
    alt_screen: bool,
    /// Returned for out-of-range reads.
    empty: Cell,
}

impl Grid {
    pub fn new(rows: usize, cols: usize, scrollback_cap: usize) -> Result<Self, GridError> {
        if rows == 0 || cols == 0 {
            return Err(GridError::InvalidGeometry { rows, cols });
        }
        Ok(Self {
            rows,
            cols,
            screen: (0..rows).map(|_| Row::new(cols)).collect(),
            scrollback: VecDeque::new(),
            scrollback_cap,
            dirty: vec![true; rows],
            alt_screen: false,
            empty: Cell::default(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn scrollback_cap(&self) -> usize {
        self.scrollback_cap
    }

    pub fn set_alt_screen(&mut self, on: bool) {
        self.alt_screen = on;
    }

    /// Change dimensions, preserving content where possible. New columns
    /// pad with default cells; truncation never leaves half of a wide
    /// character. When rows shrink while the primary screen is shown, the
    /// evicted top rows move to scrollback. All dirty bits end up set.
    pub fn resize(&mut self, rows: usize, cols: usize) {
        if rows == 0 || cols == 0 {
            return;
        }
        for row in &mut self.screen {
            row.resize_cols(cols);
        }
        self.cols = cols;

        if rows < self.rows {
            let excess = self.rows - rows;
            if self.alt_screen {
                self.screen.truncate(rows);
            } else {
                for row in self.screen.drain(..excess) {
                    self.scrollback.push_front(row);
                }
                self.trim_scrollback();
            }
        } else {
            while self.screen.len() < rows {
                self.screen.push(Row::new(cols));
            }
        }
        self.rows = rows;
        self.dirty = vec![true; rows];
    }

    // --- cells and rows ---

    /// Cell at (row, col); a shared empty cell when out of range.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.screen
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&self.empty)
    }

    /// Store a cell; silently ignored when out of range.
    pub fn set_cell(&mut self, row: usize, col: usize, cell: Cell) {
        if let Some(slot) = self.screen.get_mut(row).and_then(|r| r.get_mut(col)) {
            *slot = cell;
        }
    }

    pub fn row(&self, row: usize) -> Option<&Row> {
        self.screen.get(row)
    }

    /// Replace a whole row, adjusting its width to the grid. No-op when
    /// out of range.
    pub fn replace_row(&mut self, row: usize, mut new_row: Row) {
        if let Some(slot) = self.screen.get_mut(row) {
            if new_row.len() != self.cols {
                new_row.resize_cols(self.cols);
            }
            *slot = new_row;
        }
    }

    // --- clearing ---

    pub fn clear_range(&mut self, row: usize, col_start: usize, col_end: usize) {
        if let Some(r) = self.screen.get_mut(row) {
            r.clear_range(col_start..col_end, Color::Default);
            r.normalize_pairs();
            self.mark_dirty(row);
        }
    }

    pub fn clear_row(&mut self, row: usize) {
        if let Some(r) = self.screen.get_mut(row) {
            *r = Row::new(self.cols);
            self.mark_dirty(row);
        }
    }

    pub fn clear_screen(&mut self) {
        for r in &mut self.screen {
            *r = Row::new(self.cols);
        }
        self.mark_all_dirty();
    }

    // --- scrolling ---

    /// Scroll rows `top..bottom` (half-open) by `lines`; positive is up.
    /// Lines evicted at row 0 of the primary screen go to scrollback.
    pub fn scroll(&mut self, lines: isize, top: usize, bottom: usize) {
        let bottom = bottom.min(self.rows);
        if top >= bottom || lines == 0 {
            return;
        }
        let span = bottom - top;
        let n = lines.unsigned_abs().min(span);

        if lines > 0 {
            let evicted: Vec<Row> = self.screen.drain(top..top + n).collect();
            if top == 0 && !self.alt_screen {
                for row in evicted {
                    self.scrollback.push_front(row);
                }
                self.trim_scrollback();
            }
            for _ in 0..n {
                self.screen.insert(bottom - n, Row::new(self.cols));
            }
        } else {
            self.screen.drain(bottom - n..bottom);
            for _ in 0..n {
                self.screen.insert(top, Row::new(self.cols));
            }
        }
        for row in top..bottom {
            self.mark_dirty(row);
        }
    }

    // --- scrollback ---

    /// Record a line that left the top of the screen. Front of the deque is
    /// the newest eviction; capacity overflow drops from the back.
    pub fn push_scrollback(&mut self, row: Row) {
        self.scrollback.push_front(row);
        self.trim_scrollback();
    }

    /// Take back the most recently evicted line. Used by UI-driven scroll
    /// only; the parser never asks for this.
    pub fn pop_scrollback(&mut self) -> Option<Row> {
        self.scrollback.pop_front()
    }

    pub fn scrollback_len(&self) -> usize {
        self.scrollback.len()
    }

    /// Scrollback line by recency: index 0 is the newest eviction.
    pub fn scrollback_row(&self, index: usize) -> Option<&Row> {
        self.scrollback.get(index)
    }

    fn trim_scrollback(&mut self) {
        while self.scrollback.len() > self.scrollback_cap {
            self.scrollback.pop_back();
        }
    }

    // --- dirty tracking ---

    pub fn mark_dirty(&mut self, row: usize) {
        if let Some(flag) = self.dirty.get_mut(row) {
            *flag = true;
        }
    }

    pub fn mark_dirty_range(&mut self, rows: std::ops::Range<usize>) {
        let end = rows.end.min(self.rows);
        for flag in &mut self.dirty[rows.start.min(end)..end] {
            *flag = true;
        }
    }

    pub fn mark_all_dirty(&mut self) {
        self.dirty.fill(true);
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.fill(false);
    }

    pub fn is_dirty(&self, row: usize) -> bool {
        self.dirty.get(row).copied().unwrap_or(false)
    }

    /// Indices of rows changed since the last `clear_dirty`.
    pub fn dirty_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.dirty
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| d.then_some(i))
    }

    // --- text extraction ---

    /// Text of one visible row, trailing blanks trimmed.
    pub fn row_text(&self, row: usize) -> String {
        self.screen.get(row).map(Row::text).unwrap_or_default()
    }

    /// Text of a rectangular region (half-open row and column ranges),
    /// rows joined with newlines.
    pub fn region_text(
        &self,
        rows: std::ops::Range<usize>,
        cols: std::ops::Range<usize>,
    ) -> String {
        let end = rows.end.min(self.rows);
        let start = rows.start.min(end);
        let mut lines = Vec::with_capacity(end - start);
        for row in start..end {
            if let Some(r) = self.screen.get(row) {
                lines.push(r.text_range(cols.clone()));
            }
        }
        lines.join("\n")
    }

    /// Scrollback (oldest first) followed by the visible screen, rows
    /// joined with newlines.
    pub fn all_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.scrollback.len() + self.rows);
        for row in self.scrollback.iter().rev() {
            lines.push(row.text());
        }
        for row in &self.screen {
            lines.push(row.text());
        }
        lines.join("\n")
    }
}
