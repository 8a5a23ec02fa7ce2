//! Per-tab session: PTY -> ring -> parser -> grid
//!
//! Composes one PTY session, one ring buffer, one VT parser, and one cell
//! grid. The reader thread only writes into the ring; everything else
//! happens on the UI thread inside [`Session::process_output`], which is
//! why the grid needs no lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::config::SessionConfig;
use crate::grid::{Grid, GridError};
use crate::input::{self, Modifiers, MouseEvent, NamedKey};
use crate::parser::{CursorShape, CursorState, Parser, TermEvent};
use crate::pty::{PtyCallbacks, PtyConfig, PtyError, PtySession};
use crate::ring::RingBuffer;

/// Ring between the reader thread and the UI thread.
const RING_CAPACITY: usize = 64 * 1024;

/// Pump granularity; matches the PTY read chunk.
const DRAIN_CHUNK: usize = 4096;

/// Backoff while the ring is full and the parser has not caught up.
const RING_FULL_BACKOFF: Duration = Duration::from_micros(100);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session is already running")]
    AlreadyRunning,

    #[error("invalid geometry: {rows}x{cols}")]
    InvalidGeometry { rows: usize, cols: usize },

    #[error(transparent)]
    Pty(#[from] PtyError),
}

impl From<GridError> for SessionError {
    fn from(e: GridError) -> Self {
        match e {
            GridError::InvalidGeometry { rows, cols } => SessionError::InvalidGeometry { rows, cols },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Exited(u32),
}

/// One terminal tab.
pub struct Session {
    config: SessionConfig,
    state: SessionState,

    pty: Option<PtySession>,
    ring: Option<Arc<RingBuffer>>,
    parser: Option<Parser>,
    grid: Option<Grid>,

    cursor: CursorState,
    title: String,

    /// Tells the reader-side ring retry loop to give up during stop.
    stop_flag: Arc<AtomicBool>,
    /// Exit code recorded by the reader thread, observed by the pump.
    pending_exit: Arc<Mutex<Option<u32>>>,

    on_title: Option<Box<dyn FnMut(&str)>>,
    on_exit: Option<Box<dyn FnMut(u32)>>,
    on_bell: Option<Box<dyn FnMut()>>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let title = config.title.clone();
        Self {
            config,
            state: SessionState::Idle,
            pty: None,
            ring: None,
            parser: None,
            grid: None,
            cursor: CursorState {
                row: 0,
                col: 0,
                visible: true,
                blink: true,
                shape: CursorShape::Block,
            },
            title,
            stop_flag: Arc::new(AtomicBool::new(false)),
            pending_exit: Arc::new(Mutex::new(None)),
            on_title: None,
            on_exit: None,
            on_bell: None,
        }
    }

    /// Rebuild a session from a persisted document.
    pub fn deserialize(doc: &serde_json::Value) -> Self {
        Self::new(SessionConfig::from_json(doc))
    }

    /// The persisted form of this session.
    pub fn serialize(&self) -> serde_json::Value {
        self.config.to_json()
    }

    pub fn set_title_callback(&mut self, f: impl FnMut(&str) + 'static) {
        self.on_title = Some(Box::new(f));
    }

    pub fn set_exit_callback(&mut self, f: impl FnMut(u32) + 'static) {
        self.on_exit = Some(Box::new(f));
    }

    pub fn set_bell_callback(&mut self, f: impl FnMut() + 'static) {
        self.on_bell = Some(Box::new(f));
    }

    /// Allocate the pipeline and spawn the shell. Idle -> Running.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Running {
            return Err(SessionError::AlreadyRunning);
        }

        let rows = usize::from(self.config.rows);
        let cols = usize::from(self.config.cols);
        let grid = Grid::new(rows, cols, self.config.scrollback_lines)?;
        let ring = Arc::new(RingBuffer::new(RING_CAPACITY));
        let parser = Parser::new(rows, cols);

        self.stop_flag = Arc::new(AtomicBool::new(false));
        self.pending_exit = Arc::new(Mutex::new(None));

        // Reader thread -> ring, retrying with a brief sleep on backpressure
        // until stop is requested.
        let producer = Arc::clone(&ring);
        let stop = Arc::clone(&self.stop_flag);
        let exit_slot = Arc::clone(&self.pending_exit);
        let error_exit_slot = Arc::clone(&self.pending_exit);
        let callbacks = PtyCallbacks::default()
            .on_output(move |bytes| {
                let mut offset = 0;
                while offset < bytes.len() && !stop.load(Ordering::Relaxed) {
                    let n = producer.write(&bytes[offset..]);
                    if n == 0 {
                        std::thread::sleep(RING_FULL_BACKOFF);
                    }
                    offset += n;
                }
            })
            .on_exit(move |code| {
                if let Ok(mut slot) = exit_slot.lock() {
                    *slot = Some(code);
                }
            })
            .on_error(move |err| {
                tracing::warn!(%err, "PTY reader error");
                // The reader reports the synthetic code through on_exit as
                // well; keep the slot populated even if that path changes.
                if let Ok(mut slot) = error_exit_slot.lock() {
                    slot.get_or_insert(err.raw_os_error().unwrap_or(0) as u32);
                }
            });

        let pty_config = PtyConfig {
            shell: self.config.shell.clone(),
            args: self.config.arg_list(),
            working_dir: if self.config.working_dir.is_empty() {
                None
            } else {
                Some(self.config.working_dir.clone().into())
            },
            cols: self.config.cols,
            rows: self.config.rows,
        };

        let mut pty = PtySession::new();
        pty.start(&pty_config, callbacks)?;

        self.pty = Some(pty);
        self.ring = Some(ring);
        self.parser = Some(parser);
        self.grid = Some(grid);
        self.state = SessionState::Running;
        tracing::debug!(shell = %self.config.shell, rows, cols, "session started");
        Ok(())
    }

    /// Stop the shell and release the PTY. The grid keeps its last
    /// contents so the UI can still show them.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(mut pty) = self.pty.take() {
            pty.stop();
        }
        if self.state == SessionState::Running {
            self.state = SessionState::Idle;
            tracing::debug!("session stopped");
        }
    }

    /// UI-thread pump: drain the ring into the parser, flush damage, and
    /// apply the parser's events to the grid. Returns bytes processed.
    /// Non-blocking; returns immediately when there is nothing to do.
    pub fn process_output(&mut self) -> usize {
        let mut total = 0;
        if let (Some(ring), Some(parser)) = (&self.ring, &mut self.parser) {
            let mut buf = [0u8; DRAIN_CHUNK];
            loop {
                let n = ring.read(&mut buf);
                if n == 0 {
                    break;
                }
                parser.input_write(&buf[..n]);
                total += n;
            }
            parser.flush_damage();
        }

        self.apply_parser_events();
        self.observe_exit();
        total
    }

    /// Forward user bytes to the shell. Only meaningful while running.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if self.state != SessionState::Running {
            return 0;
        }
        match &self.pty {
            Some(pty) => pty.write(bytes).unwrap_or(0),
            None => 0,
        }
    }

    /// Paste clipboard text, honoring bracketed-paste mode.
    pub fn paste(&mut self, data: &[u8]) -> usize {
        let bracketed = self
            .parser
            .as_ref()
            .map(|p| p.props().bracketed_paste)
            .unwrap_or(false);
        let bytes = input::encode_paste(data, bracketed);
        self.write(&bytes)
    }

    /// A printable keystroke (also the IME commit path).
    pub fn char_input(&mut self, c: char, mods: Modifiers) {
        if let Some(parser) = &mut self.parser {
            parser.keyboard_unichar(c, mods);
        }
        self.apply_parser_events();
    }

    /// A named key (arrows, editing keys, function keys).
    pub fn key_input(&mut self, key: NamedKey, mods: Modifiers) {
        if let Some(parser) = &mut self.parser {
            parser.keyboard_key(key, mods);
        }
        self.apply_parser_events();
    }

    /// A mouse event; encoded only when the shell enabled reporting.
    pub fn mouse_input(&mut self, ev: MouseEvent) {
        if let Some(parser) = &mut self.parser {
            parser.mouse_input(ev);
        }
        self.apply_parser_events();
    }

    /// Propagate a new size: PTY first (so the shell sees the winch before
    /// it emits further output), then parser, then grid.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if rows == 0 || cols == 0 {
            return Err(SessionError::InvalidGeometry {
                rows: usize::from(rows),
                cols: usize::from(cols),
            });
        }

        if let Some(pty) = &mut self.pty {
            pty.resize(cols, rows)?;
        }
        if let Some(parser) = &mut self.parser {
            parser.resize(usize::from(rows), usize::from(cols));
        }
        if let Some(grid) = &mut self.grid {
            grid.resize(usize::from(rows), usize::from(cols));
        }
        self.config.rows = rows;
        self.config.cols = cols;
        self.apply_parser_events();
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn exit_code(&self) -> Option<u32> {
        match self.state {
            SessionState::Exited(code) => Some(code),
            _ => None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The grid the renderer reads. Present once started.
    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    pub fn grid_mut(&mut self) -> Option<&mut Grid> {
        self.grid.as_mut()
    }

    pub fn parser(&self) -> Option<&Parser> {
        self.parser.as_ref()
    }

    pub fn cursor(&self) -> CursorState {
        self.cursor
    }

    pub fn pid(&self) -> Option<u32> {
        self.pty.as_ref().and_then(|p| p.pid())
    }

    /// Drain the parser's event queue into the grid and the PTY.
    fn apply_parser_events(&mut self) {
        let events = match &mut self.parser {
            Some(parser) => parser.take_events(),
            None => return,
        };

        for event in events {
            match event {
                TermEvent::Damage(rect) => {
                    self.copy_rows(rect.row_start, rect.row_end);
                }
                TermEvent::MoveRect { dest, src } => {
                    // The grid is refreshed by copying rows, so both
                    // rectangles are treated as damage.
                    self.copy_rows(dest.row_start, dest.row_end);
                    self.copy_rows(src.row_start, src.row_end);
                }
                TermEvent::MoveCursor { row, col, visible } => {
                    self.cursor.row = row;
                    self.cursor.col = col;
                    self.cursor.visible = visible;
                }
                TermEvent::SetProp(props) => {
                    self.cursor.visible = props.cursor_visible;
                    self.cursor.blink = props.cursor_blink;
                    self.cursor.shape = props.cursor_shape;
                    if let Some(grid) = &mut self.grid {
                        grid.set_alt_screen(props.alt_screen);
                    }
                    if props.title != self.title {
                        self.title = props.title.clone();
                        self.config.title = props.title.clone();
                        if let Some(cb) = &mut self.on_title {
                            cb(&props.title);
                        }
                    }
                }
                TermEvent::Bell => {
                    if let Some(cb) = &mut self.on_bell {
                        cb();
                    }
                }
                TermEvent::Resize { .. } => {
                    // Acknowledgement only; the grid was resized in lockstep.
                }
                TermEvent::ScrollbackPush(row) => {
                    if let Some(grid) = &mut self.grid {
                        grid.push_scrollback(row);
                    }
                }
                TermEvent::Output(bytes) => {
                    if let Some(pty) = &self.pty {
                        if let Err(e) = pty.write(&bytes) {
                            tracing::warn!(%e, "failed to write parser reply");
                        }
                    }
                }
            }
        }
    }

    /// Mirror parser rows `[start, end)` into the grid and mark them dirty.
    fn copy_rows(&mut self, start: usize, end: usize) {
        let (Some(parser), Some(grid)) = (&self.parser, &mut self.grid) else {
            return;
        };
        for row in start..end {
            if let Some(source) = parser.visible_row(row) {
                grid.replace_row(row, source.clone());
                grid.mark_dirty(row);
            }
        }
    }

    /// Latch a recorded child exit: Running -> Exited, release the PTY,
    /// and tell the UI.
    fn observe_exit(&mut self) {
        let code = match self.pending_exit.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(code) = code else {
            return;
        };

        if let Some(mut pty) = self.pty.take() {
            pty.stop();
        }
        self.state = SessionState::Exited(code);
        tracing::debug!(code, "session exited");
        if let Some(cb) = &mut self.on_exit {
            cb(code);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_session(rows: u16, cols: u16) -> Session {
        // Build the pipeline without spawning a shell: parser + grid only,
        // which is all the data path needs.
        let mut session = Session::new(SessionConfig {
            rows,
            cols,
            ..SessionConfig::default()
        });
        session.parser = Some(Parser::new(usize::from(rows), usize::from(cols)));
        session.grid = Some(
            Grid::new(usize::from(rows), usize::from(cols), 100).expect("geometry"),
        );
        session.ring = Some(Arc::new(RingBuffer::new(RING_CAPACITY)));
        session
    }

    fn feed(session: &mut Session, bytes: &[u8]) {
        session
            .ring
            .as_ref()
            .expect("ring")
            .write(bytes);
        session.process_output();
    }

    #[test]
    fn new_session_is_idle() {
        let session = Session::new(SessionConfig::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.grid().is_none());
        assert!(session.exit_code().is_none());
    }

    #[test]
    fn pump_moves_bytes_into_grid() {
        let mut session = offline_session(25, 80);
        feed(&mut session, b"Hello\r\nWorld");
        let grid = session.grid().expect("grid");
        assert_eq!(grid.row_text(0), "Hello");
        assert_eq!(grid.row_text(1), "World");
        assert_eq!((session.cursor().row, session.cursor().col), (1, 5));
    }

    #[test]
    fn pump_marks_damaged_rows_dirty() {
        let mut session = offline_session(10, 20);
        session.grid_mut().expect("grid").clear_dirty();
        feed(&mut session, b"x");
        let grid = session.grid().expect("grid");
        assert!(grid.is_dirty(0));
        assert!(!grid.is_dirty(5));
    }

    #[test]
    fn title_change_fires_callback() {
        let observed = std::rc::Rc::new(std::cell::RefCell::new(String::new()));
        let sink = std::rc::Rc::clone(&observed);

        let mut session = offline_session(5, 20);
        session.set_title_callback(move |title| {
            *sink.borrow_mut() = title.to_string();
        });
        feed(&mut session, b"\x1b]2;new title\x07");
        assert_eq!(*observed.borrow(), "new title");
        assert_eq!(session.title(), "new title");
        assert_eq!(session.config().title, "new title");
    }

    #[test]
    fn bell_fires_callback() {
        let rang = std::rc::Rc::new(std::cell::Cell::new(0u32));
        let counter = std::rc::Rc::clone(&rang);

        let mut session = offline_session(5, 20);
        session.set_bell_callback(move || counter.set(counter.get() + 1));
        feed(&mut session, b"\x07\x07");
        assert_eq!(rang.get(), 2);
    }

    #[test]
    fn scrollback_flows_into_grid() {
        let mut session = offline_session(3, 10);
        feed(&mut session, b"a\r\nb\r\nc\r\nd\r\ne");
        let grid = session.grid().expect("grid");
        assert_eq!(grid.scrollback_len(), 2);
        assert_eq!(grid.scrollback_row(0).unwrap().text(), "b");
        assert_eq!(grid.scrollback_row(1).unwrap().text(), "a");
        assert_eq!(grid.row_text(0), "c");
    }

    #[test]
    fn alt_screen_flag_reaches_grid() {
        let mut session = offline_session(3, 10);
        feed(&mut session, b"\x1b[?1049h");
        // Scrolling on the alt screen must not grow scrollback even via
        // grid-side operations.
        feed(&mut session, b"a\r\nb\r\nc\r\nd");
        assert_eq!(session.grid().expect("grid").scrollback_len(), 0);
    }

    #[test]
    fn write_requires_running() {
        let mut session = offline_session(5, 20);
        assert_eq!(session.write(b"ls\r"), 0);
    }

    #[test]
    fn serialize_round_trip() {
        let config = SessionConfig {
            shell: "/bin/zsh".into(),
            title: "tab 1".into(),
            tab_index: 2,
            ..SessionConfig::default()
        };
        let session = Session::new(config.clone());
        let doc = session.serialize();
        let restored = Session::deserialize(&doc);
        assert_eq!(restored.config(), &config);
    }

    #[test]
    fn resize_rejects_zero() {
        let mut session = offline_session(5, 20);
        assert!(matches!(
            session.resize(0, 10),
            Err(SessionError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn resize_updates_all_layers() {
        let mut session = offline_session(5, 20);
        session.resize(40, 12).unwrap();
        assert_eq!(session.config().cols, 40);
        assert_eq!(session.config().rows, 12);
        let grid = session.grid().expect("grid");
        assert_eq!((grid.rows(), grid.cols()), (12, 40));
        let parser = session.parser().expect("parser");
        assert_eq!((parser.rows(), parser.cols()), (12, 40));
        // Resize leaves everything dirty for the next frame.
        assert_eq!(grid.dirty_rows().count(), 12);
    }

    #[test]
    fn exit_observation_transitions_state() {
        let mut session = offline_session(5, 20);
        session.state = SessionState::Running;
        let observed = std::rc::Rc::new(std::cell::Cell::new(None));
        let sink = std::rc::Rc::clone(&observed);
        session.set_exit_callback(move |code| sink.set(Some(code)));

        *session.pending_exit.lock().unwrap() = Some(3);
        session.process_output();
        assert_eq!(session.state(), SessionState::Exited(3));
        assert_eq!(session.exit_code(), Some(3));
        assert_eq!(observed.get(), Some(3));
    }
}
