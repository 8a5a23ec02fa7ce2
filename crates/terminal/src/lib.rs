//! Terminal core: PTY, VT parsing, cell grid, and session plumbing
//!
//! The pipeline is: a PTY reader thread pushes raw shell output into a
//! lock-free ring buffer; the UI thread pumps the ring through the VT
//! parser, whose events update the render-facing grid. A [`Session`] wires
//! one of each together per tab and carries the persisted configuration.
//!
//! Rendering, windowing, and clipboard transport live elsewhere; this
//! crate only exposes the dirty-row set, cell data, cursor state, text
//! extraction, and the keystroke/paste/mouse encoders they need.

pub mod cell;
pub mod config;
pub mod grid;
pub mod input;
pub mod parser;
pub mod pty;
pub mod ring;
pub mod screen;
pub mod session;

pub use cell::{Attrs, Cell, Color, Row, UnderlineStyle};
pub use config::{load_sessions, save_sessions, SessionConfig};
pub use grid::{Grid, GridError};
pub use input::{Modifiers, MouseButton, MouseEvent, NamedKey};
pub use parser::{CursorShape, CursorState, DamageRect, MouseMode, Parser, TermEvent, TermProps};
pub use pty::{PtyCallbacks, PtyConfig, PtyError, PtySession, PtyState};
pub use ring::RingBuffer;
pub use session::{Session, SessionError, SessionState};
