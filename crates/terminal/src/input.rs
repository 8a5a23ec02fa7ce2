//! Key, paste, and mouse translation into the byte sequences shells expect
//!
//! Pure functions; mode-dependent choices (application cursor keys,
//! bracketed paste, mouse encoding) are made by the caller, which knows
//! the parser's current state.

const ESC: u8 = 0x1b;

/// Keyboard modifier state for a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub shift: bool,
    pub alt: bool,
    pub ctrl: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        alt: false,
        ctrl: false,
    };

    pub fn any(&self) -> bool {
        self.shift || self.alt || self.ctrl
    }

    /// The xterm modifier parameter: 1 + shift + 2*alt + 4*ctrl.
    fn param(&self) -> u8 {
        1 + u8::from(self.shift) + 2 * u8::from(self.alt) + 4 * u8::from(self.ctrl)
    }
}

/// Non-printable keys with dedicated escape sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKey {
    Enter,
    Tab,
    Backspace,
    Escape,
    Up,
    Down,
    Right,
    Left,
    Home,
    End,
    Insert,
    Delete,
    PageUp,
    PageDown,
    /// F1..=F12.
    Function(u8),
}

/// Encode a printable character, honoring Ctrl and Alt chords.
pub fn encode_char(c: char, mods: Modifiers) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    if mods.alt {
        out.push(ESC);
    }

    if mods.ctrl {
        if let Some(byte) = ctrl_byte(c) {
            out.push(byte);
            return out;
        }
    }

    let mut utf8 = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    out
}

/// The C0 byte a Ctrl chord produces, if the character has one.
/// Ctrl+A..Ctrl+Z are 1..26; Ctrl+[ is ESC and friends follow the
/// `char & 0x1f` rule.
fn ctrl_byte(c: char) -> Option<u8> {
    match c {
        'a'..='z' => Some(c as u8 - b'a' + 1),
        'A'..='Z' => Some(c as u8 - b'A' + 1),
        '@' | ' ' => Some(0),
        '[' => Some(0x1b),
        '\\' => Some(0x1c),
        ']' => Some(0x1d),
        '^' => Some(0x1e),
        '_' => Some(0x1f),
        '?' => Some(0x7f),
        _ => None,
    }
}

/// Encode a named key. `app_cursor` selects the SS3 variant for the
/// cursor-key group when DECCKM is set and no modifier is held.
pub fn encode_key(key: NamedKey, mods: Modifiers, app_cursor: bool) -> Vec<u8> {
    use NamedKey::*;
    match key {
        Enter => b"\r".to_vec(),
        Tab => {
            if mods.shift {
                b"\x1b[Z".to_vec()
            } else {
                b"\t".to_vec()
            }
        }
        Backspace => vec![0x7f],
        Escape => vec![ESC],
        Up => cursor_key(b'A', mods, app_cursor),
        Down => cursor_key(b'B', mods, app_cursor),
        Right => cursor_key(b'C', mods, app_cursor),
        Left => cursor_key(b'D', mods, app_cursor),
        Home => cursor_key(b'H', mods, app_cursor),
        End => cursor_key(b'F', mods, app_cursor),
        Insert => tilde_key(2, mods),
        Delete => tilde_key(3, mods),
        PageUp => tilde_key(5, mods),
        PageDown => tilde_key(6, mods),
        Function(n @ 1..=4) => {
            let final_byte = b'P' + (n - 1);
            if mods.any() {
                // Modified F1-F4 use the CSI form with parameter 1.
                format!("\x1b[1;{}{}", mods.param(), final_byte as char).into_bytes()
            } else {
                vec![ESC, b'O', final_byte]
            }
        }
        Function(n @ 5..=12) => {
            const CODES: [u8; 8] = [15, 17, 18, 19, 20, 21, 23, 24];
            tilde_key(CODES[usize::from(n) - 5], mods)
        }
        Function(_) => Vec::new(),
    }
}

fn cursor_key(final_byte: u8, mods: Modifiers, app_cursor: bool) -> Vec<u8> {
    if mods.any() {
        format!("\x1b[1;{}{}", mods.param(), final_byte as char).into_bytes()
    } else if app_cursor {
        vec![ESC, b'O', final_byte]
    } else {
        vec![ESC, b'[', final_byte]
    }
}

fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
    if mods.any() {
        format!("\x1b[{};{}~", code, mods.param()).into_bytes()
    } else {
        format!("\x1b[{}~", code).into_bytes()
    }
}

/// Wrap clipboard bytes in bracketed-paste markers when the mode is active;
/// otherwise pass them through untouched. The whole buffer is pasted.
pub fn encode_paste(data: &[u8], bracketed: bool) -> Vec<u8> {
    if !bracketed {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len() + 12);
    out.extend_from_slice(b"\x1b[200~");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\x1b[201~");
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    WheelUp,
    WheelDown,
}

impl MouseButton {
    fn code(self) -> u8 {
        match self {
            MouseButton::Left => 0,
            MouseButton::Middle => 1,
            MouseButton::Right => 2,
            MouseButton::WheelUp => 64,
            MouseButton::WheelDown => 65,
        }
    }

    pub fn is_wheel(self) -> bool {
        matches!(self, MouseButton::WheelUp | MouseButton::WheelDown)
    }
}

/// A mouse press or release at zero-based grid coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub button: MouseButton,
    pub press: bool,
    pub col: u16,
    pub row: u16,
    pub mods: Modifiers,
}

fn modifier_bits(mods: Modifiers) -> u8 {
    4 * u8::from(mods.shift) + 8 * u8::from(mods.alt) + 16 * u8::from(mods.ctrl)
}

/// Legacy `CSI M` encoding shared by X10 and normal tracking.
/// `with_mods` is false for plain X10, which predates modifier reporting.
/// Coordinates past 222 cannot be represented and are clamped.
pub fn encode_mouse_legacy(ev: &MouseEvent, with_mods: bool) -> Vec<u8> {
    let mut code = if ev.press { ev.button.code() } else { 3 };
    if with_mods {
        code |= modifier_bits(ev.mods);
    }
    let cx = ev.col.min(222) as u8 + 1 + 32;
    let cy = ev.row.min(222) as u8 + 1 + 32;
    vec![ESC, b'[', b'M', 32 + code, cx, cy]
}

/// SGR (`CSI <`) encoding: unlimited coordinates, release keeps the button
/// code and ends in `m` instead of `M`.
pub fn encode_mouse_sgr(ev: &MouseEvent) -> Vec<u8> {
    let code = ev.button.code() | modifier_bits(ev.mods);
    let terminator = if ev.press { 'M' } else { 'm' };
    format!(
        "\x1b[<{};{};{}{}",
        code,
        ev.col + 1,
        ev.row + 1,
        terminator
    )
    .into_bytes()
}
