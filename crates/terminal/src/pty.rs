//! PTY (pseudo-terminal) management
//!
//! Owns the PTY controller, the shell child process, and the reader
//! thread that pumps shell output to the session. `write`, `resize`, and
//! `stop` are safe to call after a successful `start`; `start` and `stop`
//! are not reentrant.
//!
//! The reader thread blocks in `poll(2)` over the controller fd and a
//! wake pipe. `stop` writes the wake byte, which is the defined way to
//! unblock it; a broken controller (child exited) surfaces as EOF or
//! `EIO` and ends the loop through the exit path.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rustix::io::FdFlags;
use rustix::termios::{tcsetwinsize, Winsize};
use thiserror::Error;

/// One blocking read per loop iteration moves at most this much.
const READ_CHUNK: usize = 4096;

/// Bound on waiting for the reader thread during `stop`.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("session is already running")]
    AlreadyRunning,

    #[error("failed to create wake pipe: {0}")]
    Pipe(std::io::Error),

    #[error("failed to open PTY: {0}")]
    Open(std::io::Error),

    #[error("failed to spawn shell: {0}")]
    Spawn(std::io::Error),

    #[error("failed to write to PTY: {0}")]
    Write(std::io::Error),

    #[error("failed to set window size: {0}")]
    Resize(rustix::io::Errno),
}

/// Lifecycle of one PTY session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyState {
    Idle,
    Running,
    Exited,
}

/// What to launch and at which size.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub shell: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
}

/// Callbacks invoked from the reader thread. Registered at `start`.
pub struct PtyCallbacks {
    pub output: Box<dyn FnMut(&[u8]) + Send>,
    pub exit: Box<dyn FnMut(u32) + Send>,
    pub error: Box<dyn FnMut(std::io::Error) + Send>,
}

impl Default for PtyCallbacks {
    fn default() -> Self {
        Self {
            output: Box::new(|_| {}),
            exit: Box::new(|_| {}),
            error: Box::new(|_| {}),
        }
    }
}

impl PtyCallbacks {
    pub fn on_output(mut self, f: impl FnMut(&[u8]) + Send + 'static) -> Self {
        self.output = Box::new(f);
        self
    }

    pub fn on_exit(mut self, f: impl FnMut(u32) + Send + 'static) -> Self {
        self.exit = Box::new(f);
        self
    }

    pub fn on_error(mut self, f: impl FnMut(std::io::Error) + Send + 'static) -> Self {
        self.error = Box::new(f);
        self
    }
}

/// PTY session for a single terminal.
pub struct PtySession {
    /// Controller side of the PTY (for writing; the reader thread owns a dup).
    master: Option<File>,

    /// Child shell process, shared with the reader thread for reaping.
    child: Option<Arc<Mutex<Child>>>,

    reader: Option<JoinHandle<()>>,

    /// Write end of the wake pipe; one byte here unblocks the reader.
    wake_tx: Option<OwnedFd>,

    shutdown: Arc<AtomicBool>,
    state: Arc<Mutex<PtyState>>,
    last_error: Arc<Mutex<Option<String>>>,

    pid: Option<u32>,
    cols: u16,
    rows: u16,
}

impl Default for PtySession {
    fn default() -> Self {
        Self::new()
    }
}

impl PtySession {
    pub fn new() -> Self {
        Self {
            master: None,
            child: None,
            reader: None,
            wake_tx: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(PtyState::Idle)),
            last_error: Arc::new(Mutex::new(None)),
            pid: None,
            cols: 0,
            rows: 0,
        }
    }

    /// Spawn the shell on a fresh PTY and launch the reader thread.
    ///
    /// On error no resources remain allocated. Not reentrant: a running
    /// session must be stopped first.
    pub fn start(&mut self, config: &PtyConfig, callbacks: PtyCallbacks) -> Result<(), PtyError> {
        if self.state() == PtyState::Running {
            return Err(PtyError::AlreadyRunning);
        }

        let winsize = Winsize {
            ws_row: config.rows,
            ws_col: config.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        let (wake_rx, wake_tx) = wake_pipe().map_err(PtyError::Pipe)?;

        // Open PTY controller/user pair
        let master_fd =
            rustix::pty::openpt(rustix::pty::OpenptFlags::RDWR | rustix::pty::OpenptFlags::NOCTTY)
                .map_err(|e| PtyError::Open(std::io::Error::from_raw_os_error(e.raw_os_error())))?;

        // Grant access and unlock
        rustix::pty::grantpt(&master_fd)
            .map_err(|e| PtyError::Open(std::io::Error::from_raw_os_error(e.raw_os_error())))?;
        rustix::pty::unlockpt(&master_fd)
            .map_err(|e| PtyError::Open(std::io::Error::from_raw_os_error(e.raw_os_error())))?;

        // The parent-retained end must not leak into children.
        rustix::io::fcntl_setfd(&master_fd, FdFlags::CLOEXEC)
            .map_err(|e| PtyError::Open(std::io::Error::from_raw_os_error(e.raw_os_error())))?;

        // Get the user-side name
        let slave_name_buf = [0u8; 256];
        let slave_name = rustix::pty::ptsname(&master_fd, slave_name_buf)
            .map_err(|e| PtyError::Open(std::io::Error::from_raw_os_error(e.raw_os_error())))?;
        let slave_path = slave_name.to_str().map_err(|_| {
            PtyError::Open(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid PTY name",
            ))
        })?;

        tcsetwinsize(&master_fd, winsize).map_err(PtyError::Resize)?;

        // Open the user side and transfer ownership to a raw fd
        let slave = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(slave_path)
            .map_err(PtyError::Open)?;
        let slave_fd = slave.into_raw_fd();

        // Dup the fd for stdout and stderr so each Stdio owns a unique fd
        let slave_fd_out = unsafe { libc::dup(slave_fd) };
        let slave_fd_err = unsafe { libc::dup(slave_fd) };
        if slave_fd_out < 0 || slave_fd_err < 0 {
            unsafe {
                libc::close(slave_fd);
                if slave_fd_out >= 0 {
                    libc::close(slave_fd_out);
                }
            }
            return Err(PtyError::Open(std::io::Error::last_os_error()));
        }

        let mut cmd = Command::new(&config.shell);
        cmd.args(&config.args).env("TERM", "xterm-256color");
        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let child = unsafe {
            cmd.stdin(Stdio::from_raw_fd(slave_fd))
                .stdout(Stdio::from_raw_fd(slave_fd_out))
                .stderr(Stdio::from_raw_fd(slave_fd_err))
                .pre_exec(move || {
                    // Create a new session and take the controlling terminal
                    libc::setsid();
                    libc::ioctl(slave_fd, libc::TIOCSCTTY, 0);
                    Ok(())
                })
                .spawn()
                .map_err(PtyError::Spawn)?
        };
        let pid = child.id();

        // Transfer ownership from OwnedFd to File
        let master = unsafe { File::from_raw_fd(master_fd.as_raw_fd()) };
        std::mem::forget(master_fd);

        // The reader thread gets its own handle on the controller
        let reader_fd = unsafe { libc::dup(master.as_raw_fd()) };
        if reader_fd < 0 {
            let err = std::io::Error::last_os_error();
            let mut child = child;
            let _ = child.kill();
            let _ = child.wait();
            return Err(PtyError::Open(err));
        }
        let reader_fd = unsafe { OwnedFd::from_raw_fd(reader_fd) };
        let _ = rustix::io::fcntl_setfd(&reader_fd, FdFlags::CLOEXEC);

        let child = Arc::new(Mutex::new(child));
        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(PtyState::Running));

        let reader = {
            let child = Arc::clone(&child);
            let shutdown = Arc::clone(&shutdown);
            let state = Arc::clone(&state);
            std::thread::Builder::new()
                .name("pty-reader".into())
                .spawn(move || reader_loop(reader_fd, wake_rx, child, shutdown, callbacks, state))
        };
        let reader = match reader {
            Ok(handle) => handle,
            Err(e) => {
                if let Ok(mut child) = child.lock() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(PtyError::Spawn(e));
            }
        };

        self.shutdown = shutdown;
        self.state = state;
        if let Ok(mut err) = self.last_error.lock() {
            *err = None;
        }

        tracing::debug!(pid, shell = %config.shell, cols = config.cols, rows = config.rows, "shell spawned");

        self.master = Some(master);
        self.child = Some(child);
        self.reader = Some(reader);
        self.wake_tx = Some(wake_tx);
        self.pid = Some(pid);
        self.cols = config.cols;
        self.rows = config.rows;
        Ok(())
    }

    /// Unblock and join the reader, terminate the child if still alive,
    /// and release every handle. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.master.is_none() && self.reader.is_none() {
            return;
        }

        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(wake) = &self.wake_tx {
            let _ = rustix::io::write(wake, b"w");
        }

        if let Some(handle) = self.reader.take() {
            let deadline = Instant::now() + JOIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("reader thread did not stop in time; detaching");
                self.record_error("reader thread join timed out");
            }
        }

        if let Some(child) = self.child.take() {
            if let Ok(mut child) = child.lock() {
                terminate_child(&mut child);
            }
        }

        self.master = None;
        self.wake_tx = None;
        self.pid = None;

        if let Ok(mut state) = self.state.lock() {
            if *state == PtyState::Running {
                *state = PtyState::Idle;
            }
        }
    }

    /// Blocking write to the PTY input. Returns the bytes written; short
    /// counts are possible and the caller decides whether to retry.
    pub fn write(&self, bytes: &[u8]) -> Result<usize, PtyError> {
        let Some(master) = &self.master else {
            return Err(PtyError::Write(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "PTY not started",
            )));
        };
        let mut writer: &File = master;
        match writer.write(bytes) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.record_error(&format!("PTY write failed: {e}"));
                Err(PtyError::Write(e))
            }
        }
    }

    /// Propagate a new size to the PTY and signal the child.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), PtyError> {
        let Some(master) = &self.master else {
            return Ok(());
        };
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        tcsetwinsize(master.as_fd(), winsize).map_err(PtyError::Resize)?;
        self.cols = cols;
        self.rows = rows;

        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(pid as i32, libc::SIGWINCH);
            }
        }
        Ok(())
    }

    pub fn state(&self) -> PtyState {
        self.state.lock().map(|s| *s).unwrap_or(PtyState::Idle)
    }

    pub fn is_running(&self) -> bool {
        self.state() == PtyState::Running
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current size as (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// Controller fd for external polling, while running.
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.master.as_ref().map(|m| m.as_raw_fd())
    }

    fn record_error(&self, msg: &str) {
        if let Ok(mut err) = self.last_error.lock() {
            *err = Some(msg.to_string());
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn wake_pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    let rx = unsafe { OwnedFd::from_raw_fd(fds[0]) };
    let tx = unsafe { OwnedFd::from_raw_fd(fds[1]) };
    for fd in [&rx, &tx] {
        rustix::io::fcntl_setfd(fd, FdFlags::CLOEXEC)
            .map_err(|e| std::io::Error::from_raw_os_error(e.raw_os_error()))?;
    }
    Ok((rx, tx))
}

fn reader_loop(
    fd: OwnedFd,
    wake_rx: OwnedFd,
    child: Arc<Mutex<Child>>,
    shutdown: Arc<AtomicBool>,
    mut callbacks: PtyCallbacks,
    state: Arc<Mutex<PtyState>>,
) {
    let mut buf = [0u8; READ_CHUNK];

    let exit_code: Option<u32> = loop {
        if shutdown.load(Ordering::Relaxed) {
            break None;
        }

        let mut pfds = [
            libc::pollfd {
                fd: fd.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let rc = unsafe { libc::poll(pfds.as_mut_ptr(), 2, -1) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            let code = err.raw_os_error().unwrap_or(0) as u32;
            (callbacks.error)(err);
            break Some(code);
        }
        if pfds[1].revents != 0 {
            break None;
        }
        if pfds[0].revents == 0 {
            continue;
        }

        match rustix::io::read(&fd, &mut buf) {
            Ok(0) => break reap(&child),
            Ok(n) => (callbacks.output)(&buf[..n]),
            Err(rustix::io::Errno::INTR) => continue,
            // A PTY whose child side is gone reports EIO; this is the
            // normal end of stream, not a failure.
            Err(rustix::io::Errno::IO) => break reap(&child),
            Err(errno) => {
                let code = errno.raw_os_error() as u32;
                let err = std::io::Error::from_raw_os_error(errno.raw_os_error());
                tracing::warn!(%err, "PTY reader failed");
                (callbacks.error)(err);
                break Some(code);
            }
        }
    };

    if let Some(code) = exit_code {
        if let Ok(mut state) = state.lock() {
            *state = PtyState::Exited;
        }
        tracing::debug!(code, "shell exited");
        (callbacks.exit)(code);
    }
}

/// After EOF the child should already be gone; wait briefly for its status.
/// `None` means it is somehow still alive, in which case `stop` deals
/// with it and no exit is reported.
fn reap(child: &Arc<Mutex<Child>>) -> Option<u32> {
    let deadline = Instant::now() + Duration::from_millis(500);
    loop {
        let status = child
            .lock()
            .ok()
            .and_then(|mut c| c.try_wait().ok().flatten());
        if let Some(status) = status {
            return Some(exit_code_of(status));
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn exit_code_of(status: ExitStatus) -> u32 {
    match status.code() {
        Some(code) => code as u32,
        // Killed by a signal: report the shell convention 128 + signo.
        None => 128 + status.signal().unwrap_or(0) as u32,
    }
}

/// SIGHUP first so shells can save history, SIGKILL if that is ignored.
fn terminate_child(child: &mut Child) {
    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    unsafe {
        libc::kill(child.id() as i32, libc::SIGHUP);
    }

    let deadline = Instant::now() + Duration::from_millis(500);
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10));
            }
            _ => break,
        }
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_config(args: &[&str]) -> PtyConfig {
        PtyConfig {
            shell: "/bin/sh".to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            working_dir: None,
            cols: 80,
            rows: 24,
        }
    }

    #[test]
    fn starts_idle() {
        let pty = PtySession::new();
        assert_eq!(pty.state(), PtyState::Idle);
        assert!(pty.pid().is_none());
        assert!(pty.as_raw_fd().is_none());
    }

    #[test]
    fn write_before_start_fails() {
        let pty = PtySession::new();
        assert!(matches!(pty.write(b"x"), Err(PtyError::Write(_))));
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let mut pty = PtySession::new();
        pty.stop();
        assert_eq!(pty.state(), PtyState::Idle);
    }

    #[test]
    fn spawn_echo_and_collect_output() {
        // This test requires a working PTY, skip in CI if not available
        if std::env::var("CI").is_ok() {
            return;
        }

        let collected = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink = Arc::clone(&collected);
        let callbacks = PtyCallbacks::default().on_output(move |bytes| {
            if let Ok(mut out) = sink.lock() {
                out.extend_from_slice(bytes);
            }
        });

        let mut pty = PtySession::new();
        pty.start(&sh_config(&["-c", "echo pty_round_trip_ok"]), callbacks)
            .unwrap();
        assert_eq!(pty.state(), PtyState::Running);
        assert!(pty.pid().is_some());

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            {
                let out = collected.lock().unwrap();
                if String::from_utf8_lossy(&out).contains("pty_round_trip_ok") {
                    break;
                }
            }
            assert!(Instant::now() < deadline, "no output from shell");
            std::thread::sleep(Duration::from_millis(20));
        }
        pty.stop();
    }

    #[test]
    fn exit_code_is_reported() {
        if std::env::var("CI").is_ok() {
            return;
        }

        let code = Arc::new(Mutex::new(None::<u32>));
        let slot = Arc::clone(&code);
        let callbacks = PtyCallbacks::default().on_exit(move |c| {
            if let Ok(mut slot) = slot.lock() {
                *slot = Some(c);
            }
        });

        let mut pty = PtySession::new();
        pty.start(&sh_config(&["-c", "exit 7"]), callbacks).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(c) = *code.lock().unwrap() {
                assert_eq!(c, 7);
                break;
            }
            assert!(Instant::now() < deadline, "exit callback never fired");
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(pty.state(), PtyState::Exited);
        pty.stop();
    }

    #[test]
    fn start_twice_is_rejected() {
        if std::env::var("CI").is_ok() {
            return;
        }

        let mut pty = PtySession::new();
        pty.start(&sh_config(&["-c", "sleep 5"]), PtyCallbacks::default())
            .unwrap();
        let second = pty.start(&sh_config(&[]), PtyCallbacks::default());
        assert!(matches!(second, Err(PtyError::AlreadyRunning)));
        pty.stop();
        assert_eq!(pty.state(), PtyState::Idle);
    }

    #[test]
    fn resize_updates_cached_size() {
        if std::env::var("CI").is_ok() {
            return;
        }

        let mut pty = PtySession::new();
        pty.start(&sh_config(&["-c", "sleep 5"]), PtyCallbacks::default())
            .unwrap();
        assert_eq!(pty.size(), (80, 24));
        pty.resize(100, 42).unwrap();
        assert_eq!(pty.size(), (100, 42));
        pty.stop();
    }

    #[test]
    fn missing_shell_fails_cleanly() {
        let mut pty = PtySession::new();
        let config = PtyConfig {
            shell: "/definitely/not/a/shell".to_string(),
            args: Vec::new(),
            working_dir: None,
            cols: 80,
            rows: 24,
        };
        let result = pty.start(&config, PtyCallbacks::default());
        assert!(matches!(result, Err(PtyError::Spawn(_))));
        assert_eq!(pty.state(), PtyState::Idle);
        assert!(pty.as_raw_fd().is_none());
    }
}
