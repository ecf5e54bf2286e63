//! Session log for MaskEdit.
//!
//! One plain-text file, **truncated every launch**: it describes the
//! current window only (image loads, strokes committed, requests sent and
//! how they ended). Nothing about the mask or prompt outlives the session,
//! so neither does the log.
//!
//!   Windows:  `%APPDATA%\MaskEdit\maskedit.log`
//!   macOS:    `~/Library/Application Support/MaskEdit/maskedit.log`
//!   other:    `$XDG_DATA_HOME/MaskEdit/maskedit.log` or `~/.local/share/...`
//!
//! Call sites use `log_info!` / `log_warn!` / `log_err!`. Until [`init`]
//! succeeds those macros are no-ops, which is what the library and the
//! tests rely on.

use std::fmt;
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

struct SessionLog {
    path: PathBuf,
    file: Mutex<File>,
}

static SESSION: OnceLock<SessionLog> = OnceLock::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Panic,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Panic => "PANIC",
        })
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Error, &format!($($arg)*))
    };
}

/// Where this session is being logged, once [`init`] has succeeded.
pub fn log_path() -> Option<&'static PathBuf> {
    SESSION.get().map(|s| &s.path)
}

pub fn write(level: Level, msg: &str) {
    append(&format_line(&clock(), level, msg));
}

fn append(line: &str) {
    let Some(session) = SESSION.get() else { return };
    // A poisoned lock or a full disk must not take the editor down.
    if let Ok(mut file) = session.file.lock() {
        let _ = writeln!(file, "{}", line);
    }
}

fn format_line(clock: &str, level: Level, msg: &str) -> String {
    format!("{} {:<5} {}", clock, level, msg)
}

/// Open (truncate) the log file and route panics into it. Safe to call
/// more than once; only the first call does anything.
pub fn init() {
    if SESSION.get().is_some() {
        return;
    }
    let path = session_dir().join("maskedit.log");
    if let Some(dir) = path.parent() {
        let _ = create_dir_all(dir);
    }
    let file = match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("MaskEdit: cannot open log {}: {}", path.display(), e);
            return;
        }
    };
    let _ = SESSION.set(SessionLog {
        path: path.clone(),
        file: Mutex::new(file),
    });

    append(&format!(
        "MaskEdit {} session log, started {}",
        env!("CARGO_PKG_VERSION"),
        unix_seconds().map_or_else(|| "at an unknown time".to_string(), |s| format!("at unix {}", s))
    ));
    append(&format!("log file {}", path.display()));

    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        write(Level::Panic, &info.to_string());
        default_hook(info);
    }));
}

fn session_dir() -> PathBuf {
    let base = if cfg!(target_os = "windows") {
        std::env::var_os("APPDATA").map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join("Library/Application Support"))
    } else {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/share")))
    };
    base.unwrap_or_else(|| PathBuf::from(".")).join("MaskEdit")
}

fn unix_seconds() -> Option<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

/// UTC wall clock, `HH:MM:SS`.
fn clock() -> String {
    match unix_seconds() {
        Some(secs) => {
            let day = secs % 86_400;
            format!("{:02}:{:02}:{:02}", day / 3600, day % 3600 / 60, day % 60)
        }
        None => "--:--:--".to_string(),
    }
}
