use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::json;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Error,
            2 => Self::Warn,
            4 => Self::Debug,
            5 => Self::Trace,
            _ => Self::Info,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    Text = 0,
    Json = 1,
}

impl Format {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LogConfig {
    pub level: Level,
    pub format: Format,
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Text,
            timestamps: true,
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static LOG_FORMAT: AtomicU8 = AtomicU8::new(Format::Text as u8);
static LOG_TIMESTAMPS: AtomicBool = AtomicBool::new(true);

pub fn init(config: LogConfig) {
    LOG_LEVEL.store(config.level as u8, Ordering::Relaxed);
    LOG_FORMAT.store(config.format as u8, Ordering::Relaxed);
    LOG_TIMESTAMPS.store(config.timestamps, Ordering::Relaxed);
}

pub fn set_level(level: Level) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn enabled(level: Level) -> bool {
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn log(level: Level, target: &'static str, file: &'static str, line: u32, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let ts_ms: u64 = now.as_millis().try_into().unwrap_or(u64::MAX);
    let capturing = capture::active();
    let msg = if capturing || LOG_FORMAT.load(Ordering::Relaxed) == Format::Json as u8 {
        Some(args.to_string())
    } else {
        None
    };

    {
        let mut out = io::stderr().lock();
        match LOG_FORMAT.load(Ordering::Relaxed) {
            f if f == Format::Json as u8 => {
                let entry = json!({
                    "ts_ms": ts_ms,
                    "level": level.as_str(),
                    "target": target,
                    "file": file,
                    "line": line,
                    "msg": msg.as_deref().unwrap_or_default(),
                });
                let _ = writeln!(out, "{entry}");
            }
            _ => {
                if LOG_TIMESTAMPS.load(Ordering::Relaxed) {
                    let _ = write!(out, "{}.{:03} ", now.as_secs(), now.subsec_millis());
                }
                let _ = write!(out, "{} {}: ", level.as_str(), target);
                let _ = writeln!(out, "{args}");
            }
        }
    }

    if capturing {
        capture::push(Entry {
            ts_ms,
            level,
            target,
            msg: msg.unwrap_or_default(),
        });
    }
}

/// Captured log record, retained only while capture is enabled.
#[derive(Clone, Debug)]
pub struct Entry {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub msg: String,
}

/// In-memory capture of emitted records. Tests enable this to assert on
/// diagnostics that the production paths only log.
pub mod capture {
    use super::*;

    static ENABLED: AtomicBool = AtomicBool::new(false);
    static CAPACITY: AtomicUsize = AtomicUsize::new(0);
    static BUFFER: OnceLock<Mutex<VecDeque<Entry>>> = OnceLock::new();

    pub fn enable(capacity: usize) {
        if capacity == 0 {
            disable();
            return;
        }
        CAPACITY.store(capacity, Ordering::Relaxed);
        BUFFER.get_or_init(|| Mutex::new(VecDeque::new()));
        ENABLED.store(true, Ordering::Relaxed);
    }

    pub fn disable() {
        ENABLED.store(false, Ordering::Relaxed);
    }

    pub fn active() -> bool {
        ENABLED.load(Ordering::Relaxed)
    }

    pub fn clear() {
        if let Some(buffer) = BUFFER.get() {
            if let Ok(mut guard) = buffer.lock() {
                guard.clear();
            }
        }
    }

    pub fn snapshot() -> Vec<Entry> {
        let Some(buffer) = BUFFER.get() else {
            return Vec::new();
        };
        match buffer.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// True if any captured record at `level` contains `needle`.
    pub fn contains(level: Level, needle: &str) -> bool {
        snapshot()
            .iter()
            .any(|entry| entry.level == level && entry.msg.contains(needle))
    }

    pub(super) fn push(entry: Entry) {
        let Some(buffer) = BUFFER.get() else {
            return;
        };
        let Ok(mut guard) = buffer.lock() else {
            return;
        };
        let cap = CAPACITY.load(Ordering::Relaxed);
        if cap == 0 {
            return;
        }
        guard.push_back(entry);
        while guard.len() > cap {
            guard.pop_front();
        }
    }
}

pub fn current_level() -> Level {
    Level::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

#[macro_export]
macro_rules! log_at {
    ($level:expr, $($arg:tt)*) => {{
        if $crate::enabled($level) {
            $crate::log($level, module_path!(), file!(), line!(), format_args!($($arg)*));
        }
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Error, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Warn, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Info, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Debug, $($arg)*);
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log_at!($crate::Level::Trace, $($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level() {
        assert_eq!(Level::parse("info"), Some(Level::Info));
        assert_eq!(Level::parse("WARN"), Some(Level::Warn));
        assert_eq!(Level::parse("warning"), Some(Level::Warn));
        assert_eq!(Level::parse("bogus"), None);
    }

    #[test]
    fn parse_format() {
        assert_eq!(Format::parse("text"), Some(Format::Text));
        assert_eq!(Format::parse("JSON"), Some(Format::Json));
        assert_eq!(Format::parse("bogus"), None);
    }

    #[test]
    fn capture_retains_bounded_history() {
        capture::enable(2);
        capture::clear();
        log_error!("first entry");
        log_error!("second entry");
        log_error!("third entry");
        let entries = capture::snapshot();
        assert_eq!(entries.len(), 2);
        assert!(capture::contains(Level::Error, "third entry"));
        assert!(!capture::contains(Level::Error, "first entry"));
        capture::disable();
    }
}
