//! Global logger module.
//!
//! Leveled logging with an async batch writer: call sites push formatted
//! lines onto a channel and a background thread flushes them to a
//! size-rotated debug log file (`proxy_debug_<timestamp>.log`, ~1 MiB per
//! file, three backups). Records at `Info` and above are echoed to stdout.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Once, RwLock};
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

/// Maximum size of the active log file before rotation.
const MAX_LOG_BYTES: u64 = 1024 * 1024;
/// Number of rotated backups kept alongside the active file.
const MAX_BACKUPS: usize = 3;

// Async log channel sender
static LOG_SENDER: RwLock<Option<mpsc::Sender<String>>> = RwLock::new(None);
static MIN_LEVEL: AtomicU8 = AtomicU8::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn rank(self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
        }
    }
}

/// Size-rotating file sink owned by the writer thread.
struct RotatingFile {
    path: PathBuf,
    file: Option<File>,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &str) -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = PathBuf::from(dir).join(format!("proxy_debug_{}.log", stamp));
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Error setting up file logger for {:?}: {}", path, e);
                None
            }
        };
        Self {
            path,
            file,
            written: 0,
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64 + 1;
        if self.written + len > MAX_LOG_BYTES {
            self.rotate();
        }
        if let Some(file) = self.file.as_mut() {
            if writeln!(file, "{}", line).is_ok() {
                self.written += len;
            }
        }
    }

    /// Shift `path` -> `path.1` -> ... -> `path.{MAX_BACKUPS}` and reopen
    /// the active file empty.
    fn rotate(&mut self) {
        self.file = None;
        let backup = |n: usize| PathBuf::from(format!("{}.{}", self.path.display(), n));
        let _ = std::fs::remove_file(backup(MAX_BACKUPS));
        for n in (1..MAX_BACKUPS).rev() {
            let _ = std::fs::rename(backup(n), backup(n + 1));
        }
        let _ = std::fs::rename(&self.path, backup(1));
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .ok();
        self.written = 0;
    }

    fn flush(&mut self) {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
    }
}

/// Initialize the logging system. Safe to call more than once; only the
/// first call takes effect.
pub fn init(dir: &str, level: LogLevel) {
    let dir = dir.to_string();
    INIT.call_once(move || {
        MIN_LEVEL.store(level.rank(), Ordering::Relaxed);
        spawn_batch_writer(dir.clone());
        info(
            "logger",
            &format!("Logging configured. Level: {}, Dir: {}", level.as_str(), dir),
        );
    });
}

/// Background thread draining the log channel into the rotating file.
fn spawn_batch_writer(dir: String) {
    let (tx, rx) = mpsc::channel::<String>();

    {
        let mut sender = LOG_SENDER.write().unwrap();
        *sender = Some(tx);
    }

    std::thread::spawn(move || {
        let mut sink = RotatingFile::open(&dir);
        let mut buffer: Vec<String> = Vec::with_capacity(100);
        let mut last_flush = Instant::now();
        let flush_interval = Duration::from_secs(1);

        loop {
            let timeout = flush_interval
                .checked_sub(last_flush.elapsed())
                .unwrap_or_else(|| Duration::from_secs(0));

            match rx.recv_timeout(timeout) {
                Ok(line) => {
                    buffer.push(line);
                    if buffer.len() >= 100 || last_flush.elapsed() >= flush_interval {
                        flush_lines(&mut sink, &mut buffer);
                        last_flush = Instant::now();
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if !buffer.is_empty() {
                        flush_lines(&mut sink, &mut buffer);
                    }
                    last_flush = Instant::now();
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        if !buffer.is_empty() {
            flush_lines(&mut sink, &mut buffer);
        }
    });
}

fn flush_lines(sink: &mut RotatingFile, buffer: &mut Vec<String>) {
    for line in buffer.drain(..) {
        sink.write_line(&line);
    }
    sink.flush();
}

fn log_internal(level: LogLevel, source: &str, message: &str) {
    if level.rank() < MIN_LEVEL.load(Ordering::Relaxed) {
        return;
    }

    let line = format!(
        "{} - {} - [{}] - {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        level.as_str(),
        source,
        message
    );

    // Console mirror for operator visibility; the file gets everything.
    if level >= LogLevel::Info {
        println!("{}", line);
    }

    if let Some(sender) = LOG_SENDER.read().unwrap().as_ref() {
        let _ = sender.send(line);
    }
}

pub fn debug(source: &str, message: &str) {
    log_internal(LogLevel::Debug, source, message);
}

pub fn info(source: &str, message: &str) {
    log_internal(LogLevel::Info, source, message);
}

pub fn warn(source: &str, message: &str) {
    log_internal(LogLevel::Warn, source, message);
}

pub fn error(source: &str, message: &str) {
    log_internal(LogLevel::Error, source, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_parsing_and_order() {
        assert_eq!(LogLevel::from_str("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("nope"), None);
        assert!(LogLevel::Error > LogLevel::Info);
    }

    #[test]
    fn rotation_shifts_backups() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RotatingFile::open(dir.path().to_str().unwrap());
        let base = sink.path.clone();

        sink.write_line("first generation");
        sink.flush();
        sink.rotate();
        sink.write_line("second generation");
        sink.flush();

        let backup = PathBuf::from(format!("{}.1", base.display()));
        let rotated = std::fs::read_to_string(&backup).unwrap();
        assert!(rotated.contains("first generation"));
        let active = std::fs::read_to_string(&base).unwrap();
        assert!(active.contains("second generation"));
    }
}
