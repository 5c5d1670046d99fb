//! Append-only leveled text sink handed to tasks and capabilities.
//!
//! Each worker gets its own sink writing to its own file. A sink can also
//! expose a named pipe (`fifo_<name>` beside the log file) that a
//! capability's underlying native library may write diagnostic text into;
//! a background thread tails the pipe and merges complete lines into the
//! sink's stream. Core components log through `tracing` instead; the sink
//! exists for collaborator output.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::clock::now_ms;

/// Shared output stream; the fifo tail thread writes through the same lock
/// as the sink handles.
type SharedOut = Arc<Mutex<Box<dyn Write + Send>>>;

/// Sink verbosity. A message is written when its level is at or below the
/// configured one; `None` silences the sink entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Nothing is written.
    None,
    /// Errors only.
    Error,
    /// Errors and warnings.
    Warn,
    /// Everything.
    Info,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "None",
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            other => Err(format!("unknown log level `{other}`")),
        }
    }
}

/// Format and append one line to the shared stream, ignoring write errors:
/// a broken log file must never take a worker down.
fn write_line(out: &SharedOut, level: LogLevel, msg: &str) {
    let trimmed = msg.strip_suffix('\n').unwrap_or(msg);
    let line = format!("{} {} {}\n", now_ms(), level, trimmed);
    let mut out = out.lock();
    let _ = out.write_all(line.as_bytes());
    let _ = out.flush();
}

struct SinkInner {
    level: LogLevel,
    out: SharedOut,
    fifo_path: Option<PathBuf>,
    fifo_stop: Arc<AtomicBool>,
    fifo_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SinkInner {
    fn drop(&mut self) {
        self.fifo_stop.store(true, Ordering::Release);
        if let Some(handle) = self.fifo_thread.lock().take() {
            let _ = handle.join();
        }
        if let Some(path) = &self.fifo_path {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Cheap-to-clone handle to a leveled text sink. All clones share the same
/// output stream and external pipe.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<SinkInner>,
}

impl LogSink {
    fn from_parts(level: LogLevel, out: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                level,
                out: Arc::new(Mutex::new(out)),
                fifo_path: None,
                fifo_stop: Arc::new(AtomicBool::new(false)),
                fifo_thread: Mutex::new(None),
            }),
        }
    }

    /// Sink that drops everything. For tests and benches.
    #[must_use]
    pub fn discard() -> Self {
        Self::from_parts(LogLevel::None, Box::new(io::sink()))
    }

    /// Sink appending to `path`, without an external pipe.
    pub fn to_file(path: impl AsRef<Path>, level: LogLevel) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_parts(level, Box::new(file)))
    }

    /// Sink appending to `path`, with a named pipe created beside it
    /// (`fifo_<file name>`) and tailed into the stream. On platforms without
    /// named pipes this behaves like [`LogSink::to_file`].
    pub fn with_external_pipe(path: impl AsRef<Path>, level: LogLevel) -> io::Result<Self> {
        let path = path.as_ref();
        let sink = Self::to_file(path, level)?;

        #[cfg(unix)]
        {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "log".to_string());
            let fifo_path = path.with_file_name(format!("fifo_{file_name}"));
            let _ = std::fs::remove_file(&fifo_path);
            nix::unistd::mkfifo(&fifo_path, nix::sys::stat::Mode::from_bits_truncate(0o666))
                .map_err(|e| io::Error::other(format!("mkfifo {}: {e}", fifo_path.display())))?;

            let sink = Self {
                inner: Arc::new(SinkInner {
                    level,
                    out: Arc::clone(&sink.inner.out),
                    fifo_path: Some(fifo_path.clone()),
                    fifo_stop: Arc::new(AtomicBool::new(false)),
                    fifo_thread: Mutex::new(None),
                }),
            };

            let stop = Arc::clone(&sink.inner.fifo_stop);
            let out = Arc::clone(&sink.inner.out);
            let enabled = level >= LogLevel::Info;
            let handle = std::thread::Builder::new()
                .name("sink-fifo-tail".to_string())
                .spawn(move || unix_pipe::tail_fifo(&fifo_path, &stop, &out, enabled))?;
            *sink.inner.fifo_thread.lock() = Some(handle);
            Ok(sink)
        }

        #[cfg(not(unix))]
        Ok(sink)
    }

    /// Configured verbosity.
    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.inner.level
    }

    /// Path of the named pipe, when one was created. Capabilities may point a
    /// native library's diagnostic stream here.
    #[must_use]
    pub fn fifo_path(&self) -> Option<&Path> {
        self.inner.fifo_path.as_deref()
    }

    /// Append one line at `level`. Dropped when above the configured
    /// verbosity. A trailing newline is added when missing.
    pub fn log(&self, level: LogLevel, msg: impl AsRef<str>) {
        if level == LogLevel::None || level > self.inner.level {
            return;
        }
        write_line(&self.inner.out, level, msg.as_ref());
    }

    /// Append at [`LogLevel::Error`].
    pub fn error(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Error, msg);
    }

    /// Append at [`LogLevel::Warn`].
    pub fn warn(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Warn, msg);
    }

    /// Append at [`LogLevel::Info`].
    pub fn info(&self, msg: impl AsRef<str>) {
        self.log(LogLevel::Info, msg);
    }
}

#[cfg(unix)]
mod unix_pipe {
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read};
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use tracing::warn;

    use super::{write_line, LogLevel, SharedOut};

    /// Tail the named pipe, merging complete lines into the shared stream.
    /// Exits when the stop flag is raised.
    pub(super) fn tail_fifo(path: &Path, stop: &AtomicBool, out: &SharedOut, enabled: bool) {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(nix::fcntl::OFlag::O_NONBLOCK.bits())
            .open(path);
        let mut file: File = match file {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open log fifo for tailing");
                return;
            }
        };

        let mut buf = [0u8; 4096];
        let mut pending = String::new();

        loop {
            if stop.load(Ordering::Acquire) {
                break;
            }
            match file.read(&mut buf) {
                // No writer connected yet, or writer closed.
                Ok(0) => std::thread::sleep(Duration::from_millis(10)),
                Ok(n) => {
                    pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                    while let Some(pos) = pending.find('\n') {
                        let line: String = pending.drain(..=pos).collect();
                        emit(out, enabled, line.trim_end());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "log fifo read failed");
                    break;
                }
            }
        }

        emit(out, enabled, pending.trim_end());
    }

    fn emit(out: &SharedOut, enabled: bool, line: &str) {
        if enabled && !line.is_empty() {
            write_line(out, LogLevel::Info, &format!("[external] {line}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_level_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker0.log");

        let sink = LogSink::to_file(&path, LogLevel::Warn).unwrap();
        sink.error("broke");
        sink.warn("wobbly");
        sink.info("chatty");
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("broke"));
        assert!(contents.contains("wobbly"));
        assert!(!contents.contains("chatty"));
    }

    #[test]
    fn test_discard_sink_is_silent() {
        let sink = LogSink::discard();
        sink.error("nothing happens");
        assert_eq!(sink.level(), LogLevel::None);
        assert!(sink.fifo_path().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_external_pipe_lines_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker0.log");

        let sink = LogSink::with_external_pipe(&path, LogLevel::Info).unwrap();
        let fifo = sink.fifo_path().unwrap().to_path_buf();

        // The tail thread already holds the read end open, so this open
        // completes immediately.
        let mut writer = OpenOptions::new().write(true).open(&fifo).unwrap();
        writer.write_all(b"darknet: layer 0 conv\n").unwrap();
        drop(writer);

        std::thread::sleep(std::time::Duration::from_millis(300));
        drop(sink);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[external] darknet: layer 0 conv"));
        assert!(!fifo.exists(), "fifo node should be removed on drop");
    }
}
