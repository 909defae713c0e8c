//! Protocol-safe log redirection.
//!
//! Once the runtime owns stdout, nothing may print to it directly: a stray
//! diagnostic line would corrupt the framing. [`LogSink`] is an
//! [`std::io::Write`] that buffers bytes until a newline and forwards each
//! complete line over a channel; the run loop drains that channel into
//! `log` notifications written through the shared output sink. Installing a
//! `LogSink` as the `tracing_subscriber` writer turns tracing diagnostics
//! into well-formed protocol traffic.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Log severity, mirroring the host's accepted levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn from_tracing(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::INFO => Self::Info,
            _ => Self::Debug,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// One complete log line headed for the host.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub(crate) struct LogRecord {
    pub(crate) level: LogLevel,
    pub(crate) message: String,
}

/// Line-buffering writer that forwards complete lines as log records.
///
/// Clones share one buffer, so a sink handed to `tracing_subscriber` as a
/// `MakeWriter` keeps partial lines intact across `make_writer` calls. The
/// trailing unterminated fragment stays buffered until its newline arrives.
#[derive(Debug, Clone)]
pub struct LogSink {
    level: LogLevel,
    tx: mpsc::UnboundedSender<LogRecord>,
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogSink {
    pub(crate) fn new(level: LogLevel, tx: mpsc::UnboundedSender<LogRecord>) -> Self {
        Self {
            level,
            tx,
            buffer: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl std::io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.extend_from_slice(buf);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            let message = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            // The receiver only disappears at shutdown; dropping the line
            // then is harmless and must not fail the writer.
            let _ = self.tx.send(LogRecord {
                level: self.level,
                message,
            });
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogSink {
    type Writer = LogSink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }

    /// Per-event writer carrying the event's own severity, so a `warn!` or
    /// `error!` record reaches the host at its real level rather than the
    /// sink's default.
    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        let mut sink = self.clone();
        sink.level = LogLevel::from_tracing(meta.level());
        sink
    }
}
