//! Asynchronous process-wide logging sink
//!
//! Producers render the record into an owned line and enqueue it; a single
//! worker thread writes to stdout and a rolling file. Enqueueing is a
//! non-blocking `try_send`, so hot-path threads never wait on I/O. Overflow
//! drops the newest record and bumps a counter; the worker reports the
//! total as a single meta-record instead of one line per loss. Worker I/O
//! failures are swallowed, never propagated to producers.

use crate::error::{CaptureError, Result};
use chrono::{DateTime, Utc};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const QUEUE_CAPACITY: usize = 10_000;
const DRAIN_DEADLINE: Duration = Duration::from_secs(5);
const IDLE_FLUSH: Duration = Duration::from_secs(1);
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug)]
struct LogLine {
    timestamp: DateTime<Utc>,
    level: Level,
    target: String,
    message: String,
}

enum LogCommand {
    Line(LogLine),
    Shutdown,
}

fn render(line: &LogLine) -> String {
    format!(
        "{} {:<5} {} - {}",
        line.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
        line.level,
        line.target,
        line.message
    )
}

/// The `log::Log` implementation installed process-wide.
pub struct AsyncLogger {
    tx: Sender<LogCommand>,
    dropped: Arc<AtomicU64>,
    level: LevelFilter,
}

impl Log for AsyncLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = LogLine {
            timestamp: Utc::now(),
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        };
        if let Err(TrySendError::Full(_)) = self.tx.try_send(LogCommand::Line(line)) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn flush(&self) {}
}

/// Size-rotating file sink: `application.log` rolls to `application.log.1`.
struct RollingFileWriter {
    path: PathBuf,
    file: BufWriter<File>,
    written: u64,
    max_bytes: u64,
}

impl RollingFileWriter {
    fn open(path: PathBuf, max_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path,
            file: BufWriter::new(file),
            written,
            max_bytes,
        })
    }

    fn write_line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.file, "{}", text)?;
        self.written += text.len() as u64 + 1;
        if self.written >= self.max_bytes {
            self.rotate()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let mut backup = self.path.clone().into_os_string();
        backup.push(".1");
        std::fs::rename(&self.path, &backup)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.file = BufWriter::new(file);
        self.written = 0;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Owner of the worker thread; keep it until shutdown.
pub struct LoggerHandle {
    tx: Sender<LogCommand>,
    worker: Option<thread::JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl LoggerHandle {
    /// Records dropped on enqueue so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain the queue (bounded by the drain deadline) and stop the worker.
    pub fn shutdown(mut self) {
        let _ = self
            .tx
            .send_timeout(LogCommand::Shutdown, DRAIN_DEADLINE);
        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }
    }
}

/// Install the async logger as the global `log` sink.
///
/// Called once from `main` before any component starts; a second call fails
/// with a configuration error.
pub fn init(level_name: &str, file_path: &Path) -> Result<LoggerHandle> {
    let level: LevelFilter = level_name
        .parse()
        .map_err(|_| CaptureError::config(format!("unknown log level '{}'", level_name)))?;

    let writer = RollingFileWriter::open(file_path.to_path_buf(), MAX_LOG_BYTES)?;
    let (tx, rx) = bounded(QUEUE_CAPACITY);
    let dropped = Arc::new(AtomicU64::new(0));

    let worker = spawn_worker(rx, writer, Arc::clone(&dropped));

    let logger = AsyncLogger {
        tx: tx.clone(),
        dropped: Arc::clone(&dropped),
        level,
    };
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| CaptureError::config(format!("logger already installed: {}", e)))?;
    log::set_max_level(level);

    Ok(LoggerHandle {
        tx,
        worker: Some(worker),
        dropped,
    })
}

fn spawn_worker(
    rx: Receiver<LogCommand>,
    mut writer: RollingFileWriter,
    dropped: Arc<AtomicU64>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("async-logger".to_string())
        .spawn(move || {
            let mut reported_drops: u64 = 0;
            loop {
                match rx.recv_timeout(IDLE_FLUSH) {
                    Ok(LogCommand::Line(line)) => emit(&mut writer, &line),
                    Ok(LogCommand::Shutdown) => {
                        // Drain what is already queued, bounded by the deadline.
                        let deadline = Instant::now() + DRAIN_DEADLINE;
                        while let Ok(LogCommand::Line(line)) = rx.try_recv() {
                            emit(&mut writer, &line);
                            if Instant::now() >= deadline {
                                break;
                            }
                        }
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        report_drops(&mut writer, &dropped, &mut reported_drops);
                        let _ = writer.flush();
                        let _ = io::stdout().flush();
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            report_drops(&mut writer, &dropped, &mut reported_drops);
            let _ = writer.flush();
            let _ = io::stdout().flush();
        })
        .expect("failed to spawn logger thread")
}

fn emit(writer: &mut RollingFileWriter, line: &LogLine) {
    let text = render(line);
    println!("{}", text);
    // File sink errors must never reach producers; drop the line and move on.
    let _ = writer.write_line(&text);
}

fn report_drops(writer: &mut RollingFileWriter, dropped: &AtomicU64, reported: &mut u64) {
    let total = dropped.load(Ordering::Relaxed);
    if total > *reported {
        let line = LogLine {
            timestamp: Utc::now(),
            level: Level::Warn,
            target: "logger".to_string(),
            message: format!("{} log records dropped on overflow", total - *reported),
        };
        emit(writer, &line);
        *reported = total;
    }
}
