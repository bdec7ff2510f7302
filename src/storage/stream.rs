//! Durable logging of the live value stream.
//!
//! Two strategies share the [`RowSink`] interface:
//!
//! - **Buffered** ([`StreamLogger::start_stream`]): a background thread
//!   samples a value at a fixed interval into memory and appends the whole
//!   buffer in one write when the stream stops.
//! - **Immediate** ([`StreamLogger::live_stream`]): an iterator that writes
//!   each row as it is sampled and yields the value to the caller.
//!
//! Both target the same stream file. Running them at the same time on one
//! file is a caller error and is not detected here.
//!
//! The header is written only when the file does not exist yet. After the
//! first write failure the logger keeps the error and refuses further
//! buffered streams and session rows; the live iterator keeps yielding
//! values without writing them.

use crate::collector::types::now_secs;
use crate::stats::SharedStats;
use crate::storage::csv::format_row;
use crate::storage::session::{SessionInfo, INFO_HEADER};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, LineWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default file name for the value stream.
pub const STREAM_FILE: &str = "emg_stream.csv";

/// Default file name for session results.
pub const INFO_FILE: &str = "info.csv";

/// Header of the stream file.
pub const STREAM_HEADER: [&str; 4] = ["timestamp", "session_id", "level_number", "value"];

/// Default sampling interval for stream logging.
pub const DEFAULT_LOGGING_INTERVAL: Duration = Duration::from_millis(10);

/// How long `start_stream` waits for a running stream to flush.
const RESTART_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors raised by the logger.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("logging disabled after earlier failure: {0}")]
    Suppressed(String),
    #[error("previous stream is still flushing")]
    StillFlushing,
    #[error("failed to spawn stream thread: {0}")]
    Spawn(std::io::Error),
}

/// One sampled value, ready to be written.
///
/// `value` is `None` when the value source failed; it is written as an
/// empty field.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord<V> {
    pub timestamp: f64,
    pub session_id: String,
    pub level_number: u32,
    pub value: Option<V>,
}

impl<V: Display> LogRecord<V> {
    /// Sample `get_value` now.
    pub fn capture<F>(session_id: &str, level_number: u32, get_value: &mut F) -> Self
    where
        F: FnMut() -> Option<V>,
    {
        Self {
            timestamp: now_secs(),
            session_id: session_id.to_string(),
            level_number,
            value: get_value(),
        }
    }

    pub fn to_row(&self) -> String {
        format_row(&[
            format!("{:.3}", self.timestamp),
            self.session_id.clone(),
            self.level_number.to_string(),
            self.value.as_ref().map(ToString::to_string).unwrap_or_default(),
        ])
    }
}

/// Destination for formatted rows.
pub trait RowSink {
    /// Accept one row.
    fn write_row(&mut self, row: String) -> std::io::Result<()>;

    /// Make everything accepted so far durable; returns rows written.
    fn finish(&mut self) -> std::io::Result<usize>;
}

/// Keeps rows in memory and appends them in one write on `finish`.
pub struct BufferedSink {
    path: PathBuf,
    file_lock: Arc<Mutex<()>>,
    rows: Vec<String>,
}

impl BufferedSink {
    pub fn new(path: PathBuf, file_lock: Arc<Mutex<()>>) -> Self {
        Self {
            path,
            file_lock,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowSink for BufferedSink {
    fn write_row(&mut self, row: String) -> std::io::Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<usize> {
        if self.rows.is_empty() {
            return Ok(0);
        }
        let rows = std::mem::take(&mut self.rows);
        let block = rows.concat();

        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(block.as_bytes())?;
        file.flush()?;
        Ok(rows.len())
    }
}

/// Writes each row through to the file as it arrives.
pub struct ImmediateSink {
    writer: LineWriter<File>,
    file_lock: Arc<Mutex<()>>,
    written: usize,
}

impl ImmediateSink {
    pub fn open(path: &Path, file_lock: Arc<Mutex<()>>) -> std::io::Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            writer: LineWriter::new(file),
            file_lock,
            written: 0,
        })
    }
}

impl RowSink for ImmediateSink {
    fn write_row(&mut self, row: String) -> std::io::Result<()> {
        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.writer.write_all(row.as_bytes())?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> std::io::Result<usize> {
        self.writer.flush()?;
        Ok(std::mem::take(&mut self.written))
    }
}

/// Error state shared by the logger and its background work.
#[derive(Debug, Clone, Default)]
struct ErrorState(Arc<Mutex<Option<String>>>);

impl ErrorState {
    fn get(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, message: String) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        error!("Logging failed: {message}");
        // Keep the first failure; later ones are usually consequences
        slot.get_or_insert(message);
    }

    fn check(&self) -> Result<(), StorageError> {
        match self.get() {
            Some(message) => Err(StorageError::Suppressed(message)),
            None => Ok(()),
        }
    }
}

struct ActiveStream {
    stop: Sender<()>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Writes the stream file and the session info file.
pub struct StreamLogger {
    stream_path: PathBuf,
    info_path: PathBuf,
    interval: Duration,
    file_lock: Arc<Mutex<()>>,
    error: ErrorState,
    stats: Option<SharedStats>,
    active: Option<ActiveStream>,
    /// Worker whose flush outlived its stop timeout
    draining: Option<JoinHandle<()>>,
}

impl StreamLogger {
    /// Log into `dir` using the default file names.
    pub fn new(dir: &Path) -> Self {
        Self::with_paths(dir.join(STREAM_FILE), dir.join(INFO_FILE))
    }

    pub fn with_paths(stream_path: PathBuf, info_path: PathBuf) -> Self {
        Self {
            stream_path,
            info_path,
            interval: DEFAULT_LOGGING_INTERVAL,
            file_lock: Arc::new(Mutex::new(())),
            error: ErrorState::default(),
            stats: None,
            active: None,
            draining: None,
        }
    }

    /// Sampling interval for buffered streams.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Count written rows in `stats`.
    pub fn with_stats(mut self, stats: SharedStats) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn stream_path(&self) -> &Path {
        &self.stream_path
    }

    pub fn info_path(&self) -> &Path {
        &self.info_path
    }

    /// The first write failure, if any.
    pub fn error(&self) -> Option<String> {
        self.error.get()
    }

    /// Whether a buffered stream is currently running.
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Whether a stopped stream is still writing its buffer.
    pub fn is_flushing(&self) -> bool {
        self.draining.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Create the session info file with its header if it does not exist.
    pub fn ensure_log_header(&self) -> Result<(), StorageError> {
        self.error.check()?;
        write_header_if_missing(&self.info_path, &INFO_HEADER, &self.file_lock)
            .map_err(|e| self.fail(&self.info_path, e))
    }

    /// Append one session result row.
    pub fn log_level_result(&self, info: &SessionInfo) -> Result<(), StorageError> {
        self.error.check()?;
        write_header_if_missing(&self.info_path, &INFO_HEADER, &self.file_lock)
            .and_then(|()| {
                let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());
                let mut file = OpenOptions::new().append(true).open(&self.info_path)?;
                file.write_all(info.to_row().as_bytes())
            })
            .map_err(|e| self.fail(&self.info_path, e))
    }

    /// Start buffered logging of `get_value` for one level.
    ///
    /// Any running stream is stopped first. If its flush does not finish in
    /// time, [`StorageError::StillFlushing`] is returned and nothing starts;
    /// at most one stream thread exists per logger. The header is created
    /// before the thread starts, so a failure there is returned to the
    /// caller.
    pub fn start_stream<F, V>(
        &mut self,
        session_id: &str,
        level_number: u32,
        get_value: F,
    ) -> Result<(), StorageError>
    where
        F: FnMut() -> Option<V> + Send + 'static,
        V: Display + 'static,
    {
        self.stop_stream(RESTART_TIMEOUT);
        self.error.check()?;
        if let Some(handle) = self.draining.take() {
            if !handle.is_finished() {
                self.draining = Some(handle);
                return Err(StorageError::StillFlushing);
            }
            let _ = handle.join();
        }

        write_header_if_missing(&self.stream_path, &STREAM_HEADER, &self.file_lock)
            .map_err(|e| self.fail(&self.stream_path, e))?;

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let worker = StreamWorker {
            session_id: session_id.to_string(),
            level_number,
            interval: self.interval,
            sink: BufferedSink::new(self.stream_path.clone(), self.file_lock.clone()),
            error: self.error.clone(),
            stats: self.stats.clone(),
            stream_path: self.stream_path.clone(),
            _value: PhantomData,
        };

        let handle = thread::Builder::new()
            .name("emg-stream-logger".into())
            .spawn(move || {
                worker.run(get_value, stop_rx);
                let _ = done_tx.send(());
            })
            .map_err(StorageError::Spawn)?;

        info!(session_id, level_number, "Stream logging started");
        self.active = Some(ActiveStream {
            stop: stop_tx,
            done: done_rx,
            handle,
        });
        Ok(())
    }

    /// Stop the buffered stream and wait up to `timeout` for its flush.
    ///
    /// Does nothing when no stream is running. A flush still in progress
    /// after `timeout` completes in the background while holding the file
    /// lock, so later writes queue behind it; the logger keeps its handle
    /// and refuses to start another stream until it has finished.
    pub fn stop_stream(&mut self, timeout: Duration) {
        let Some(active) = self.active.take() else {
            return;
        };

        let _ = active.stop.send(());
        match active.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = active.handle.join();
                info!("Stream logging stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("Stream flush still running after {timeout:?}; continuing in background");
                self.draining = Some(active.handle);
            }
        }
    }

    /// Sample `get_value` every `interval`, writing each row immediately and
    /// yielding the value.
    ///
    /// The iterator never ends on its own. If the file cannot be prepared or
    /// a write fails, the error is recorded and values keep flowing unlogged.
    /// After an earlier failure the file is not touched at all.
    pub fn live_stream<F, V>(
        &self,
        session_id: &str,
        level_number: u32,
        get_value: F,
        interval: Duration,
    ) -> LiveStream<F, V>
    where
        F: FnMut() -> Option<V>,
        V: Display,
    {
        let sink = if let Some(message) = self.error.get() {
            warn!("Live stream not logged after earlier failure: {message}");
            None
        } else {
            self.open_live_sink()
        };

        LiveStream {
            session_id: session_id.to_string(),
            level_number,
            get_value,
            interval,
            sink,
            error: self.error.clone(),
            stats: self.stats.clone(),
            started: false,
            _value: PhantomData,
        }
    }

    fn open_live_sink(&self) -> Option<ImmediateSink> {
        let sink = write_header_if_missing(&self.stream_path, &STREAM_HEADER, &self.file_lock)
            .and_then(|()| ImmediateSink::open(&self.stream_path, self.file_lock.clone()));

        match sink {
            Ok(sink) => Some(sink),
            Err(e) => {
                self.error.set(format!("{}: {e}", self.stream_path.display()));
                warn!("Live stream continues without logging");
                None
            }
        }
    }

    fn fail(&self, path: &Path, source: std::io::Error) -> StorageError {
        self.error.set(format!("{}: {source}", path.display()));
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Drop for StreamLogger {
    fn drop(&mut self) {
        self.stop_stream(Duration::from_secs(1));
    }
}

struct StreamWorker<V> {
    session_id: String,
    level_number: u32,
    interval: Duration,
    sink: BufferedSink,
    error: ErrorState,
    stats: Option<SharedStats>,
    stream_path: PathBuf,
    _value: PhantomData<fn() -> V>,
}

impl<V: Display> StreamWorker<V> {
    fn run<F>(mut self, mut get_value: F, stop: Receiver<()>)
    where
        F: FnMut() -> Option<V>,
    {
        loop {
            let record = LogRecord::capture(&self.session_id, self.level_number, &mut get_value);
            let _ = self.sink.write_row(record.to_row());

            match stop.recv_timeout(self.interval) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        debug!(rows = self.sink.len(), "Flushing stream buffer");
        match self.sink.finish() {
            Ok(rows) => {
                if let Some(ref stats) = self.stats {
                    stats.record_rows_logged(rows as u64);
                }
            }
            Err(e) => self.error.set(format!("{}: {e}", self.stream_path.display())),
        }
    }
}

/// Iterator returned by [`StreamLogger::live_stream`].
pub struct LiveStream<F, V> {
    session_id: String,
    level_number: u32,
    get_value: F,
    interval: Duration,
    sink: Option<ImmediateSink>,
    error: ErrorState,
    stats: Option<SharedStats>,
    started: bool,
    _value: PhantomData<fn() -> V>,
}

impl<F, V> LiveStream<F, V>
where
    F: FnMut() -> Option<V>,
    V: Display,
{
    /// Sample `get_value` every `interval` without writing anything.
    ///
    /// Same pacing and sentinel handling as [`StreamLogger::live_stream`],
    /// for runs with logging turned off.
    pub fn unlogged(get_value: F, interval: Duration) -> Self {
        Self {
            session_id: String::new(),
            level_number: 0,
            get_value,
            interval,
            sink: None,
            error: ErrorState::default(),
            stats: None,
            started: false,
            _value: PhantomData,
        }
    }
}

impl<F, V> LiveStream<F, V> {
    /// Whether rows are still being written.
    pub fn is_logging(&self) -> bool {
        self.sink.is_some()
    }
}

impl<F, V> Iterator for LiveStream<F, V>
where
    F: FnMut() -> Option<V>,
    V: Display,
{
    type Item = Option<V>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.started {
            thread::sleep(self.interval);
        }
        self.started = true;

        let record = LogRecord::capture(&self.session_id, self.level_number, &mut self.get_value);

        if let Some(ref mut sink) = self.sink {
            match sink.write_row(record.to_row()) {
                Ok(()) => {
                    if let Some(ref stats) = self.stats {
                        stats.record_rows_logged(1);
                    }
                }
                Err(e) => {
                    self.error.set(format!("live stream write: {e}"));
                    self.sink = None;
                }
            }
        }

        Some(record.value)
    }
}

impl<F, V> Drop for LiveStream<F, V> {
    fn drop(&mut self) {
        if let Some(ref mut sink) = self.sink {
            let _ = sink.finish();
        }
    }
}

/// Create `path` with `header` unless it already exists.
fn write_header_if_missing(
    path: &Path,
    header: &[&str],
    file_lock: &Mutex<()>,
) -> std::io::Result<()> {
    let _guard = file_lock.lock().unwrap_or_else(|e| e.into_inner());
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut file) => {
            file.write_all(format_row(header).as_bytes())?;
            file.flush()
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("emg-stream-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_record_row_format() {
        let record = LogRecord {
            timestamp: 1700000000.12345,
            session_id: "s1".to_string(),
            level_number: 3,
            value: Some(42.5),
        };
        assert_eq!(record.to_row(), "1700000000.123,s1,3,42.5\n");

        let missing: LogRecord<f64> = LogRecord {
            value: None,
            ..record.clone()
        };
        assert_eq!(missing.to_row(), "1700000000.123,s1,3,\n");
    }

    #[test]
    fn test_header_written_once() {
        let dir = temp_dir();
        let path = dir.join("h.csv");
        let lock = Mutex::new(());

        write_header_if_missing(&path, &STREAM_HEADER, &lock).unwrap();
        write_header_if_missing(&path, &STREAM_HEADER, &lock).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "timestamp,session_id,level_number,value\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_buffered_sink_single_append() {
        let dir = temp_dir();
        let path = dir.join("b.csv");
        std::fs::write(&path, "head\n").unwrap();

        let mut sink = BufferedSink::new(path.clone(), Arc::new(Mutex::new(())));
        sink.write_row("a\n".into()).unwrap();
        sink.write_row("b\n".into()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "head\n");

        assert_eq!(sink.finish().unwrap(), 2);
        assert_eq!(sink.finish().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "head\na\nb\n");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_stop_without_stream_is_noop() {
        let dir = temp_dir();
        let mut logger = StreamLogger::new(&dir);
        logger.stop_stream(Duration::from_millis(10));
        assert!(!logger.stream_path().exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_live_stream_yields_and_logs() {
        let dir = temp_dir();
        let logger = StreamLogger::new(&dir);
        let mut counter = 0.0;
        let values: Vec<Option<f64>> = logger
            .live_stream(
                "live",
                1,
                move || {
                    counter += 1.0;
                    (counter != 2.0).then_some(counter)
                },
                Duration::ZERO,
            )
            .take(3)
            .collect();

        assert_eq!(values, vec![Some(1.0), None, Some(3.0)]);

        let content = std::fs::read_to_string(logger.stream_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].ends_with(",live,1,1"));
        assert!(lines[2].ends_with(",live,1,"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_live_stream_skips_file_after_failure() {
        let dir = temp_dir();
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let mut logger = StreamLogger::new(&blocker.join("data"));
        assert!(logger.start_stream("s", 1, || Some(1.0)).is_err());

        // The path becomes writable, but the logger stays disabled
        std::fs::remove_file(&blocker).unwrap();
        std::fs::create_dir_all(blocker.join("data")).unwrap();

        let mut stream = logger.live_stream("s", 1, || Some(2.0), Duration::ZERO);
        assert!(!stream.is_logging());
        assert_eq!(stream.next(), Some(Some(2.0)));
        drop(stream);
        assert!(!logger.stream_path().exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_unlogged_stream_writes_nothing() {
        let dir = temp_dir();
        let logger = StreamLogger::new(&dir);
        let mut n = 0;
        let values: Vec<Option<i32>> = LiveStream::unlogged(
            move || {
                n += 1;
                Some(n)
            },
            Duration::ZERO,
        )
        .take(3)
        .collect();

        assert_eq!(values, vec![Some(1), Some(2), Some(3)]);
        assert!(!logger.stream_path().exists());
        assert!(logger.error().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
