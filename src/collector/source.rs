//! Line-oriented sample sources.
//!
//! The device itself is configured outside this crate (baud rate, port
//! settings); here it is just a byte stream delivering newline-terminated
//! lines. Reads are expected to time out so callers can check for shutdown.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a sample source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open device {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),
}

/// Result of a single read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRead {
    /// A complete line, without its terminator
    Line(String),
    /// No data arrived within the read timeout
    Idle,
    /// The source is exhausted or the device went away
    Closed,
}

/// Something that yields device-format lines.
pub trait SampleSource: Send {
    /// Read the next line, returning promptly with [`LineRead::Idle`] when
    /// nothing arrived.
    fn read_line(&mut self) -> Result<LineRead, SourceError>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// How long a non-blocking device read waits before reporting idle.
pub const DEVICE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// A source backed by any buffered reader.
pub struct LineSource<R> {
    reader: R,
    pending: Vec<u8>,
    label: String,
    poll_interval: Option<Duration>,
}

impl<R: BufRead + Send> LineSource<R> {
    pub fn new(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader,
            pending: Vec::new(),
            label: label.into(),
            poll_interval: None,
        }
    }

    /// Sleep `interval` whenever a read would block, for readers opened
    /// in non-blocking mode.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    fn take_line(&mut self) -> String {
        let bytes = std::mem::take(&mut self.pending);
        // Undecodable bytes are replaced rather than failing the read
        String::from_utf8_lossy(&bytes)
            .trim_end_matches(['\r', '\n'])
            .to_string()
    }
}

impl<R: BufRead + Send> SampleSource for LineSource<R> {
    fn read_line(&mut self) -> Result<LineRead, SourceError> {
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => {
                if self.pending.is_empty() {
                    Ok(LineRead::Closed)
                } else {
                    Ok(LineRead::Line(self.take_line()))
                }
            }
            Ok(_) => {
                if self.pending.ends_with(b"\n") {
                    Ok(LineRead::Line(self.take_line()))
                } else {
                    // Partial line before EOF; the next call reports it
                    Ok(LineRead::Idle)
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                // Partial bytes stay in `pending` until the terminator arrives
                if let Some(interval) = self.poll_interval {
                    thread::sleep(interval);
                }
                Ok(LineRead::Idle)
            }
            Err(e) => Err(SourceError::Read(e)),
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// Open a character device (or any file) as a line source.
///
/// On unix the device is opened non-blocking, so an idle device yields
/// [`LineRead::Idle`] every [`DEVICE_POLL_INTERVAL`] and the reader can
/// notice shutdown. End of file means the device went away.
///
/// Failure here is fatal for the caller; no retry is attempted.
pub fn open_device(path: &Path) -> Result<LineSource<BufReader<File>>, SourceError> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NONBLOCK);
    }

    let file = options.open(path).map_err(|source| SourceError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(LineSource::new(BufReader::new(file), format!("device {}", path.display()))
        .with_poll_interval(DEVICE_POLL_INTERVAL))
}

/// Replays recorded device lines, optionally paced to mimic a live device.
pub struct ReplaySource {
    lines: VecDeque<String>,
    pacing: Option<Duration>,
    label: String,
}

impl ReplaySource {
    /// Replay the given lines in order.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            pacing: None,
            label: "replay".to_string(),
        }
    }

    /// Load a recording, one device line per line of the file.
    pub fn from_path(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|source| SourceError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut replay = Self::new(content.lines());
        replay.label = format!("replay {}", path.display());
        Ok(replay)
    }

    /// Wait `interval` before delivering each line.
    pub fn with_pacing(mut self, interval: Duration) -> Self {
        self.pacing = Some(interval);
        self
    }

    /// Number of lines not yet delivered.
    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

impl SampleSource for ReplaySource {
    fn read_line(&mut self) -> Result<LineRead, SourceError> {
        if let Some(interval) = self.pacing {
            thread::sleep(interval);
        }
        Ok(match self.lines.pop_front() {
            Some(line) => LineRead::Line(line),
            None => LineRead::Closed,
        })
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
