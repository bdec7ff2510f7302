//! Background acquisition thread.
//!
//! Reads lines from a [`SampleSource`], parses them, publishes each sample to
//! the [`LatestSample`] slot and forwards it over a bounded channel to the
//! coordinator. Malformed lines are counted and discarded.

use crate::collector::source::{LineRead, SampleSource};
use crate::collector::types::{now_secs, LatestSample, Sample};
use crate::stats::SharedStats;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Tuning for the acquisition thread.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Capacity of the sample channel
    pub channel_capacity: usize,
    /// How long to wait on a full channel before dropping a sample
    pub send_timeout: Duration,
    /// How long `stop` waits for the reader thread to exit
    pub stop_timeout: Duration,
    /// Forward samples over the channel; when off only the latest-sample
    /// slot is updated
    pub forward_samples: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 10_000,
            send_timeout: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(2),
            forward_samples: true,
        }
    }
}

/// Errors that can occur while managing acquisition.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("acquisition is already running")]
    AlreadyRunning,
    #[error("source was consumed by a previous run")]
    SourceConsumed,
    #[error("failed to spawn reader thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Owns the source and the reader thread.
pub struct Acquisition {
    config: AcquisitionConfig,
    source: Option<Box<dyn SampleSource>>,
    sender: Option<Sender<Sample>>,
    receiver: Receiver<Sample>,
    latest: LatestSample,
    stats: SharedStats,
    running: Arc<AtomicBool>,
    done: Option<Receiver<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Acquisition {
    pub fn new(source: Box<dyn SampleSource>, stats: SharedStats) -> Self {
        Self::with_config(source, stats, AcquisitionConfig::default())
    }

    pub fn with_config(
        source: Box<dyn SampleSource>,
        stats: SharedStats,
        config: AcquisitionConfig,
    ) -> Self {
        let (sender, receiver) = bounded(config.channel_capacity);
        Self {
            config,
            source: Some(source),
            sender: Some(sender),
            receiver,
            latest: LatestSample::new(),
            stats,
            running: Arc::new(AtomicBool::new(false)),
            done: None,
            thread_handle: None,
        }
    }

    /// Start reading in a background thread.
    ///
    /// The sender moves into the thread, so the channel disconnects once the
    /// source is exhausted and all samples have been received.
    pub fn start(&mut self) -> Result<(), AcquisitionError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(AcquisitionError::AlreadyRunning);
        }
        let source = self.source.take().ok_or(AcquisitionError::SourceConsumed)?;
        let sender = self.sender.take().ok_or(AcquisitionError::SourceConsumed)?;

        self.running.store(true, Ordering::SeqCst);

        let (done_tx, done_rx) = bounded(1);
        let reader = Reader {
            source,
            sender,
            latest: self.latest.clone(),
            stats: self.stats.clone(),
            running: self.running.clone(),
            send_timeout: self.config.send_timeout,
            forward: self.config.forward_samples,
        };

        let handle = thread::Builder::new()
            .name("emg-acquisition".into())
            .spawn(move || {
                reader.run();
                let _ = done_tx.send(());
            })?;

        self.done = Some(done_rx);
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop reading and release the source.
    ///
    /// Waits at most `stop_timeout` for a blocked read to return; a reader
    /// stuck past that is detached and exits on its next read.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        let finished = match self.done.take() {
            Some(done) => !matches!(
                done.recv_timeout(self.config.stop_timeout),
                Err(RecvTimeoutError::Timeout)
            ),
            None => true,
        };

        if let Some(handle) = self.thread_handle.take() {
            if finished {
                let _ = handle.join();
            } else {
                warn!(
                    "Acquisition thread did not exit within {:?}; detaching",
                    self.config.stop_timeout
                );
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Receiver for parsed samples.
    pub fn receiver(&self) -> &Receiver<Sample> {
        &self.receiver
    }

    /// Try to receive a sample without blocking.
    pub fn try_recv(&self) -> Option<Sample> {
        self.receiver.try_recv().ok()
    }

    /// Handle to the latest-sample slot.
    pub fn latest(&self) -> LatestSample {
        self.latest.clone()
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Reader {
    source: Box<dyn SampleSource>,
    sender: Sender<Sample>,
    latest: LatestSample,
    stats: SharedStats,
    running: Arc<AtomicBool>,
    send_timeout: Duration,
    forward: bool,
}

impl Reader {
    fn run(mut self) {
        info!("Reading from {}", self.source.describe());

        while self.running.load(Ordering::SeqCst) {
            let line = match self.source.read_line() {
                Ok(LineRead::Line(line)) => line,
                Ok(LineRead::Idle) => continue,
                Ok(LineRead::Closed) => {
                    info!("{} closed", self.source.describe());
                    break;
                }
                Err(e) => {
                    error!("Reading {} failed: {e}", self.source.describe());
                    break;
                }
            };

            let sample = match Sample::parse_line(&line, now_secs()) {
                Ok(sample) => sample,
                Err(e) => {
                    self.stats.record_parse_error();
                    debug!("Discarding line {line:?}: {e}");
                    continue;
                }
            };

            self.stats.record_sample();
            self.latest.store(sample);
            if !self.forward {
                continue;
            }

            match self.sender.send_timeout(sample, self.send_timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    self.stats.record_dropped();
                    warn!("Sample channel full; dropping sample");
                }
                Err(SendTimeoutError::Disconnected(_)) => break,
            }
        }

        self.running.store(false, Ordering::SeqCst);
        // Dropping `self` here closes the device handle and the channel
    }
}
