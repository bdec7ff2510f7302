//! Pipeline counters.
//!
//! Tracks what the agent has read, discarded, classified and persisted so a
//! session can be audited after the fact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Counters for the current run.
#[derive(Debug)]
pub struct PipelineStats {
    /// Lines parsed into samples
    samples_read: AtomicU64,
    /// Lines discarded because they failed to parse
    parse_errors: AtomicU64,
    /// Samples dropped because the coordinator fell behind
    samples_dropped: AtomicU64,
    /// Full windows scored by a decision step
    windows_classified: AtomicU64,
    /// Confirmed events emitted
    confirmations: AtomicU64,
    /// Rows appended to the stream file
    rows_logged: AtomicU64,
    /// Run start time
    started_at: DateTime<Utc>,
    /// Path for persisting counters
    persist_path: Option<PathBuf>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            samples_read: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            windows_classified: AtomicU64::new(0),
            confirmations: AtomicU64::new(0),
            rows_logged: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create counters that accumulate across runs in `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            debug!("Could not load previous pipeline stats: {e}");
        }

        stats
    }

    pub fn record_sample(&self) {
        self.samples_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_window(&self) {
        self.windows_classified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_confirmation(&self) {
        self.confirmations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rows_logged(&self, count: u64) {
        self.rows_logged.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_read: self.samples_read.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            rows_logged: self.rows_logged.load(Ordering::Relaxed),
            started_at: self.started_at,
            run_duration_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Summary for display at shutdown.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Run Statistics:\n\
             - Samples read: {}\n\
             - Lines discarded (parse errors): {}\n\
             - Samples dropped (backpressure): {}\n\
             - Windows classified: {}\n\
             - Confirmed events: {}\n\
             - Stream rows logged: {}\n\
             - Run duration: {} seconds",
            stats.samples_read,
            stats.parse_errors,
            stats.samples_dropped,
            stats.windows_classified,
            stats.confirmations,
            stats.rows_logged,
            stats.run_duration_secs
        )
    }

    /// Persist the counters, if a path was configured.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                samples_read: stats.samples_read,
                parse_errors: stats.parse_errors,
                samples_dropped: stats.samples_dropped,
                windows_classified: stats.windows_classified,
                confirmations: stats.confirmations,
                rows_logged: stats.rows_logged,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.samples_read
                    .store(persisted.samples_read, Ordering::Relaxed);
                self.parse_errors
                    .store(persisted.parse_errors, Ordering::Relaxed);
                self.samples_dropped
                    .store(persisted.samples_dropped, Ordering::Relaxed);
                self.windows_classified
                    .store(persisted.windows_classified, Ordering::Relaxed);
                self.confirmations
                    .store(persisted.confirmations, Ordering::Relaxed);
                self.rows_logged
                    .store(persisted.rows_logged, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn reset(&self) {
        self.samples_read.store(0, Ordering::Relaxed);
        self.parse_errors.store(0, Ordering::Relaxed);
        self.samples_dropped.store(0, Ordering::Relaxed);
        self.windows_classified.store(0, Ordering::Relaxed);
        self.confirmations.store(0, Ordering::Relaxed);
        self.rows_logged.store(0, Ordering::Relaxed);
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_read: u64,
    pub parse_errors: u64,
    pub samples_dropped: u64,
    pub windows_classified: u64,
    pub confirmations: u64,
    pub rows_logged: u64,
    pub started_at: DateTime<Utc>,
    pub run_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    samples_read: u64,
    parse_errors: u64,
    samples_dropped: u64,
    windows_classified: u64,
    confirmations: u64,
    rows_logged: u64,
    last_updated: DateTime<Utc>,
}

/// Counters shared between the acquisition, logging and coordinator threads.
pub type SharedStats = Arc<PipelineStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(PipelineStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(PipelineStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = PipelineStats::new();

        stats.record_sample();
        stats.record_sample();
        stats.record_parse_error();
        stats.record_rows_logged(10);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.samples_read, 2);
        assert_eq!(snapshot.parse_errors, 1);
        assert_eq!(snapshot.rows_logged, 10);
    }

    #[test]
    fn test_reset() {
        let stats = PipelineStats::new();
        stats.record_window();
        stats.record_confirmation();
        stats.reset();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.windows_classified, 0);
        assert_eq!(snapshot.confirmations, 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("emg-stats-{}", uuid::Uuid::new_v4()))
            .join("stats.json");

        let stats = PipelineStats::with_persistence(path.clone());
        stats.record_confirmation();
        stats.save().unwrap();

        let reloaded = PipelineStats::with_persistence(path.clone());
        assert_eq!(reloaded.snapshot().confirmations, 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_summary_format() {
        let summary = PipelineStats::new().summary();
        assert!(summary.contains("Samples read"));
        assert!(summary.contains("Confirmed events"));
    }
}
