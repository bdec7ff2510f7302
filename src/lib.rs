//! EMG Trigger Agent - debounced muscle-activation triggers from a live EMG stream.
//!
//! The agent reads `filtered,envelope[,signal]` lines from a sensor, cuts
//! the stream into windows, extracts features, classifies each window and
//! confirms a trigger only after repeated agreement. The raw stream is
//! logged to disk alongside, without ever blocking acquisition.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      EMG Trigger Agent                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │ Acquisition │──▶│  Windowing  │──▶│  Features   │       │
//! │  │  (thread)   │   │ (50 / 100)  │   │ (WL..CC)    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         │                                    │              │
//! │         ▼                                    ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Stream    │   │   Decider   │◀──│ Classifier  │       │
//! │  │   Logger    │   │  (voting)   │   │  / Band     │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use emg_trigger_agent::{collector, core, stats};
//! use std::sync::atomic::AtomicBool;
//!
//! let stats = stats::create_shared_stats();
//! let source = collector::ReplaySource::new(["1.0,110.0", "2.0,111.0"]);
//! let mut acquisition = collector::Acquisition::new(Box::new(source), stats.clone());
//! acquisition.start().expect("Failed to start acquisition");
//!
//! let detector = core::BandDetector::new(100, 110.0, 0.1, core::ConfirmationPolicy::majority());
//! let mut coordinator =
//!     core::Coordinator::new(Box::new(detector), collector::SampleField::Envelope, stats);
//! let running = AtomicBool::new(true);
//! coordinator.run(acquisition.receiver(), &running).expect("Pipeline failed");
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod stats;
pub mod storage;

// Re-export key types at crate root for convenience
pub use collector::{Acquisition, LatestSample, Sample, SampleField, SampleSource};
pub use config::{Config, ConfigError};
pub use core::{
    extract, BandDetector, Classifier, ClassifierDetector, Coordinator, Decider, DenseNetwork,
    FeatureVector, TriggerEvent,
};
pub use stats::{PipelineStats, SharedStats};
pub use storage::{SessionInfo, StreamLogger};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
