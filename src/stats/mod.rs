//! Run statistics for the EMG Trigger Agent.
//!
//! Counters are shared across threads and can be persisted between runs.

pub mod counters;

pub use counters::{
    create_shared_stats, create_shared_stats_with_persistence, PipelineStats, SharedStats,
    StatsSnapshot,
};
