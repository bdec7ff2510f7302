//! Persistence for the EMG Trigger Agent.
//!
//! This module provides:
//! - Stream logging of live values, buffered or written through
//! - Session result rows
//! - Offline feature export from recorded streams, with optional segment
//!   averaging

pub mod csv;
pub mod export;
pub mod session;
pub mod stream;

pub use export::{
    append_cleaned, average_segments, label_for_level, read_reading_groups, read_stream_groups,
    segment_features, write_features, CleanedGroup, ExportError, LabelledFeatures,
    SegmentAveraging, StreamGroup, CLEANED_FILE, CLEANED_HEADER,
};
pub use session::{SessionInfo, INFO_HEADER};
pub use stream::{
    BufferedSink, ImmediateSink, LiveStream, LogRecord, RowSink, StorageError, StreamLogger,
    DEFAULT_LOGGING_INTERVAL, INFO_FILE, STREAM_FILE, STREAM_HEADER,
};
