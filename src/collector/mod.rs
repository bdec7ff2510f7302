//! Sample acquisition for the EMG Trigger Agent.
//!
//! A [`SampleSource`] yields device-format lines; [`Acquisition`] reads them
//! on a background thread and fans parsed samples out to a channel and a
//! guarded latest-sample slot.

pub mod acquisition;
pub mod source;
pub mod types;

pub use acquisition::{Acquisition, AcquisitionConfig, AcquisitionError};
pub use source::{
    open_device, LineRead, LineSource, ReplaySource, SampleSource, SourceError,
    DEVICE_POLL_INTERVAL,
};
pub use types::{now_secs, LatestSample, ParseError, Reading, Sample, SampleField};
