//! Core signal processing for the EMG Trigger Agent.
//!
//! This module contains:
//! - Batch windows of raw values
//! - Feature extraction (difference statistics, AR and cepstral coefficients)
//! - Window classification and decision debouncing
//! - The pipeline coordinator tying them together

pub mod classifier;
pub mod decider;
pub mod features;
pub mod pipeline;
pub mod windowing;

// Re-export commonly used types
pub use classifier::{decide, Classifier, ClassifierError, DenseNetwork, DECISION_THRESHOLD};
pub use decider::{
    band_decision, Confirmation, ConfirmationPolicy, ConfirmationState, Decider, DeciderState,
};
pub use features::{extract, extract_lenient, FeatureError, FeatureVector, DEFAULT_AR_ORDER};
pub use pipeline::{
    BandDetector, ClassifierDetector, Coordinator, DetectionMode, Detector, PipelineError,
    TriggerEvent, WindowVerdict,
};
pub use windowing::{SampleWindow, BAND_WINDOW, CLASSIFIER_WINDOW};
