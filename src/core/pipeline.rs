//! Pipeline coordination: window → features → decision → confirmation.
//!
//! A [`Detector`] turns a stream of scalar values into window verdicts. Two
//! detectors exist: [`ClassifierDetector`] scores feature vectors with a
//! trained model, [`BandDetector`] checks whether the window mode sits in a
//! band around a fixed threshold. The [`Coordinator`] feeds either one from
//! the acquisition channel or from a live stream iterator and emits
//! [`TriggerEvent`]s.
//!
//! Both detectors use batch windows: a full window is consumed and cleared,
//! and the next sample opens the next window.

use crate::collector::types::{now_secs, Sample, SampleField};
use crate::core::classifier::{decide, Classifier, ClassifierError};
use crate::core::decider::{band_decision, Confirmation, ConfirmationPolicy, Decider};
use crate::core::features::{extract, input_len, FeatureError};
use crate::core::windowing::SampleWindow;
use crate::stats::SharedStats;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long the run loop waits for a sample before re-checking shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors that stop the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// Which detector produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    Classifier,
    Band,
}

/// Outcome of scoring one full window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowVerdict {
    /// The per-window decision
    pub decision: bool,
    /// Model probability, for classifier windows
    pub probability: Option<f64>,
    /// Set when this decision completed a confirmation
    pub confirmation: Option<Confirmation>,
}

/// A confirmed detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Timestamp of the sample that completed the window
    pub timestamp: f64,
    pub mode: DetectionMode,
    /// Confirmed label; classifier confirmations are always positive
    pub label: bool,
    /// Window decisions that contributed to this confirmation
    pub decisions: usize,
}

/// Turns scalar values into window verdicts.
pub trait Detector: Send {
    /// Add one value; returns a verdict when it completed a window.
    fn push(&mut self, value: f64) -> Result<Option<WindowVerdict>, PipelineError>;

    /// Discard the partial window and any partial votes.
    fn reset(&mut self);

    /// Values currently held in the partial window.
    fn pending(&self) -> usize;

    fn mode(&self) -> DetectionMode;
}

/// Classifies windows with a trained model and confirms positives.
pub struct ClassifierDetector {
    window: SampleWindow,
    ar_order: usize,
    classifier: Box<dyn Classifier>,
    decider: Decider,
}

impl ClassifierDetector {
    /// Build a detector; fails if the model expects a different input size.
    pub fn new(
        classifier: Box<dyn Classifier>,
        window_size: usize,
        ar_order: usize,
        policy: ConfirmationPolicy,
    ) -> Result<Self, PipelineError> {
        if ar_order == 0 {
            return Err(FeatureError::InvalidOrder.into());
        }
        let expected = input_len(ar_order);
        if let Some(actual) = classifier.input_dim() {
            if actual != expected {
                return Err(ClassifierError::DimensionMismatch { expected, actual }.into());
            }
        }

        Ok(Self {
            window: SampleWindow::new(window_size.max(2)),
            ar_order,
            classifier,
            decider: Decider::new(policy),
        })
    }
}

impl Detector for ClassifierDetector {
    fn push(&mut self, value: f64) -> Result<Option<WindowVerdict>, PipelineError> {
        let Some(batch) = self.window.push(value) else {
            return Ok(None);
        };

        let features = extract(&batch, self.ar_order)?;
        let probability = self.classifier.predict(&features.to_input())?;
        let decision = decide(probability);
        debug!(
            probability,
            decision,
            wl = features.wl,
            dasdv = features.dasdv,
            "window classified"
        );

        let confirmation = self.decider.observe(decision);
        if confirmation.is_some() {
            self.window.clear();
        }

        Ok(Some(WindowVerdict {
            decision,
            probability: Some(probability),
            confirmation,
        }))
    }

    fn reset(&mut self) {
        self.window.clear();
        self.decider.reset();
    }

    fn pending(&self) -> usize {
        self.window.len()
    }

    fn mode(&self) -> DetectionMode {
        DetectionMode::Classifier
    }
}

/// Confirms whether the window mode sits near a fixed threshold.
pub struct BandDetector {
    window: SampleWindow,
    threshold: f64,
    pct: f64,
    decider: Decider,
}

impl BandDetector {
    pub fn new(window_size: usize, threshold: f64, pct: f64, policy: ConfirmationPolicy) -> Self {
        Self {
            window: SampleWindow::new(window_size),
            threshold,
            pct,
            decider: Decider::new(policy),
        }
    }
}

impl Detector for BandDetector {
    fn push(&mut self, value: f64) -> Result<Option<WindowVerdict>, PipelineError> {
        let Some(batch) = self.window.push(value) else {
            return Ok(None);
        };

        // A full batch always has a mode
        let decision = band_decision(&batch, self.threshold, self.pct).unwrap_or(false);
        debug!(decision, "band window decided");

        Ok(Some(WindowVerdict {
            decision,
            probability: None,
            confirmation: self.decider.observe(decision),
        }))
    }

    fn reset(&mut self) {
        self.window.clear();
        self.decider.reset();
    }

    fn pending(&self) -> usize {
        self.window.len()
    }

    fn mode(&self) -> DetectionMode {
        DetectionMode::Band
    }
}

/// Drives a detector from samples and publishes confirmed events.
pub struct Coordinator {
    detector: Box<dyn Detector>,
    field: SampleField,
    stats: SharedStats,
    events: Option<Sender<TriggerEvent>>,
}

impl Coordinator {
    /// Feed `field` of each sample into `detector`.
    pub fn new(detector: Box<dyn Detector>, field: SampleField, stats: SharedStats) -> Self {
        Self {
            detector,
            field,
            stats,
            events: None,
        }
    }

    /// Also send every confirmed event to `sender`.
    pub fn with_events(mut self, sender: Sender<TriggerEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Process one sample. Samples lacking the selected field are skipped.
    pub fn process_sample(
        &mut self,
        sample: &Sample,
    ) -> Result<Option<TriggerEvent>, PipelineError> {
        match sample.field(self.field) {
            Some(value) => self.process_value(value, sample.timestamp),
            None => {
                debug!("Sample has no {:?} field; skipping", self.field);
                Ok(None)
            }
        }
    }

    /// Process one raw value observed at `timestamp`.
    pub fn process_value(
        &mut self,
        value: f64,
        timestamp: f64,
    ) -> Result<Option<TriggerEvent>, PipelineError> {
        let Some(verdict) = self.detector.push(value)? else {
            return Ok(None);
        };
        self.stats.record_window();

        let Some(confirmation) = verdict.confirmation else {
            return Ok(None);
        };

        let event = TriggerEvent {
            timestamp,
            mode: self.detector.mode(),
            label: confirmation.label,
            decisions: confirmation.decisions,
        };
        self.publish(&event);
        Ok(Some(event))
    }

    /// Consume samples until the channel disconnects or `running` clears.
    ///
    /// Returns the number of events emitted.
    pub fn run(
        &mut self,
        receiver: &Receiver<Sample>,
        running: &AtomicBool,
    ) -> Result<usize, PipelineError> {
        let mut emitted = 0;
        while running.load(Ordering::SeqCst) {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(sample) => {
                    if self.process_sample(&sample)?.is_some() {
                        emitted += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Sample stream ended");
                    break;
                }
            }
        }
        Ok(emitted)
    }

    /// Consume a live value stream, such as the one produced by
    /// [`crate::storage::StreamLogger::live_stream`]. Missing values (read
    /// failures) are skipped.
    pub fn run_values<I>(&mut self, values: I, running: &AtomicBool) -> Result<usize, PipelineError>
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let mut emitted = 0;
        for value in values {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let Some(value) = value else {
                continue;
            };
            if self.process_value(value, now_secs())?.is_some() {
                emitted += 1;
            }
        }
        Ok(emitted)
    }

    pub fn reset(&mut self) {
        self.detector.reset();
    }

    pub fn pending(&self) -> usize {
        self.detector.pending()
    }

    fn publish(&self, event: &TriggerEvent) {
        self.stats.record_confirmation();
        info!(
            mode = ?event.mode,
            label = event.label,
            decisions = event.decisions,
            "Trigger confirmed"
        );
        if let Some(ref sender) = self.events {
            if sender.send(event.clone()).is_err() {
                warn!("Event receiver dropped; event not forwarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decider::DEFAULT_BAND_THRESHOLD;
    use crate::stats::create_shared_stats;

    fn always(probability: f64) -> Box<dyn Classifier> {
        Box::new(move |_: &[f64]| probability)
    }

    #[test]
    fn test_classifier_detector_confirms_after_five_windows() {
        let mut detector =
            ClassifierDetector::new(always(0.9), 50, 4, ConfirmationPolicy::consecutive())
                .unwrap();

        let mut verdicts = Vec::new();
        for i in 0..(50 * 5) {
            if let Some(verdict) = detector.push((i % 7) as f64).unwrap() {
                verdicts.push(verdict);
            }
        }

        assert_eq!(verdicts.len(), 5);
        assert!(verdicts[..4].iter().all(|v| v.confirmation.is_none()));
        assert!(verdicts[4].confirmation.unwrap().label);
        assert_eq!(detector.pending(), 0);
    }

    #[test]
    fn test_classifier_detector_rejects_wrong_input_size() {
        let network = crate::core::classifier::DenseNetwork::new(vec![
            crate::core::classifier::DenseLayer {
                weights: vec![vec![0.0; 5]],
                biases: vec![0.0],
                activation: crate::core::classifier::Activation::Sigmoid,
            },
        ])
        .unwrap();

        let result =
            ClassifierDetector::new(Box::new(network), 50, 4, ConfirmationPolicy::consecutive());
        assert!(matches!(
            result,
            Err(PipelineError::Classifier(
                ClassifierError::DimensionMismatch {
                    expected: 11,
                    actual: 5
                }
            ))
        ));
    }

    #[test]
    fn test_band_detector_votes_on_three_windows() {
        let mut detector =
            BandDetector::new(100, DEFAULT_BAND_THRESHOLD, 0.1, ConfirmationPolicy::majority());

        let mut confirmations = Vec::new();
        for value in [110.0, 300.0, 105.0] {
            for _ in 0..100 {
                if let Some(verdict) = detector.push(value).unwrap() {
                    if let Some(c) = verdict.confirmation {
                        confirmations.push(c);
                    }
                }
            }
        }

        assert_eq!(confirmations.len(), 1);
        assert!(confirmations[0].label);
        assert_eq!(confirmations[0].decisions, 3);
    }

    #[test]
    fn test_coordinator_emits_events_once() {
        let stats = create_shared_stats();
        let (tx, rx) = crossbeam_channel::unbounded();
        let detector =
            ClassifierDetector::new(always(0.7), 10, 2, ConfirmationPolicy::consecutive())
                .unwrap();
        let mut coordinator =
            Coordinator::new(Box::new(detector), SampleField::Envelope, stats.clone())
                .with_events(tx);

        let mut events = 0;
        for i in 0..100 {
            let sample = Sample::now(0.0, (i % 3) as f64, None);
            if coordinator.process_sample(&sample).unwrap().is_some() {
                events += 1;
            }
        }

        // 10 windows, one confirmation per 5 positive windows
        assert_eq!(events, 2);
        assert_eq!(rx.try_iter().count(), 2);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.windows_classified, 10);
        assert_eq!(snapshot.confirmations, 2);
    }

    #[test]
    fn test_coordinator_skips_missing_field() {
        let stats = create_shared_stats();
        let detector = BandDetector::new(2, 110.0, 0.1, ConfirmationPolicy::majority());
        let mut coordinator = Coordinator::new(Box::new(detector), SampleField::Signal, stats);

        let sample = Sample::now(1.0, 2.0, None);
        assert!(coordinator.process_sample(&sample).unwrap().is_none());
        assert_eq!(coordinator.pending(), 0);
    }

    #[test]
    fn test_run_values_skips_sentinels() {
        let stats = create_shared_stats();
        let detector = BandDetector::new(2, 110.0, 0.1, ConfirmationPolicy::Majority { votes: 1 });
        let mut coordinator = Coordinator::new(Box::new(detector), SampleField::Envelope, stats);
        let running = AtomicBool::new(true);

        let values = vec![Some(110.0), None, Some(110.0), Some(1.0), None, Some(1.0)];
        assert_eq!(coordinator.run_values(values, &running).unwrap(), 2);
    }

    #[test]
    fn test_run_stops_when_channel_disconnects() {
        let stats = create_shared_stats();
        let detector = BandDetector::new(2, 110.0, 0.1, ConfirmationPolicy::Majority { votes: 1 });
        let mut coordinator = Coordinator::new(Box::new(detector), SampleField::Envelope, stats);
        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..4 {
            tx.send(Sample::now(0.0, 110.0, None)).unwrap();
        }
        drop(tx);

        let running = AtomicBool::new(true);
        assert_eq!(coordinator.run(&rx, &running).unwrap(), 2);
    }
}
