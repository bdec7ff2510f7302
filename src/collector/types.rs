//! Sample types produced by the acquisition layer.
//!
//! A device line carries comma-separated floats: `filtered,envelope[,signal]`.
//! Anything else is a [`ParseError`] and is discarded by the caller.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// One timestamped reading from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the Unix epoch, with sub-second precision
    pub timestamp: f64,
    /// Band-pass filtered amplitude
    pub filtered: f64,
    /// Smoothed envelope of the filtered amplitude
    pub envelope: f64,
    /// Optional third field used by the threshold-band detector
    pub signal: Option<f64>,
}

/// Which field of a [`Sample`] feeds a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleField {
    Filtered,
    Envelope,
    Signal,
}

impl SampleField {
    /// Parse a field name as accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "filtered" => Some(Self::Filtered),
            "envelope" => Some(Self::Envelope),
            "signal" => Some(Self::Signal),
            _ => None,
        }
    }
}

/// Errors raised while parsing a device line.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("expected at least 2 fields, found {found}")]
    TooFewFields { found: usize },
    #[error("field {index} is not a number: {value:?}")]
    InvalidNumber { index: usize, value: String },
}

impl Sample {
    /// Build a sample stamped with the current wall-clock time.
    pub fn now(filtered: f64, envelope: f64, signal: Option<f64>) -> Self {
        Self {
            timestamp: now_secs(),
            filtered,
            envelope,
            signal,
        }
    }

    /// Parse a device line, stamping it with `timestamp`.
    ///
    /// Fields beyond the third are ignored.
    pub fn parse_line(line: &str, timestamp: f64) -> Result<Self, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 2 {
            return Err(ParseError::TooFewFields {
                found: fields.len(),
            });
        }

        let number = |index: usize| -> Result<f64, ParseError> {
            let raw = fields[index].trim();
            raw.parse::<f64>().map_err(|_| ParseError::InvalidNumber {
                index,
                value: raw.to_string(),
            })
        };

        let signal = if fields.len() > 2 {
            Some(number(2)?)
        } else {
            None
        };

        Ok(Self {
            timestamp,
            filtered: number(0)?,
            envelope: number(1)?,
            signal,
        })
    }

    /// Value of the selected field, if present on this sample.
    pub fn field(&self, field: SampleField) -> Option<f64> {
        match field {
            SampleField::Filtered => Some(self.filtered),
            SampleField::Envelope => Some(self.envelope),
            SampleField::Signal => self.signal,
        }
    }

    /// The `(filtered, envelope)` pair as logged to the stream file.
    pub fn reading(&self) -> Reading {
        Reading {
            filtered: self.filtered,
            envelope: self.envelope,
        }
    }
}

/// Filtered/envelope pair, displayed as `(filtered, envelope)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub filtered: f64,
    pub envelope: f64,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}, {:?})", self.filtered, self.envelope)
    }
}

/// Current time as fractional seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Guarded slot holding the most recent sample.
///
/// Written by the acquisition thread, read by the coordinator and the
/// stream logger. Each read returns a whole sample, never a torn one.
#[derive(Debug, Clone, Default)]
pub struct LatestSample {
    inner: Arc<Mutex<Option<Sample>>>,
}

impl LatestSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored sample.
    pub fn store(&self, sample: Sample) {
        let mut slot = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(sample);
    }

    /// Copy out the stored sample, if any has arrived yet.
    pub fn load(&self) -> Option<Sample> {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Latest envelope value, if any sample has arrived.
    pub fn envelope(&self) -> Option<f64> {
        self.load().map(|s| s.envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_fields() {
        let sample = Sample::parse_line("12.5, 40.25\r\n", 1.0).unwrap();
        assert_eq!(sample.filtered, 12.5);
        assert_eq!(sample.envelope, 40.25);
        assert_eq!(sample.signal, None);
        assert_eq!(sample.timestamp, 1.0);
    }

    #[test]
    fn test_parse_three_fields() {
        let sample = Sample::parse_line("1,2,110", 0.0).unwrap();
        assert_eq!(sample.signal, Some(110.0));
        assert_eq!(sample.field(SampleField::Signal), Some(110.0));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(Sample::parse_line("   ", 0.0), Err(ParseError::Empty));
        assert_eq!(
            Sample::parse_line("42", 0.0),
            Err(ParseError::TooFewFields { found: 1 })
        );
        assert!(matches!(
            Sample::parse_line("1,abc", 0.0),
            Err(ParseError::InvalidNumber { index: 1, .. })
        ));
        assert!(matches!(
            Sample::parse_line("1,2,x", 0.0),
            Err(ParseError::InvalidNumber { index: 2, .. })
        ));
    }

    #[test]
    fn test_reading_display() {
        let sample = Sample::parse_line("1.5,2", 0.0).unwrap();
        assert_eq!(sample.reading().to_string(), "(1.5, 2.0)");
    }

    #[test]
    fn test_latest_sample_slot() {
        let slot = LatestSample::new();
        assert!(slot.load().is_none());

        let reader = slot.clone();
        slot.store(Sample::now(1.0, 2.0, None));
        assert_eq!(reader.envelope(), Some(2.0));
    }

    #[test]
    fn test_field_names() {
        assert_eq!(SampleField::from_name("Envelope"), Some(SampleField::Envelope));
        assert_eq!(SampleField::from_name("raw"), None);
    }
}
