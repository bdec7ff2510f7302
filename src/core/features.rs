//! Feature computation from sample windows.
//!
//! Each window is summarised by three difference statistics (waveform
//! length, average amplitude change, difference absolute standard deviation)
//! plus autoregressive coefficients and the cepstral coefficients derived
//! from them.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default autoregressive model order.
pub const DEFAULT_AR_ORDER: usize = 4;

/// Number of scalar features ahead of the AR/CC blocks.
const SCALAR_FEATURES: usize = 3;

/// Errors raised by feature extraction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("window of {len} samples is too short, at least 2 are required")]
    DegenerateWindow { len: usize },
    #[error("autoregressive order must be at least 1")]
    InvalidOrder,
}

/// Features computed from one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Waveform length
    pub wl: f64,
    /// Average amplitude change
    pub aac: f64,
    /// Difference absolute standard deviation value
    pub dasdv: f64,
    /// Autoregressive coefficients, lag 1 first
    pub ar: Vec<f64>,
    /// Cepstral coefficients derived from `ar`
    pub cc: Vec<f64>,
}

impl FeatureVector {
    /// Flatten to classifier input order: `WL, AAC, DASDV, AR.., CC..`.
    pub fn to_input(&self) -> Vec<f64> {
        let mut input = Vec::with_capacity(SCALAR_FEATURES + self.ar.len() + self.cc.len());
        input.extend([self.wl, self.aac, self.dasdv]);
        input.extend_from_slice(&self.ar);
        input.extend_from_slice(&self.cc);
        input
    }

    /// The model order these features were computed with.
    pub fn ar_order(&self) -> usize {
        self.ar.len()
    }
}

/// Length of the flattened feature vector for a given AR order.
pub fn input_len(ar_order: usize) -> usize {
    SCALAR_FEATURES + 2 * ar_order
}

/// Compute all features from a window.
///
/// Windows shorter than two samples have no differences to measure and are
/// rejected with [`FeatureError::DegenerateWindow`].
pub fn extract(window: &[f64], ar_order: usize) -> Result<FeatureVector, FeatureError> {
    if ar_order == 0 {
        return Err(FeatureError::InvalidOrder);
    }
    let n = window.len();
    if n < 2 {
        return Err(FeatureError::DegenerateWindow { len: n });
    }

    let wl = waveform_length(window);
    let aac = wl / n as f64;
    let dasdv = (squared_difference_sum(window) / (n - 1) as f64).sqrt();

    let ar = fit_autoregressive(window, ar_order);
    let cc = cepstral_coefficients(&ar);

    Ok(FeatureVector {
        wl,
        aac,
        dasdv,
        ar,
        cc,
    })
}

/// Like [`extract`], but a single-sample window yields an all-zero vector.
///
/// Used when chunking recordings, where the trailing chunk may hold one
/// sample. An empty window is still an error.
pub fn extract_lenient(window: &[f64], ar_order: usize) -> Result<FeatureVector, FeatureError> {
    if ar_order == 0 {
        return Err(FeatureError::InvalidOrder);
    }
    match window.len() {
        0 => Err(FeatureError::DegenerateWindow { len: 0 }),
        1 => Ok(FeatureVector {
            wl: 0.0,
            aac: 0.0,
            dasdv: 0.0,
            ar: vec![0.0; ar_order],
            cc: vec![0.0; ar_order],
        }),
        _ => extract(window, ar_order),
    }
}

/// Sum of absolute first differences.
fn waveform_length(x: &[f64]) -> f64 {
    x.windows(2).map(|pair| (pair[1] - pair[0]).abs()).sum()
}

/// Sum of squared first differences.
fn squared_difference_sum(x: &[f64]) -> f64 {
    x.windows(2).map(|pair| (pair[1] - pair[0]).powi(2)).sum()
}

/// Fit `x[t] = c + a1*x[t-1] + ... + ap*x[t-p]` by ordinary least squares.
///
/// Returns `a1..ap`; the intercept is dropped. The system is solved through
/// an SVD pseudo-inverse, so rank-deficient designs (constant windows, for
/// example) give the minimum-norm solution rather than failing. With no
/// regression rows (`len <= order`) the coefficients are all zero.
fn fit_autoregressive(x: &[f64], order: usize) -> Vec<f64> {
    let n = x.len();
    if n <= order {
        return vec![0.0; order];
    }

    let rows = n - order;
    let cols = order + 1;
    let design = DMatrix::from_fn(rows, cols, |r, c| {
        if c == 0 {
            1.0
        } else {
            x[order + r - c]
        }
    });
    let target = DVector::from_fn(rows, |r, _| x[order + r]);

    let svd = design.svd(true, true);
    // Singular values below this relative cutoff are treated as zero
    let tolerance = svd.singular_values.max() * rows.max(cols) as f64 * f64::EPSILON;

    match svd.solve(&target, tolerance) {
        Ok(beta) => beta.iter().skip(1).copied().collect(),
        Err(_) => vec![0.0; order],
    }
}

/// Cepstral coefficients from AR coefficients.
///
/// `c1 = -a1`, then for `p = 2..=P`:
/// `cp = -ap - sum_{l=1}^{p-1} (1 - l/p) * al * c(p-l)`.
fn cepstral_coefficients(ar: &[f64]) -> Vec<f64> {
    let order = ar.len();
    let mut cc = vec![0.0; order];
    if order == 0 {
        return cc;
    }

    cc[0] = -ar[0];
    for p in 2..=order {
        let mut sum = 0.0;
        for l in 1..p {
            sum += (1.0 - l as f64 / p as f64) * ar[l - 1] * cc[p - l - 1];
        }
        cc[p - 1] = -ar[p - 1] - sum;
    }
    cc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_ramp_difference_features() {
        let features = extract(&ramp(50), DEFAULT_AR_ORDER).unwrap();
        assert_eq!(features.wl, 49.0);
        assert_eq!(features.aac, 0.98);
        assert_eq!(features.dasdv, 1.0);
    }

    #[test]
    fn test_constant_window() {
        let features = extract(&[3.5; 20], DEFAULT_AR_ORDER).unwrap();
        assert_eq!(features.wl, 0.0);
        assert_eq!(features.aac, 0.0);
        assert_eq!(features.dasdv, 0.0);
        assert!(features.ar.iter().all(|a| a.is_finite()));
        assert_eq!(features.ar.len(), DEFAULT_AR_ORDER);
    }

    #[test]
    fn test_aac_is_wl_over_len() {
        let window = vec![0.3, -1.2, 4.0, 2.5, 2.5, -0.7, 1.1];
        let features = extract(&window, 2).unwrap();
        assert!(features.wl >= 0.0);
        assert_eq!(features.aac, features.wl / window.len() as f64);
    }

    #[test]
    fn test_degenerate_windows() {
        assert_eq!(
            extract(&[1.0], 4),
            Err(FeatureError::DegenerateWindow { len: 1 })
        );
        assert_eq!(extract(&[], 4), Err(FeatureError::DegenerateWindow { len: 0 }));
        assert_eq!(extract(&[1.0, 2.0], 0), Err(FeatureError::InvalidOrder));
    }

    #[test]
    fn test_lenient_single_sample() {
        let features = extract_lenient(&[7.0], 4).unwrap();
        assert_eq!(features.ar, vec![0.0; 4]);
        assert_eq!(features.cc, vec![0.0; 4]);
        assert_eq!(features.dasdv, 0.0);
        assert!(extract_lenient(&[], 4).is_err());
    }

    #[test]
    fn test_ar_recovers_geometric_decay() {
        let window: Vec<f64> = (0..30).map(|k| 100.0 * 0.5f64.powi(k)).collect();
        let features = extract(&window, 1).unwrap();
        assert!((features.ar[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ar_on_ramp_is_unit_root() {
        let features = extract(&ramp(50), 1).unwrap();
        assert!((features.ar[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_order_one_cepstrum_negates_ar() {
        for window in [ramp(10), vec![1.0, 4.0, 2.0, 8.0, 5.0, 7.0]] {
            let features = extract(&window, 1).unwrap();
            assert_eq!(features.cc, vec![-features.ar[0]]);
        }
    }

    #[test]
    fn test_cepstral_recursion() {
        let ar = [0.5, -0.25, 0.1];
        let cc = cepstral_coefficients(&ar);

        let c1 = -0.5;
        let c2 = -(-0.25) - (1.0 - 1.0 / 2.0) * 0.5 * c1;
        let c3 = -0.1 - ((1.0 - 1.0 / 3.0) * 0.5 * c2 + (1.0 - 2.0 / 3.0) * -0.25 * c1);
        assert_eq!(cc, vec![c1, c2, c3]);
    }

    #[test]
    fn test_short_window_ar_falls_back_to_zero() {
        let features = extract(&[1.0, 2.0, 3.0], 4).unwrap();
        assert_eq!(features.ar, vec![0.0; 4]);
        assert_eq!(features.cc, vec![0.0; 4]);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let window: Vec<f64> = (0..50).map(|i| ((i * 37) % 11) as f64 - 5.0).collect();
        let first = extract(&window, 4).unwrap();
        let second = extract(&window, 4).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_input_layout() {
        let features = extract(&ramp(50), 4).unwrap();
        let input = features.to_input();
        assert_eq!(input.len(), input_len(4));
        assert_eq!(input.len(), 11);
        assert_eq!(input[0], features.wl);
        assert_eq!(&input[3..7], features.ar.as_slice());
        assert_eq!(&input[7..], features.cc.as_slice());
    }
}
