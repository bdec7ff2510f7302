//! Debouncing of per-window decisions.
//!
//! A single window decision is noisy. The [`Decider`] accumulates decisions
//! and only emits a [`Confirmation`] once its policy is satisfied, then
//! resets. Two policies are supported:
//!
//! - [`ConfirmationPolicy::Majority`]: collect a fixed number of votes and
//!   emit their mode (which may be `false`).
//! - [`ConfirmationPolicy::Consecutive`]: count positive decisions and emit a
//!   positive confirmation when the count reaches the threshold.

use serde::{Deserialize, Serialize};

/// Default number of votes for majority confirmation.
pub const DEFAULT_MAJORITY_VOTES: usize = 3;

/// Default positive count for consecutive confirmation.
pub const DEFAULT_CONSECUTIVE_THRESHOLD: usize = 5;

/// Default band centre for the threshold detector.
pub const DEFAULT_BAND_THRESHOLD: f64 = 110.0;

/// Default band half-width as a fraction of the centre.
pub const DEFAULT_BAND_PCT: f64 = 0.1;

/// How decisions are turned into confirmations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// Emit the mode of every `votes` decisions.
    Majority { votes: usize },
    /// Emit a positive once `threshold` positives have been seen.
    ///
    /// With `reset_on_false == false` a negative decision leaves the count
    /// untouched, so positives need not be contiguous.
    Consecutive {
        threshold: usize,
        reset_on_false: bool,
    },
}

impl ConfirmationPolicy {
    pub fn majority() -> Self {
        Self::Majority {
            votes: DEFAULT_MAJORITY_VOTES,
        }
    }

    pub fn consecutive() -> Self {
        Self::Consecutive {
            threshold: DEFAULT_CONSECUTIVE_THRESHOLD,
            reset_on_false: false,
        }
    }
}

/// Where the decider is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeciderState {
    /// Nothing counted yet
    Accumulating,
    /// Some votes counted, policy not yet satisfied
    Voting,
    /// A confirmation was just emitted and the counters reset
    Confirmed,
}

/// A confirmed decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    /// The confirmed label
    pub label: bool,
    /// Decisions observed since the previous confirmation
    pub decisions: usize,
}

/// Snapshot of the decider's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationState {
    pub votes: Vec<bool>,
    pub consecutive_true: usize,
}

/// Stateful debouncer.
#[derive(Debug, Clone)]
pub struct Decider {
    policy: ConfirmationPolicy,
    votes: Vec<bool>,
    consecutive_true: usize,
    observed: usize,
    state: DeciderState,
}

impl Decider {
    /// Create a decider. Zero vote counts or thresholds are treated as one.
    pub fn new(policy: ConfirmationPolicy) -> Self {
        let policy = match policy {
            ConfirmationPolicy::Majority { votes } => ConfirmationPolicy::Majority {
                votes: votes.max(1),
            },
            ConfirmationPolicy::Consecutive {
                threshold,
                reset_on_false,
            } => ConfirmationPolicy::Consecutive {
                threshold: threshold.max(1),
                reset_on_false,
            },
        };

        Self {
            policy,
            votes: Vec::new(),
            consecutive_true: 0,
            observed: 0,
            state: DeciderState::Accumulating,
        }
    }

    /// Feed one decision; returns a confirmation when the policy fires.
    pub fn observe(&mut self, decision: bool) -> Option<Confirmation> {
        self.observed += 1;

        let confirmed = match self.policy {
            ConfirmationPolicy::Majority { votes } => {
                self.votes.push(decision);
                if self.votes.len() >= votes {
                    mode_first(&self.votes)
                } else {
                    None
                }
            }
            ConfirmationPolicy::Consecutive {
                threshold,
                reset_on_false,
            } => {
                if decision {
                    self.consecutive_true += 1;
                } else if reset_on_false {
                    self.consecutive_true = 0;
                }
                (self.consecutive_true >= threshold).then_some(true)
            }
        };

        match confirmed {
            Some(label) => {
                let confirmation = Confirmation {
                    label,
                    decisions: self.observed,
                };
                self.clear();
                self.state = DeciderState::Confirmed;
                Some(confirmation)
            }
            None => {
                self.state = if self.votes.is_empty() && self.consecutive_true == 0 {
                    DeciderState::Accumulating
                } else {
                    DeciderState::Voting
                };
                None
            }
        }
    }

    /// Drop any partial vote sequence.
    pub fn reset(&mut self) {
        self.clear();
        self.state = DeciderState::Accumulating;
    }

    pub fn state(&self) -> DeciderState {
        self.state
    }

    pub fn policy(&self) -> ConfirmationPolicy {
        self.policy
    }

    pub fn confirmation_state(&self) -> ConfirmationState {
        ConfirmationState {
            votes: self.votes.clone(),
            consecutive_true: self.consecutive_true,
        }
    }

    fn clear(&mut self) {
        self.votes.clear();
        self.consecutive_true = 0;
        self.observed = 0;
    }
}

/// Most common value; on a tie the value seen first wins.
pub fn mode_first<T: Copy + PartialEq>(values: &[T]) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for &value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(T, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

/// Whether the mode of `window` lies within `threshold ± threshold * pct`.
///
/// Returns `None` for an empty window.
pub fn band_decision(window: &[f64], threshold: f64, pct: f64) -> Option<bool> {
    let mode = mode_first(window)?;
    let margin = threshold * pct;
    Some(mode <= threshold + margin && mode >= threshold - margin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_positives_confirm_once() {
        let mut decider = Decider::new(ConfirmationPolicy::consecutive());
        let decisions = [true, false, true, true, false, false, true, true];

        let confirmations: Vec<Confirmation> =
            decisions.iter().filter_map(|&d| decider.observe(d)).collect();

        assert_eq!(confirmations.len(), 1);
        assert!(confirmations[0].label);
        assert_eq!(confirmations[0].decisions, decisions.len());
        assert_eq!(decider.state(), DeciderState::Confirmed);
        assert_eq!(decider.confirmation_state(), ConfirmationState::default());
    }

    #[test]
    fn test_four_positives_do_not_confirm() {
        let mut decider = Decider::new(ConfirmationPolicy::consecutive());
        for decision in [true, true, false, true, true] {
            assert!(decider.observe(decision).is_none());
        }
        assert_eq!(decider.state(), DeciderState::Voting);
        assert_eq!(decider.confirmation_state().consecutive_true, 4);
    }

    /// Negatives do not reset the positive count. This keeps the behaviour
    /// of the deployed detector; `reset_on_false` switches to strict runs.
    #[test]
    fn test_negative_does_not_reset_count_by_default() {
        let mut decider = Decider::new(ConfirmationPolicy::consecutive());
        for _ in 0..4 {
            decider.observe(true);
        }
        for _ in 0..10 {
            assert!(decider.observe(false).is_none());
        }
        assert!(decider.observe(true).is_some());
    }

    #[test]
    fn test_reset_on_false_requires_a_run() {
        let mut decider = Decider::new(ConfirmationPolicy::Consecutive {
            threshold: 3,
            reset_on_false: true,
        });
        for decision in [true, true, false, true, true] {
            assert!(decider.observe(decision).is_none());
        }
        assert_eq!(
            decider.observe(true),
            Some(Confirmation {
                label: true,
                decisions: 6
            })
        );
    }

    #[test]
    fn test_majority_emits_mode_of_votes() {
        let mut decider = Decider::new(ConfirmationPolicy::majority());
        assert!(decider.observe(false).is_none());
        assert!(decider.observe(true).is_none());
        assert_eq!(decider.state(), DeciderState::Voting);
        let confirmation = decider.observe(false).unwrap();
        assert!(!confirmation.label);

        decider.observe(true);
        decider.observe(true);
        assert!(decider.observe(false).unwrap().label);
    }

    #[test]
    fn test_majority_tie_takes_first_vote() {
        let mut decider = Decider::new(ConfirmationPolicy::Majority { votes: 4 });
        for decision in [false, true, true] {
            decider.observe(decision);
        }
        assert_eq!(decider.observe(false).map(|c| c.label), Some(false));
    }

    #[test]
    fn test_reset_discards_partial_votes() {
        let mut decider = Decider::new(ConfirmationPolicy::consecutive());
        decider.observe(true);
        decider.reset();
        assert_eq!(decider.state(), DeciderState::Accumulating);
        assert_eq!(decider.confirmation_state().consecutive_true, 0);
    }

    #[test]
    fn test_mode_first() {
        assert_eq!(mode_first(&[1.0, 2.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(mode_first(&[5.0, 4.0, 4.0, 5.0]), Some(5.0));
        assert_eq!(mode_first::<f64>(&[]), None);
    }

    #[test]
    fn test_band_decision() {
        let at_threshold = vec![DEFAULT_BAND_THRESHOLD; 100];
        assert_eq!(
            band_decision(&at_threshold, DEFAULT_BAND_THRESHOLD, DEFAULT_BAND_PCT),
            Some(true)
        );

        let above = vec![DEFAULT_BAND_THRESHOLD * 1.2; 100];
        assert_eq!(
            band_decision(&above, DEFAULT_BAND_THRESHOLD, DEFAULT_BAND_PCT),
            Some(false)
        );

        // Mode decides, not the mean
        let mut mixed = vec![500.0; 40];
        mixed.extend(vec![105.0; 60]);
        assert_eq!(band_decision(&mixed, 110.0, 0.1), Some(true));

        assert_eq!(band_decision(&[], 110.0, 0.1), None);
    }
}
