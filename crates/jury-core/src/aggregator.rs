//! Score aggregation strategies.
//!
//! Built-in strategies form a closed enum so callers can match on them
//! exhaustively; [`ScoreAggregator::Custom`] wraps a plain function for
//! domain-specific policies (weighted votes, trimmed means, ...).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{JuryError, Result};

/// Signature of a custom aggregation function.
pub type AggregateFn = dyn Fn(&[f64]) -> Result<f64> + Send + Sync;

/// A named, user-supplied aggregation function.
#[derive(Clone)]
pub struct CustomAggregator {
    name: String,
    func: Arc<AggregateFn>,
}

impl CustomAggregator {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[f64]) -> Result<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAggregator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for CustomAggregator {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.func, &other.func)
    }
}

/// Strategy reducing a list of per-model scores to one score.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScoreAggregator {
    /// Arithmetic mean.
    #[default]
    Average,
    /// Middle value; mean of the two middle values for even counts.
    Median,
    /// Most conservative score.
    Min,
    /// Most optimistic score.
    Max,
    /// Binary verdicts: a score >= 0.5 is a "yes" vote. 1.0 when yes-votes
    /// are a strict majority, otherwise 0.0 (ties resolve to 0.0).
    MajorityVoting,
    /// Mean of the scores, but only when `max - min <= tolerance`.
    Consensus { tolerance: f64 },
    /// User-supplied strategy. Not representable in configuration files.
    #[serde(skip)]
    Custom(CustomAggregator),
}

impl ScoreAggregator {
    pub fn consensus(tolerance: f64) -> Self {
        ScoreAggregator::Consensus { tolerance }
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&[f64]) -> Result<f64> + Send + Sync + 'static,
    {
        ScoreAggregator::Custom(CustomAggregator::new(name, func))
    }

    /// Stable strategy name used in reports and logs.
    pub fn name(&self) -> String {
        match self {
            ScoreAggregator::Average => "AVERAGE".to_string(),
            ScoreAggregator::Median => "MEDIAN".to_string(),
            ScoreAggregator::Min => "MIN".to_string(),
            ScoreAggregator::Max => "MAX".to_string(),
            ScoreAggregator::MajorityVoting => "MAJORITY_VOTING".to_string(),
            ScoreAggregator::Consensus { tolerance } => format!("CONSENSUS({tolerance})"),
            ScoreAggregator::Custom(custom) => custom.name.clone(),
        }
    }

    /// Reduce `scores` to one value.
    ///
    /// The executor only calls this with at least one score; an empty slice
    /// is rejected with [`JuryError::EmptyScores`].
    pub fn aggregate(&self, scores: &[f64]) -> Result<f64> {
        if scores.is_empty() {
            return Err(JuryError::EmptyScores);
        }

        match self {
            ScoreAggregator::Average => Ok(mean(scores)),
            ScoreAggregator::Median => Ok(median(scores)),
            ScoreAggregator::Min => Ok(scores.iter().copied().fold(f64::INFINITY, f64::min)),
            ScoreAggregator::Max => Ok(scores.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            ScoreAggregator::MajorityVoting => {
                let yes = scores.iter().filter(|s| **s >= 0.5).count();
                Ok(if yes * 2 > scores.len() { 1.0 } else { 0.0 })
            }
            ScoreAggregator::Consensus { tolerance } => {
                let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
                let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                if max - min <= *tolerance {
                    Ok(mean(scores))
                } else {
                    Err(JuryError::NoConsensus {
                        min,
                        max,
                        tolerance: *tolerance,
                    })
                }
            }
            ScoreAggregator::Custom(custom) => (custom.func)(scores),
        }
    }
}

impl fmt::Display for ScoreAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ScoreAggregator {
    type Err = JuryError;

    /// Accepts `average`, `median`, `min`, `max`, `majority_voting` and
    /// `consensus:<tolerance>` (case-insensitive).
    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "average" | "avg" | "mean" => Ok(ScoreAggregator::Average),
            "median" => Ok(ScoreAggregator::Median),
            "min" => Ok(ScoreAggregator::Min),
            "max" => Ok(ScoreAggregator::Max),
            "majority_voting" | "majority" => Ok(ScoreAggregator::MajorityVoting),
            other => {
                let Some(raw) = other.strip_prefix("consensus:") else {
                    return Err(JuryError::InvalidAggregator(s.to_string()));
                };
                let tolerance: f64 = raw
                    .parse()
                    .map_err(|_| JuryError::InvalidAggregator(format!("bad tolerance in {s}")))?;
                if !tolerance.is_finite() || tolerance < 0.0 {
                    return Err(JuryError::InvalidAggregator(format!(
                        "tolerance must be a non-negative number, got {raw}"
                    )));
                }
                Ok(ScoreAggregator::Consensus { tolerance })
            }
        }
    }
}

fn mean(scores: &[f64]) -> f64 {
    scores.iter().sum::<f64>() / scores.len() as f64
}

fn median(scores: &[f64]) -> f64 {
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn average_is_arithmetic_mean() {
        let score = ScoreAggregator::Average.aggregate(&[0.8, 0.6]).unwrap();
        assert!(close(score, 0.7));
    }

    #[test]
    fn median_odd_and_even() {
        assert_eq!(ScoreAggregator::Median.aggregate(&[0.9, 0.1, 0.5]).unwrap(), 0.5);
        assert!(close(
            ScoreAggregator::Median.aggregate(&[0.4, 0.1, 0.8, 0.6]).unwrap(),
            0.5
        ));
    }

    #[test]
    fn min_and_max() {
        let scores = [0.3, 0.9, 0.5];
        assert_eq!(ScoreAggregator::Min.aggregate(&scores).unwrap(), 0.3);
        assert_eq!(ScoreAggregator::Max.aggregate(&scores).unwrap(), 0.9);
    }

    #[test]
    fn majority_voting_tie_is_false() {
        assert_eq!(ScoreAggregator::MajorityVoting.aggregate(&[1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn majority_voting_strict_majority() {
        assert_eq!(
            ScoreAggregator::MajorityVoting.aggregate(&[1.0, 0.5, 0.2]).unwrap(),
            1.0
        );
        assert_eq!(
            ScoreAggregator::MajorityVoting.aggregate(&[0.49, 0.5, 0.2]).unwrap(),
            0.0
        );
    }

    #[test]
    fn consensus_within_tolerance_averages() {
        let score = ScoreAggregator::consensus(0.1).aggregate(&[0.80, 0.85]).unwrap();
        assert!(close(score, 0.825));
    }

    #[test]
    fn consensus_outside_tolerance_fails_with_range() {
        let err = ScoreAggregator::consensus(0.1)
            .aggregate(&[0.2, 0.9])
            .unwrap_err();
        match err {
            JuryError::NoConsensus {
                min,
                max,
                tolerance,
            } => {
                assert_eq!(min, 0.2);
                assert_eq!(max, 0.9);
                assert_eq!(tolerance, 0.1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn consensus_boundary_is_inclusive() {
        assert!(ScoreAggregator::consensus(0.5).aggregate(&[0.0, 0.5]).is_ok());
    }

    #[test]
    fn empty_scores_rejected() {
        assert!(matches!(
            ScoreAggregator::Average.aggregate(&[]),
            Err(JuryError::EmptyScores)
        ));
    }

    #[test]
    fn names_are_stable() {
        assert_eq!(ScoreAggregator::Average.name(), "AVERAGE");
        assert_eq!(ScoreAggregator::Median.name(), "MEDIAN");
        assert_eq!(ScoreAggregator::Min.name(), "MIN");
        assert_eq!(ScoreAggregator::Max.name(), "MAX");
        assert_eq!(ScoreAggregator::MajorityVoting.name(), "MAJORITY_VOTING");
        assert_eq!(ScoreAggregator::consensus(0.1).name(), "CONSENSUS(0.1)");
        assert_eq!(ScoreAggregator::Average.name(), ScoreAggregator::Average.name());
    }

    #[test]
    fn custom_aggregator_runs_closure() {
        let weighted = ScoreAggregator::custom("FIRST_WINS", |scores| Ok(scores[0]));
        assert_eq!(weighted.name(), "FIRST_WINS");
        assert_eq!(weighted.aggregate(&[0.3, 0.9]).unwrap(), 0.3);
    }

    #[test]
    fn parses_from_str() {
        assert_eq!("median".parse::<ScoreAggregator>().unwrap(), ScoreAggregator::Median);
        assert_eq!(
            "MAJORITY_VOTING".parse::<ScoreAggregator>().unwrap(),
            ScoreAggregator::MajorityVoting
        );
        assert_eq!(
            "consensus:0.25".parse::<ScoreAggregator>().unwrap(),
            ScoreAggregator::consensus(0.25)
        );
        assert!("consensus:-1".parse::<ScoreAggregator>().is_err());
        assert!("vibes".parse::<ScoreAggregator>().is_err());
    }

    #[test]
    fn serde_uses_type_tag() {
        let json = serde_json::to_value(ScoreAggregator::consensus(0.2)).unwrap();
        assert_eq!(json["type"], "consensus");
        let back: ScoreAggregator =
            serde_json::from_value(serde_json::json!({ "type": "majority_voting" })).unwrap();
        assert_eq!(back, ScoreAggregator::MajorityVoting);
    }
}
