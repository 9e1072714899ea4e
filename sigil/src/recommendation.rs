//! Recommendation model and algorithm selection.
//!
//! The backend offers two recommendation algorithms. The operator picks one
//! through the [`AlgorithmSelector`]; the poller reads it once at the start of
//! every tick, so a change takes effect on the next tick and never mid-flight.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::backend::{RawRecommendation, DQN_PATH, Q_LEARNING_PATH};
use crate::coord::Coordinate;

/// Backend recommendation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Tabular Q-learning agent.
    #[default]
    QLearning,
    /// Deep Q-network agent, which also predicts speeds at the next position.
    Dqn,
}

impl Algorithm {
    /// Backend endpoint path serving this algorithm.
    pub fn endpoint_path(&self) -> &'static str {
        match self {
            Algorithm::QLearning => Q_LEARNING_PATH,
            Algorithm::Dqn => DQN_PATH,
        }
    }

    /// Configuration/CLI spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::QLearning => "q-learning",
            Algorithm::Dqn => "dqn",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Algorithm::QLearning => 0,
            Algorithm::Dqn => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Algorithm::Dqn,
            _ => Algorithm::QLearning,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::QLearning => write!(f, "Q-Learning"),
            Algorithm::Dqn => write!(f, "DQN"),
        }
    }
}

/// Error parsing an algorithm name.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Unknown algorithm '{0}' (expected 'q-learning' or 'dqn')")]
pub struct ParseAlgorithmError(pub String);

impl FromStr for Algorithm {
    type Err = ParseAlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "q-learning" | "qlearning" | "q_learning" | "q" => Ok(Algorithm::QLearning),
            "dqn" => Ok(Algorithm::Dqn),
            _ => Err(ParseAlgorithmError(s.to_string())),
        }
    }
}

/// Session-scoped holder of the active algorithm.
///
/// Cloning shares the same cell. Written only by operator selection.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmSelector {
    active: Arc<AtomicU8>,
}

impl AlgorithmSelector {
    /// Create a selector starting at `initial`.
    pub fn new(initial: Algorithm) -> Self {
        Self {
            active: Arc::new(AtomicU8::new(initial.to_u8())),
        }
    }

    /// Currently active algorithm.
    pub fn current(&self) -> Algorithm {
        Algorithm::from_u8(self.active.load(Ordering::Acquire))
    }

    /// Select a new algorithm, returning the previous one.
    pub fn select(&self, algorithm: Algorithm) -> Algorithm {
        let previous = Algorithm::from_u8(self.active.swap(algorithm.to_u8(), Ordering::AcqRel));
        if previous != algorithm {
            tracing::info!(from = %previous, to = %algorithm, "Recommendation algorithm changed");
        }
        previous
    }
}

/// Algorithm-specific part of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecommendationDetail {
    QLearning,
    Dqn {
        predicted_download_mbps: f64,
        predicted_upload_mbps: f64,
    },
}

impl RecommendationDetail {
    /// Algorithm that produced this recommendation.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            RecommendationDetail::QLearning => Algorithm::QLearning,
            RecommendationDetail::Dqn { .. } => Algorithm::Dqn,
        }
    }
}

/// A validated recommendation from one backend response.
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    /// Suggested action (e.g. "left", "up").
    pub action: String,
    /// Position the backend believed the device was at.
    pub current_position: Option<Coordinate>,
    /// Recommended next position.
    pub next_position: Coordinate,
    pub detail: RecommendationDetail,
}

/// Reasons a backend response is rejected.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RecommendationError {
    #[error("response has no recommended_action")]
    MissingAction,

    #[error("response has no next_position")]
    MissingNextPosition,

    #[error("DQN response has no {0}")]
    MissingPrediction(&'static str),
}

impl Recommendation {
    /// Validate a raw backend response for the algorithm that was requested.
    pub fn from_raw(
        raw: RawRecommendation,
        algorithm: Algorithm,
    ) -> Result<Self, RecommendationError> {
        let action = raw
            .recommended_action
            .filter(|a| !a.trim().is_empty())
            .ok_or(RecommendationError::MissingAction)?;

        let next_position = raw
            .next_position
            .ok_or(RecommendationError::MissingNextPosition)?;

        let detail = match algorithm {
            Algorithm::QLearning => RecommendationDetail::QLearning,
            Algorithm::Dqn => RecommendationDetail::Dqn {
                predicted_download_mbps: raw
                    .predicted_download_speed
                    .ok_or(RecommendationError::MissingPrediction("predicted_download_speed"))?,
                predicted_upload_mbps: raw
                    .predicted_upload_speed
                    .ok_or(RecommendationError::MissingPrediction("predicted_upload_speed"))?,
            },
        };

        Ok(Self {
            action,
            current_position: raw.current_position,
            next_position,
            detail,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.detail.algorithm()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(action: Option<&str>) -> RawRecommendation {
        RawRecommendation {
            recommended_action: action.map(str::to_string),
            current_position: Some(Coordinate::new(1.0, 1.0)),
            next_position: Some(Coordinate::new(2.0, 1.0)),
            predicted_download_speed: Some(20.0),
            predicted_upload_speed: Some(5.0),
        }
    }

    #[test]
    fn test_parse_algorithm_names() {
        assert_eq!("q-learning".parse::<Algorithm>().unwrap(), Algorithm::QLearning);
        assert_eq!("Q".parse::<Algorithm>().unwrap(), Algorithm::QLearning);
        assert_eq!(" DQN ".parse::<Algorithm>().unwrap(), Algorithm::Dqn);
        assert!("sarsa".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(Algorithm::QLearning.endpoint_path(), Q_LEARNING_PATH);
        assert_eq!(Algorithm::Dqn.endpoint_path(), DQN_PATH);
    }

    #[test]
    fn test_selector_shared_between_clones() {
        let selector = AlgorithmSelector::new(Algorithm::QLearning);
        let reader = selector.clone();

        let previous = selector.select(Algorithm::Dqn);

        assert_eq!(previous, Algorithm::QLearning);
        assert_eq!(reader.current(), Algorithm::Dqn);
    }

    #[test]
    fn test_q_learning_validation() {
        let rec = Recommendation::from_raw(raw(Some("right")), Algorithm::QLearning).unwrap();
        assert_eq!(rec.action, "right");
        assert_eq!(rec.next_position, Coordinate::new(2.0, 1.0));
        assert_eq!(rec.detail, RecommendationDetail::QLearning);
    }

    #[test]
    fn test_dqn_validation_keeps_predictions() {
        let rec = Recommendation::from_raw(raw(Some("right")), Algorithm::Dqn).unwrap();
        assert_eq!(
            rec.detail,
            RecommendationDetail::Dqn {
                predicted_download_mbps: 20.0,
                predicted_upload_mbps: 5.0
            }
        );
        assert_eq!(rec.algorithm(), Algorithm::Dqn);
    }

    #[test]
    fn test_missing_or_blank_action_rejected() {
        assert_eq!(
            Recommendation::from_raw(raw(None), Algorithm::QLearning),
            Err(RecommendationError::MissingAction)
        );
        assert_eq!(
            Recommendation::from_raw(raw(Some("  ")), Algorithm::QLearning),
            Err(RecommendationError::MissingAction)
        );
    }

    #[test]
    fn test_missing_next_position_rejected() {
        let mut r = raw(Some("up"));
        r.next_position = None;
        assert_eq!(
            Recommendation::from_raw(r, Algorithm::QLearning),
            Err(RecommendationError::MissingNextPosition)
        );
    }

    #[test]
    fn test_dqn_requires_predictions() {
        let mut r = raw(Some("up"));
        r.predicted_upload_speed = None;
        assert_eq!(
            Recommendation::from_raw(r.clone(), Algorithm::Dqn),
            Err(RecommendationError::MissingPrediction("predicted_upload_speed"))
        );
        // Q-learning ignores the prediction fields entirely.
        assert!(Recommendation::from_raw(r, Algorithm::QLearning).is_ok());
    }
}
