//! User-facing notifications.
//!
//! Notification content and styling are chosen by dispatching on the
//! recommendation's algorithm tag: Q-learning advisories are informational
//! and sit bottom-left, DQN advisories are marked as successes and sit
//! bottom-right, so the two modes stay distinguishable when used in turn.

use std::fmt;
use std::time::Duration;

use crate::coord::Coordinate;
use crate::recommendation::{Recommendation, RecommendationDetail};

/// How long a notification stays visible.
pub const AUTO_CLOSE: Duration = Duration::from_secs(5);

/// Message shown when a recommendation request fails.
pub const RECOMMENDATION_ERROR_MESSAGE: &str =
    "Error fetching recommendation. Please try again later.";

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Error,
}

/// Screen placement hint for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    BottomLeft,
    BottomRight,
}

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub severity: Severity,
    pub placement: Placement,
    pub title: String,
    pub lines: Vec<String>,
    pub auto_close: Duration,
}

impl Notification {
    /// Build the advisory for a validated recommendation.
    pub fn for_recommendation(recommendation: &Recommendation, instructions: &str) -> Self {
        let next = next_position_line(recommendation.next_position);
        match recommendation.detail {
            RecommendationDetail::QLearning => Self {
                severity: Severity::Info,
                placement: Placement::BottomLeft,
                title: recommendation.algorithm().to_string(),
                lines: vec![instructions.to_string(), next],
                auto_close: AUTO_CLOSE,
            },
            RecommendationDetail::Dqn {
                predicted_download_mbps,
                predicted_upload_mbps,
            } => Self {
                severity: Severity::Success,
                placement: Placement::BottomRight,
                title: recommendation.algorithm().to_string(),
                lines: vec![
                    instructions.to_string(),
                    next,
                    format!(
                        "Predicted Download Speed: {:.2} Mbps",
                        predicted_download_mbps
                    ),
                    format!("Predicted Upload Speed: {:.2} Mbps", predicted_upload_mbps),
                ],
                auto_close: AUTO_CLOSE,
            },
        }
    }

    /// Build the notification shown when a recommendation request fails.
    pub fn recommendation_error() -> Self {
        Self {
            severity: Severity::Error,
            placement: Placement::BottomRight,
            title: "Error".to_string(),
            lines: vec![RECOMMENDATION_ERROR_MESSAGE.to_string()],
            auto_close: AUTO_CLOSE,
        }
    }
}

fn next_position_line(next: Coordinate) -> String {
    format!("Next Position: {}", next)
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.lines.join(" | "))
    }
}

/// Destination for user-facing notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Error => tracing::error!(placement = ?notification.placement, "{}", notification),
            Severity::Info | Severity::Success => {
                tracing::info!(placement = ?notification.placement, "{}", notification)
            }
        }
    }
}
