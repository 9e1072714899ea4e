//! Recommendation polling and the tracked-position feedback loop.
//!
//! Each tick:
//!
//! ```text
//! AlgorithmSelector ──► GET recommendation ──► validate
//!                                                │
//!              TrackedPosition ──► advise(current, next) ──► Notifier
//!                     ▲                                         │
//!                     └────────── next_position ◄───────────────┘
//! ```
//!
//! The poller owns the only [`watch::Sender`] for the tracked position, so it
//! is structurally the single writer. Everything else holds a read-only
//! [`TrackedPosition`]. Ticks run one after another inside the poller's task;
//! a failed or malformed tick leaves the tracked position unchanged and the
//! next tick retries from the same position.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::advisor::advise;
use crate::backend::{BackendClient, BackendError};
use crate::coord::Coordinate;
use crate::notify::{Notification, Notifier};
use crate::recommendation::{AlgorithmSelector, Recommendation};
use crate::schedule::{ticker, FirstTick};

/// Default recommendation polling period.
pub const DEFAULT_RECOMMENDATION_PERIOD: Duration = Duration::from_secs(10);

/// Read-only view of the tracked position.
#[derive(Debug, Clone)]
pub struct TrackedPosition {
    rx: watch::Receiver<Coordinate>,
}

impl TrackedPosition {
    pub fn get(&self) -> Coordinate {
        *self.rx.borrow()
    }

    /// Wait for the next accepted recommendation.
    ///
    /// Returns `None` once the poller has been dropped.
    pub async fn changed(&mut self) -> Option<Coordinate> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// Result of one poller tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A recommendation was accepted and the tracked position advanced.
    Advised {
        recommendation: Recommendation,
        instructions: String,
    },
    /// The response was missing required fields; nothing changed.
    Malformed { reason: String },
    /// The request failed; an error notification was emitted.
    Failed(BackendError),
}

/// Periodic recommendation poller.
pub struct RecommendationPoller {
    backend: BackendClient,
    selector: AlgorithmSelector,
    notifier: Arc<dyn Notifier>,
    tracked: watch::Sender<Coordinate>,
    period: Duration,
}

impl RecommendationPoller {
    /// Create a poller with the tracked position seeded at (0, 0).
    pub fn new(
        backend: BackendClient,
        selector: AlgorithmSelector,
        notifier: Arc<dyn Notifier>,
        period: Duration,
    ) -> (Self, TrackedPosition) {
        let (tracked, rx) = watch::channel(Coordinate::ORIGIN);
        let poller = Self {
            backend,
            selector,
            notifier,
            tracked,
            period,
        };
        (poller, TrackedPosition { rx })
    }

    /// Another read-only handle on the tracked position.
    pub fn tracked_position(&self) -> TrackedPosition {
        TrackedPosition {
            rx: self.tracked.subscribe(),
        }
    }

    /// Run one recommendation cycle.
    pub async fn tick(&mut self) -> TickOutcome {
        // Read once: a selection change during the request applies next tick.
        let algorithm = self.selector.current();

        let raw = match self.backend.fetch_recommendation(algorithm).await {
            Ok(raw) => raw,
            Err(e @ BackendError::Decode { .. }) => {
                warn!(algorithm = %algorithm, error = %e, "Unexpected recommendation response");
                return TickOutcome::Malformed {
                    reason: e.to_string(),
                };
            }
            Err(e) => {
                error!(algorithm = %algorithm, error = %e, "Error fetching recommendation");
                self.notifier.notify(Notification::recommendation_error());
                return TickOutcome::Failed(e);
            }
        };

        let recommendation = match Recommendation::from_raw(raw, algorithm) {
            Ok(recommendation) => recommendation,
            Err(e) => {
                warn!(algorithm = %algorithm, error = %e, "Unexpected recommendation response");
                return TickOutcome::Malformed {
                    reason: e.to_string(),
                };
            }
        };

        info!(
            algorithm = %algorithm,
            action = %recommendation.action,
            next = %recommendation.next_position,
            "Recommended action"
        );

        let current = *self.tracked.borrow();
        let instructions = advise(current, recommendation.next_position);
        self.notifier
            .notify(Notification::for_recommendation(&recommendation, &instructions));

        self.tracked.send_replace(recommendation.next_position);

        TickOutcome::Advised {
            recommendation,
            instructions,
        }
    }

    /// Run the polling cycle until cancelled.
    pub async fn run(mut self, cancellation: CancellationToken) {
        info!(
            period_secs = self.period.as_secs_f64(),
            algorithm = %self.selector.current(),
            "Recommendation poller started"
        );
        let mut interval = ticker(self.period, FirstTick::AfterPeriod);

        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Recommendation poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DQN_PATH, Q_LEARNING_PATH};
    use crate::notify::tests::RecordingNotifier;
    use crate::notify::{Placement, Severity};
    use crate::recommendation::{Algorithm, RecommendationDetail};
    use crate::transport::tests::MockHttpClient;
    use crate::transport::TransportError;
    use serde_json::json;

    struct Fixture {
        mock: Arc<MockHttpClient>,
        notifier: Arc<RecordingNotifier>,
        selector: AlgorithmSelector,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                mock: Arc::new(MockHttpClient::new()),
                notifier: Arc::new(RecordingNotifier::default()),
                selector: AlgorithmSelector::new(Algorithm::QLearning),
            }
        }

        fn poller(&self) -> (RecommendationPoller, TrackedPosition) {
            RecommendationPoller::new(
                BackendClient::new("http://backend", self.mock.clone()),
                self.selector.clone(),
                self.notifier.clone(),
                DEFAULT_RECOMMENDATION_PERIOD,
            )
        }
    }

    fn q_response(action: &str, next: [f64; 2]) -> serde_json::Value {
        json!({
            "recommended_action": action,
            "current_position": [0, 0],
            "next_position": next
        })
    }

    #[tokio::test]
    async fn test_accepted_recommendation_advances_tracked_position() {
        let fx = Fixture::new();
        fx.mock.respond_json(Q_LEARNING_PATH, q_response("right", [5.0, 0.0]));
        let (mut poller, tracked) = fx.poller();

        let outcome = poller.tick().await;

        match outcome {
            TickOutcome::Advised { instructions, .. } => {
                assert_eq!(instructions, "Move right 5 meters")
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(tracked.get(), Coordinate::new(5.0, 0.0));

        let received = fx.notifier.received();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].severity, Severity::Info);
        assert_eq!(received[0].placement, Placement::BottomLeft);
    }

    #[tokio::test]
    async fn test_instructions_are_relative_to_tracked_position() {
        let fx = Fixture::new();
        fx.mock.respond_json(Q_LEARNING_PATH, q_response("right", [1.0, 0.0]));
        fx.mock.respond_json(Q_LEARNING_PATH, q_response("up", [1.0, 1.0]));
        fx.mock.respond_json(Q_LEARNING_PATH, q_response("left", [0.0, 1.0]));
        let (mut poller, tracked) = fx.poller();

        let mut instructions = Vec::new();
        for _ in 0..3 {
            if let TickOutcome::Advised { instructions: i, .. } = poller.tick().await {
                instructions.push(i);
            }
        }

        assert_eq!(
            instructions,
            vec![
                "Move right 1 meters",
                "Move forward 1 meters",
                "Move left 1 meters"
            ]
        );
        assert_eq!(tracked.get(), Coordinate::new(0.0, 1.0));
    }

    #[tokio::test]
    async fn test_missing_action_skips_tick() {
        let fx = Fixture::new();
        fx.mock.respond_json(
            Q_LEARNING_PATH,
            json!({ "current_position": [0, 0], "next_position": [3, 3] }),
        );
        let (mut poller, tracked) = fx.poller();

        let outcome = poller.tick().await;

        assert!(matches!(outcome, TickOutcome::Malformed { .. }));
        assert_eq!(tracked.get(), Coordinate::ORIGIN);
        assert!(fx.notifier.received().is_empty());
    }

    #[tokio::test]
    async fn test_request_failure_notifies_and_keeps_position() {
        let fx = Fixture::new();
        fx.mock.respond_json(Q_LEARNING_PATH, q_response("right", [2.0, 0.0]));
        fx.mock.respond(
            Q_LEARNING_PATH,
            Err(TransportError::Status {
                url: "http://backend/get_q_learning_recommendation".to_string(),
                status: 500,
            }),
        );
        let (mut poller, tracked) = fx.poller();

        poller.tick().await;
        let outcome = poller.tick().await;

        assert!(matches!(outcome, TickOutcome::Failed(_)));
        assert_eq!(tracked.get(), Coordinate::new(2.0, 0.0));
        let received = fx.notifier.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1], Notification::recommendation_error());
    }

    #[tokio::test]
    async fn test_dqn_selection_uses_dqn_endpoint_and_styling() {
        let fx = Fixture::new();
        fx.selector.select(Algorithm::Dqn);
        fx.mock.respond_json(
            DQN_PATH,
            json!({
                "recommended_action": "down",
                "current_position": [0, 0],
                "next_position": [0, -1],
                "predicted_download_speed": 31.456,
                "predicted_upload_speed": 12.0
            }),
        );
        let (mut poller, _tracked) = fx.poller();

        let outcome = poller.tick().await;

        let TickOutcome::Advised { recommendation, .. } = outcome else {
            panic!("expected advised outcome");
        };
        assert!(matches!(recommendation.detail, RecommendationDetail::Dqn { .. }));
        let received = fx.notifier.received();
        assert_eq!(received[0].severity, Severity::Success);
        assert_eq!(received[0].placement, Placement::BottomRight);
        assert!(received[0]
            .lines
            .contains(&"Predicted Download Speed: 31.46 Mbps".to_string()));
        assert_eq!(fx.mock.calls_to(Q_LEARNING_PATH), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_change_mid_flight_applies_next_tick() {
        let fx = Fixture::new();
        fx.mock.respond_json(Q_LEARNING_PATH, q_response("right", [1.0, 0.0]));
        fx.mock.respond_json(
            DQN_PATH,
            json!({
                "recommended_action": "up",
                "next_position": [1, 1],
                "predicted_download_speed": 1.0,
                "predicted_upload_speed": 1.0
            }),
        );
        fx.mock.set_latency(Duration::from_secs(1));
        let (mut poller, _tracked) = fx.poller();
        let selector = fx.selector.clone();

        let (first, _) = tokio::join!(poller.tick(), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            selector.select(Algorithm::Dqn);
        });
        let second = poller.tick().await;

        let TickOutcome::Advised { recommendation: r1, .. } = first else {
            panic!("first tick should succeed");
        };
        let TickOutcome::Advised { recommendation: r2, .. } = second else {
            panic!("second tick should succeed");
        };
        assert_eq!(r1.algorithm(), Algorithm::QLearning);
        assert_eq!(r2.algorithm(), Algorithm::Dqn);
        assert_eq!(fx.mock.calls_to(Q_LEARNING_PATH), 1);
        assert_eq!(fx.mock.calls_to(DQN_PATH), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_every_period_until_cancelled() {
        let fx = Fixture::new();
        fx.mock.respond_json(Q_LEARNING_PATH, q_response("right", [1.0, 0.0]));
        let (poller, mut tracked) = fx.poller();
        let token = CancellationToken::new();

        let handle = tokio::spawn(poller.run(token.clone()));

        assert_eq!(tracked.changed().await, Some(Coordinate::new(1.0, 0.0)));
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(fx.mock.calls_to(Q_LEARNING_PATH), 3);

        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fx.mock.calls_to(Q_LEARNING_PATH), 3);
        assert_eq!(tracked.get(), Coordinate::new(1.0, 0.0));
    }
}
