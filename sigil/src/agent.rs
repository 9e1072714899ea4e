//! Agent bootstrap.
//!
//! [`SigilAgent`] builds the shared pieces (HTTP client, backend client,
//! probe, displays) and spawns the four periodic tasks:
//!
//! | Task                  | First tick     | Default period |
//! |-----------------------|----------------|----------------|
//! | speed refresh         | after period   | 1 s            |
//! | heatmap viewer        | immediately    | 5 s            |
//! | recommendation poller | after period   | 10 s           |
//! | telemetry reporter    | after period   | 30 s           |
//!
//! All tasks observe one [`CancellationToken`]. [`AgentHandle::shutdown`]
//! cancels it and waits for every task to exit, after which no further
//! requests are issued and no displays are updated.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendClient, DEFAULT_BACKEND_URL};
use crate::coord::Coordinate;
use crate::heatmap::{HeatmapDisplay, HeatmapViewer, DEFAULT_HEATMAP_PERIOD};
use crate::notify::{LogNotifier, Notifier};
use crate::poller::{RecommendationPoller, TrackedPosition, DEFAULT_RECOMMENDATION_PERIOD};
use crate::position::{
    FixedPositionSource, GeoIpPositionSource, PositionSource, SharedPosition,
    UnavailablePositionSource,
};
use crate::probe::{ProbeConfig, SpeedProbe};
use crate::recommendation::{Algorithm, AlgorithmSelector};
use crate::reporter::{
    run_speed_refresh, SpeedDisplay, TelemetryReporter, DEFAULT_SPEED_REFRESH_PERIOD,
    DEFAULT_SUBMIT_PERIOD,
};
use crate::transport::{AsyncHttpClient, ReqwestClient, TransportError, DEFAULT_TIMEOUT_SECS};

/// Where the device position comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionConfig {
    /// A configured fixed coordinate.
    Fixed(Coordinate),
    /// A GeoIP JSON endpoint.
    GeoIp(String),
    /// No position capability; the last known position stays at (0, 0).
    Unavailable,
}

/// Runtime configuration for the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub backend_url: String,
    pub request_timeout: Duration,
    pub probe: ProbeConfig,
    pub position: PositionConfig,
    pub speed_refresh_period: Duration,
    pub heatmap_period: Duration,
    pub recommendation_period: Duration,
    pub submit_period: Duration,
    pub algorithm: Algorithm,
    /// When set, decoded heatmaps are also written here as PNG files.
    pub heatmap_output_dir: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            probe: ProbeConfig::default(),
            position: PositionConfig::Unavailable,
            speed_refresh_period: DEFAULT_SPEED_REFRESH_PERIOD,
            heatmap_period: DEFAULT_HEATMAP_PERIOD,
            recommendation_period: DEFAULT_RECOMMENDATION_PERIOD,
            submit_period: DEFAULT_SUBMIT_PERIOD,
            algorithm: Algorithm::default(),
            heatmap_output_dir: None,
        }
    }
}

/// Errors starting the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] TransportError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Builder for a running agent.
pub struct SigilAgent {
    config: AgentConfig,
    http: Option<Arc<dyn AsyncHttpClient>>,
    notifier: Option<Arc<dyn Notifier>>,
    position_source: Option<Arc<dyn PositionSource>>,
}

impl SigilAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            http: None,
            notifier: None,
            position_source: None,
        }
    }

    /// Use `http` instead of a reqwest client built from the config.
    pub fn with_http_client(mut self, http: Arc<dyn AsyncHttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    /// Deliver notifications to `notifier` instead of the log.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Override the position source selected by [`PositionConfig`].
    pub fn with_position_source(mut self, source: Arc<dyn PositionSource>) -> Self {
        self.position_source = Some(source);
        self
    }

    fn validate(&self) -> Result<(), AgentError> {
        let periods = [
            ("speed refresh", self.config.speed_refresh_period),
            ("heatmap", self.config.heatmap_period),
            ("recommendation", self.config.recommendation_period),
            ("submit", self.config.submit_period),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(AgentError::InvalidConfig(format!(
                    "{} period must be greater than zero",
                    name
                )));
            }
        }
        if self.config.probe.upload_chunk_bytes == 0 {
            return Err(AgentError::InvalidConfig(
                "upload chunk size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Spawn all periodic tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<AgentHandle, AgentError> {
        self.validate()?;

        let http: Arc<dyn AsyncHttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestClient::with_timeout(self.config.request_timeout)?),
        };
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let position_source = match self.position_source {
            Some(source) => source,
            None => position_source_for(&self.config.position, Arc::clone(&http)),
        };

        let config = self.config;
        let cancellation = CancellationToken::new();
        let backend = BackendClient::new(config.backend_url.clone(), Arc::clone(&http));
        let probe = SpeedProbe::new(
            Arc::clone(&http),
            config.probe.clone(),
            cancellation.child_token(),
        );
        let position = SharedPosition::new();
        let selector = AlgorithmSelector::new(config.algorithm);
        let speeds = SpeedDisplay::new();
        let heatmaps = HeatmapDisplay::new();

        info!(
            backend = %backend.base_url(),
            algorithm = %config.algorithm,
            "Starting agent"
        );

        let mut tasks = Vec::with_capacity(4);

        tasks.push((
            "speed refresh",
            tokio::spawn(run_speed_refresh(
                probe.clone(),
                speeds.clone(),
                config.speed_refresh_period,
                cancellation.clone(),
            )),
        ));

        let mut viewer = HeatmapViewer::new(backend.clone(), heatmaps.clone(), config.heatmap_period);
        if let Some(dir) = config.heatmap_output_dir.clone() {
            viewer = viewer.with_output_dir(dir);
        }
        tasks.push(("heatmap viewer", tokio::spawn(viewer.run(cancellation.clone()))));

        let (poller, tracked) = RecommendationPoller::new(
            backend.clone(),
            selector.clone(),
            notifier,
            config.recommendation_period,
        );
        tasks.push((
            "recommendation poller",
            tokio::spawn(poller.run(cancellation.clone())),
        ));

        let reporter = TelemetryReporter::new(
            backend,
            position_source,
            position.clone(),
            probe,
            config.submit_period,
        );
        tasks.push((
            "telemetry reporter",
            tokio::spawn(reporter.run(cancellation.clone())),
        ));

        Ok(AgentHandle {
            cancellation,
            tasks,
            tracked,
            position,
            speeds,
            heatmaps,
            selector,
        })
    }
}

fn position_source_for(
    config: &PositionConfig,
    http: Arc<dyn AsyncHttpClient>,
) -> Arc<dyn PositionSource> {
    match config {
        PositionConfig::Fixed(coord) => Arc::new(FixedPositionSource::new(*coord)),
        PositionConfig::GeoIp(url) => Arc::new(GeoIpPositionSource::new(http, url.clone())),
        PositionConfig::Unavailable => Arc::new(UnavailablePositionSource),
    }
}

/// Handle to a running agent.
pub struct AgentHandle {
    cancellation: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    tracked: TrackedPosition,
    position: SharedPosition,
    speeds: SpeedDisplay,
    heatmaps: HeatmapDisplay,
    selector: AlgorithmSelector,
}

impl AgentHandle {
    /// Position the poller currently believes the device is at.
    pub fn tracked_position(&self) -> TrackedPosition {
        self.tracked.clone()
    }

    /// Last known device position as reported to the backend.
    pub fn position(&self) -> Coordinate {
        self.position.get()
    }

    pub fn speeds(&self) -> SpeedDisplay {
        self.speeds.clone()
    }

    pub fn heatmaps(&self) -> HeatmapDisplay {
        self.heatmaps.clone()
    }

    /// Selector for the recommendation algorithm; changes apply on the next tick.
    pub fn selector(&self) -> AlgorithmSelector {
        self.selector.clone()
    }

    /// Token observed by every task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Signal all tasks to stop without waiting.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel all tasks and wait for them to exit.
    pub async fn shutdown(self) {
        info!("Shutting down agent");
        self.cancellation.cancel();

        for (name, task) in self.tasks {
            match task.await {
                Ok(()) => debug!(task = name, "Task stopped"),
                Err(e) => warn!(task = name, error = %e, "Task ended abnormally"),
            }
        }

        info!("Agent stopped");
    }
}
