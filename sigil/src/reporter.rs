//! Telemetry submission and speed display refresh.
//!
//! Two independent cycles live here:
//!
//! - [`TelemetryReporter::run`] - every submission period, snapshot the last
//!   known position and speeds, stamp the time, and POST the record. A failed
//!   submission is logged and dropped. Submissions run in their own tasks, so
//!   a slow backend never delays the next tick. Each tick also starts a fresh
//!   position fix and speed measurement in the background so the next record
//!   carries new values.
//! - [`run_speed_refresh`] - every second, copy the probe's latest values into
//!   the [`SpeedDisplay`]. No I/O.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::coord::Coordinate;
use crate::position::{refresh_position, PositionSource, SharedPosition};
use crate::probe::{SpeedProbe, SpeedSample};
use crate::schedule::{ticker, FirstTick};

/// Default submission period.
pub const DEFAULT_SUBMIT_PERIOD: Duration = Duration::from_secs(30);

/// Default speed display refresh period.
pub const DEFAULT_SPEED_REFRESH_PERIOD: Duration = Duration::from_secs(1);

/// One telemetry submission, as sent to `/submit_data`.
///
/// Built fresh every tick and consumed by the submission call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub position: Coordinate,
    pub upload_speed: f64,
    pub download_speed: f64,
    /// ISO-8601 UTC timestamp with millisecond precision.
    pub timestamp: String,
}

impl TelemetryRecord {
    /// Capture a record from the given snapshot.
    pub fn capture(position: Coordinate, speeds: SpeedSample, at: DateTime<Utc>) -> Self {
        Self {
            position,
            upload_speed: speeds.upload_mbps,
            download_speed: speeds.download_mbps,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Periodic telemetry submitter.
pub struct TelemetryReporter {
    backend: BackendClient,
    position_source: Arc<dyn PositionSource>,
    position: SharedPosition,
    probe: SpeedProbe,
    period: Duration,
}

impl TelemetryReporter {
    pub fn new(
        backend: BackendClient,
        position_source: Arc<dyn PositionSource>,
        position: SharedPosition,
        probe: SpeedProbe,
        period: Duration,
    ) -> Self {
        Self {
            backend,
            position_source,
            position,
            probe,
            period,
        }
    }

    /// Build a record from the current last-known values.
    pub fn snapshot(&self) -> TelemetryRecord {
        TelemetryRecord::capture(self.position.get(), self.probe.latest(), Utc::now())
    }

    /// Submit one record. Returns `true` on success.
    pub async fn submit_once(&self) -> bool {
        submit_record(&self.backend, self.snapshot()).await
    }

    /// Hand the current record to the transport without waiting for it.
    ///
    /// The submission is abandoned if `cancellation` fires first.
    pub fn spawn_submission(&self, cancellation: &CancellationToken) {
        let backend = self.backend.clone();
        let record = self.snapshot();
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {}
                _ = submit_record(&backend, record) => {}
            }
        });
    }

    /// Start a position fix and a speed measurement without waiting for either.
    pub fn refresh_measurements(&self, cancellation: &CancellationToken) {
        let source = Arc::clone(&self.position_source);
        let position = self.position.clone();
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancellation.cancelled() => {}
                _ = refresh_position(source.as_ref(), &position) => {}
            }
        });

        self.probe.measure();
    }

    /// Run the submission cycle until cancelled.
    pub async fn run(self, cancellation: CancellationToken) {
        info!(period_secs = self.period.as_secs_f64(), "Telemetry reporter started");

        self.refresh_measurements(&cancellation);
        let mut interval = ticker(self.period, FirstTick::AfterPeriod);

        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                _ = interval.tick() => {
                    self.spawn_submission(&cancellation);
                    self.refresh_measurements(&cancellation);
                }
            }
        }

        info!("Telemetry reporter stopped");
    }
}

async fn submit_record(backend: &BackendClient, record: TelemetryRecord) -> bool {
    debug!(
        position = %record.position,
        upload_mbps = record.upload_speed,
        download_mbps = record.download_speed,
        "Submitting telemetry"
    );

    match backend.submit(record).await {
        Ok(()) => {
            debug!("Telemetry submitted");
            true
        }
        Err(e) => {
            warn!(error = %e, "Telemetry submission failed");
            false
        }
    }
}

/// Speed values as shown to a presentation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedReading {
    pub sample: SpeedSample,
    /// Number of refresh ticks so far.
    pub refreshes: u64,
}

impl SpeedReading {
    pub fn download_text(&self) -> String {
        format!("{:.2} Mbps", self.sample.download_mbps)
    }

    pub fn upload_text(&self) -> String {
        format!("{:.2} Mbps", self.sample.upload_mbps)
    }
}

/// UI-observable speed state, refreshed from the probe once per second.
#[derive(Debug, Clone)]
pub struct SpeedDisplay {
    tx: Arc<watch::Sender<SpeedReading>>,
}

impl Default for SpeedDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeedDisplay {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SpeedReading::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SpeedReading {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SpeedReading> {
        self.tx.subscribe()
    }

    fn refresh(&self, sample: SpeedSample) {
        self.tx.send_modify(|reading| {
            reading.sample = sample;
            reading.refreshes += 1;
        });
    }
}

/// Copy the probe's latest values into `display` every `period` until cancelled.
pub async fn run_speed_refresh(
    probe: SpeedProbe,
    display: SpeedDisplay,
    period: Duration,
    cancellation: CancellationToken,
) {
    let mut interval = ticker(period, FirstTick::AfterPeriod);

    loop {
        tokio::select! {
            biased;

            _ = cancellation.cancelled() => break,

            _ = interval.tick() => display.refresh(probe.latest()),
        }
    }

    debug!("Speed refresh stopped");
}
