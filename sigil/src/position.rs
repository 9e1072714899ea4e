//! Device position sources.
//!
//! A [`PositionSource`] makes one asynchronous attempt per call. The agent
//! keeps the last known fix in a [`SharedPosition`]; a failed attempt leaves
//! the previous value in place and is only logged.
//!
//! Sources:
//! - [`FixedPositionSource`] - a configured coordinate
//! - [`GeoIpPositionSource`] - IP geolocation over HTTP (headless hosts)
//! - [`UnavailablePositionSource`] - no location capability on this host

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::coord::Coordinate;
use crate::transport::{AsyncHttpClient, BoxFuture, TransportError};

/// Errors from a single position attempt.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PositionError {
    /// No location capability is configured.
    #[error("Position source unavailable")]
    Unsupported,

    /// The lookup service refused or could not locate this device.
    #[error("Position unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Produces a best-effort coordinate, once per request.
pub trait PositionSource: Send + Sync {
    fn get_position(&self) -> BoxFuture<'_, Result<Coordinate, PositionError>>;
}

/// Last known device position.
///
/// Starts at (0, 0) and is never empty. Cloning shares the same cell.
#[derive(Debug, Clone)]
pub struct SharedPosition {
    tx: Arc<watch::Sender<Coordinate>>,
}

impl Default for SharedPosition {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedPosition {
    pub fn new() -> Self {
        Self::with_initial(Coordinate::ORIGIN)
    }

    pub fn with_initial(initial: Coordinate) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> Coordinate {
        *self.tx.borrow()
    }

    pub fn set(&self, position: Coordinate) {
        self.tx.send_replace(position);
    }

    /// Subscribe to position changes.
    pub fn subscribe(&self) -> watch::Receiver<Coordinate> {
        self.tx.subscribe()
    }
}

/// Make one attempt with `source` and store the result.
///
/// Returns `true` if the shared position was updated.
pub async fn refresh_position(source: &dyn PositionSource, shared: &SharedPosition) -> bool {
    match source.get_position().await {
        Ok(position) => {
            debug!(lat = position.latitude, lon = position.longitude, "Position fix obtained");
            shared.set(position);
            true
        }
        Err(e) => {
            warn!(error = %e, retained = %shared.get(), "Failed to get position");
            false
        }
    }
}

/// Always reports the configured coordinate.
#[derive(Debug, Clone, Copy)]
pub struct FixedPositionSource {
    position: Coordinate,
}

impl FixedPositionSource {
    pub fn new(position: Coordinate) -> Self {
        Self { position }
    }
}

impl PositionSource for FixedPositionSource {
    fn get_position(&self) -> BoxFuture<'_, Result<Coordinate, PositionError>> {
        let position = self.position;
        Box::pin(async move { Ok(position) })
    }
}

/// Host without any location capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailablePositionSource;

impl PositionSource for UnavailablePositionSource {
    fn get_position(&self) -> BoxFuture<'_, Result<Coordinate, PositionError>> {
        Box::pin(async { Err(PositionError::Unsupported) })
    }
}

/// Geolocation lookup response. Accepts both `lat`/`lon` and
/// `latitude`/`longitude` spellings.
#[derive(Debug, Deserialize)]
struct GeoIpResponse {
    #[serde(alias = "lat")]
    latitude: Option<f64>,
    #[serde(alias = "lon")]
    longitude: Option<f64>,
    #[serde(default)]
    message: Option<String>,
}

/// Looks up the host's approximate position from its public IP address.
pub struct GeoIpPositionSource {
    http: Arc<dyn AsyncHttpClient>,
    url: String,
}

impl GeoIpPositionSource {
    pub fn new(http: Arc<dyn AsyncHttpClient>, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

impl PositionSource for GeoIpPositionSource {
    fn get_position(&self) -> BoxFuture<'_, Result<Coordinate, PositionError>> {
        Box::pin(async move {
            let body = self.http.get(&self.url).await?;
            let response: GeoIpResponse = serde_json::from_slice(&body)
                .map_err(|e| PositionError::Unavailable(format!("invalid response: {}", e)))?;

            match (response.latitude, response.longitude) {
                (Some(lat), Some(lon)) => Ok(Coordinate::new(lat, lon)),
                _ => Err(PositionError::Unavailable(
                    response
                        .message
                        .unwrap_or_else(|| "response has no coordinates".to_string()),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::MockHttpClient;
    use serde_json::json;

    #[tokio::test]
    async fn test_fixed_source_updates_shared_position() {
        let shared = SharedPosition::new();
        let source = FixedPositionSource::new(Coordinate::new(48.1, 11.6));

        assert!(refresh_position(&source, &shared).await);
        assert_eq!(shared.get(), Coordinate::new(48.1, 11.6));
    }

    #[tokio::test]
    async fn test_failure_retains_previous_position() {
        let shared = SharedPosition::with_initial(Coordinate::new(1.0, 2.0));

        assert!(!refresh_position(&UnavailablePositionSource, &shared).await);
        assert_eq!(shared.get(), Coordinate::new(1.0, 2.0));
    }

    #[tokio::test]
    async fn test_shared_position_defaults_to_origin() {
        assert_eq!(SharedPosition::default().get(), Coordinate::ORIGIN);
    }

    #[tokio::test]
    async fn test_geoip_short_field_names() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_json("/json", json!({ "status": "success", "lat": 52.52, "lon": 13.40 }));
        let source = GeoIpPositionSource::new(mock, "http://geo/json");

        assert_eq!(
            source.get_position().await.unwrap(),
            Coordinate::new(52.52, 13.40)
        );
    }

    #[tokio::test]
    async fn test_geoip_long_field_names() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_json("/json", json!({ "latitude": -33.9, "longitude": 151.2 }));
        let source = GeoIpPositionSource::new(mock, "http://geo/json");

        assert_eq!(
            source.get_position().await.unwrap(),
            Coordinate::new(-33.9, 151.2)
        );
    }

    #[tokio::test]
    async fn test_geoip_failure_message_surfaces() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_json("/json", json!({ "status": "fail", "message": "private range" }));
        let source = GeoIpPositionSource::new(mock, "http://geo/json");

        assert_eq!(
            source.get_position().await.unwrap_err(),
            PositionError::Unavailable("private range".to_string())
        );
    }

    #[tokio::test]
    async fn test_geoip_transport_error() {
        let mock = Arc::new(MockHttpClient::new());
        let source = GeoIpPositionSource::new(mock, "http://geo/json");

        assert!(matches!(
            source.get_position().await,
            Err(PositionError::Transport(_))
        ));
    }
}
