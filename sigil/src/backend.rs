//! Typed client for the mesh backend.
//!
//! The backend stores telemetry submissions and computes recommendations and
//! heatmaps. Only the request/response contracts below are relied upon:
//!
//! | Endpoint | Method | Body |
//! |----------|--------|------|
//! | `/submit_data` | POST | [`TelemetryRecord`] |
//! | `/get_q_learning_recommendation` | GET | [`RawRecommendation`] |
//! | `/get_dqn_recommendation` | GET | [`RawRecommendation`] with predicted speeds |
//! | `/get_heatmap` | GET | [`HeatmapResponse`] |

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;

use crate::coord::Coordinate;
use crate::recommendation::Algorithm;
use crate::reporter::TelemetryRecord;
use crate::transport::{AsyncHttpClient, TransportError};

/// Default backend base URL.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:5000";

pub const SUBMIT_PATH: &str = "/submit_data";
pub const Q_LEARNING_PATH: &str = "/get_q_learning_recommendation";
pub const DQN_PATH: &str = "/get_dqn_recommendation";
pub const HEATMAP_PATH: &str = "/get_heatmap";

/// Errors talking to the backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// Network failure or non-success status.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The response body did not have the expected shape.
    #[error("Malformed response from {path}: {reason}")]
    Decode { path: &'static str, reason: String },

    /// The record could not be encoded.
    #[error("Failed to encode request body: {0}")]
    Encode(String),
}

/// Recommendation body as sent by the backend, before validation.
///
/// Every field is optional here; [`crate::recommendation::Recommendation::from_raw`]
/// decides what is required for the active algorithm.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawRecommendation {
    pub recommended_action: Option<String>,
    pub current_position: Option<Coordinate>,
    pub next_position: Option<Coordinate>,
    pub predicted_download_speed: Option<f64>,
    pub predicted_upload_speed: Option<f64>,
}

/// Heatmap body: two base64-encoded PNG images, either of which may be absent.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HeatmapResponse {
    pub upload_heatmap_image: Option<String>,
    pub download_heatmap_image: Option<String>,
}

/// Client for the backend endpoints.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    http: Arc<dyn AsyncHttpClient>,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    /// Create a client for the backend at `base_url`.
    pub fn new(base_url: impl Into<String>, http: Arc<dyn AsyncHttpClient>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, http }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an endpoint path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Submit one telemetry record. The record is consumed.
    pub async fn submit(&self, record: TelemetryRecord) -> Result<(), BackendError> {
        let body =
            serde_json::to_value(&record).map_err(|e| BackendError::Encode(e.to_string()))?;
        self.http.post_json(&self.url(SUBMIT_PATH), body).await?;
        Ok(())
    }

    /// Request a recommendation from the given algorithm's endpoint.
    pub async fn fetch_recommendation(
        &self,
        algorithm: Algorithm,
    ) -> Result<RawRecommendation, BackendError> {
        self.get_json(algorithm.endpoint_path()).await
    }

    /// Fetch the current heatmap images.
    pub async fn fetch_heatmap(&self) -> Result<HeatmapResponse, BackendError> {
        self.get_json(HEATMAP_PATH).await
    }

    async fn get_json<T>(&self, path: &'static str) -> Result<T, BackendError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let body = self.http.get(&self.url(path)).await?;
        serde_json::from_slice(&body).map_err(|e| BackendError::Decode {
            path,
            reason: e.to_string(),
        })
    }
}
