//! HTTP transport abstraction for testability.
//!
//! Every network call the agent makes (backend requests, probe transfers,
//! IP geolocation) goes through [`AsyncHttpClient`], so the periodic tasks can
//! be driven against a scripted client in tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Boxed future returned by [`AsyncHttpClient`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback invoked with the cumulative number of bytes sent so far.
pub type UploadProgress = Arc<dyn Fn(u64) + Send + Sync>;

/// Errors raised by the transport layer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The HTTP client could not be constructed.
    #[error("Failed to create HTTP client: {0}")]
    Client(String),

    /// The request could not be sent or timed out.
    #[error("Request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// The response body could not be read.
    #[error("Failed to read response from {url}: {reason}")]
    Body { url: String, reason: String },
}

/// Asynchronous HTTP operations used by the agent.
pub trait AsyncHttpClient: Send + Sync {
    /// Performs a GET request and returns the response body.
    fn get(&self, url: &str) -> BoxFuture<'_, Result<Vec<u8>, TransportError>>;

    /// POSTs a JSON body. Only the status is checked; the response body is ignored.
    fn post_json(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> BoxFuture<'_, Result<(), TransportError>>;

    /// POSTs a binary payload in `chunk_size` pieces, reporting cumulative
    /// progress as each piece is handed to the connection.
    fn upload(
        &self,
        url: &str,
        payload: Bytes,
        chunk_size: usize,
        progress: UploadProgress,
    ) -> BoxFuture<'_, Result<(), TransportError>>;
}

/// Real HTTP client implementation using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Creates a new ReqwestClient with the default timeout.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a new ReqwestClient with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    fn check_status(url: &str, response: &reqwest::Response) -> Result<(), TransportError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            })
        }
    }
}

fn request_error(url: &str, e: reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

/// Splits `payload` into cheap reference-counted slices of at most `chunk_size` bytes.
pub(crate) fn split_payload(payload: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let chunk_size = chunk_size.max(1);
    (0..payload.len())
        .step_by(chunk_size)
        .map(|start| payload.slice(start..(start + chunk_size).min(payload.len())))
        .collect()
}

impl AsyncHttpClient for ReqwestClient {
    fn get(&self, url: &str) -> BoxFuture<'_, Result<Vec<u8>, TransportError>> {
        let url = url.to_string();
        Box::pin(async move {
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| request_error(&url, e))?;

            Self::check_status(&url, &response)?;

            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| TransportError::Body {
                    url: url.clone(),
                    reason: e.to_string(),
                })
        })
    }

    fn post_json(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        let url = url.to_string();
        Box::pin(async move {
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| request_error(&url, e))?;

            Self::check_status(&url, &response)
        })
    }

    fn upload(
        &self,
        url: &str,
        payload: Bytes,
        chunk_size: usize,
        progress: UploadProgress,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        let url = url.to_string();
        Box::pin(async move {
            let total = payload.len();
            let mut sent: u64 = 0;
            let stream = futures::stream::iter(split_payload(&payload, chunk_size)).map(
                move |chunk| {
                    sent += chunk.len() as u64;
                    progress(sent);
                    Ok::<Bytes, std::io::Error>(chunk)
                },
            );

            let response = self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_LENGTH, total)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(reqwest::Body::wrap_stream(stream))
                .send()
                .await
                .map_err(|e| request_error(&url, e))?;

            Self::check_status(&url, &response)
        })
    }
}
