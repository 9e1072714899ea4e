//! Network speed probing.
//!
//! [`SpeedProbe::measure`] issues one download probe and one upload probe and
//! returns immediately. Each probe writes its result into a [`SpeedCell`]
//! when it completes; readers always see the last completed value.
//!
//! # Derivation
//!
//! ```text
//! download:  Mbps = body_bytes * 8 / (elapsed_s * 1e6)          (once, on completion)
//! upload:    Mbps = bytes_sent_so_far * 8 / (elapsed_s * 1e6)   (on every progress event)
//! ```
//!
//! Samples with a non-positive elapsed time are discarded so a division by
//! zero never reaches the observable value. Overlapping `measure()` calls are
//! allowed; the last write per direction wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::{AsyncHttpClient, UploadProgress};

/// Default fixed-size resource fetched for download timing.
pub const DEFAULT_DOWNLOAD_URL: &str = "https://httpbin.org/image/jpeg";

/// Default reachability target receiving the upload payload.
pub const DEFAULT_UPLOAD_URL: &str = "https://httpbin.org/post";

/// Default upload payload size (1 MB).
pub const DEFAULT_UPLOAD_BYTES: usize = 1_000_000;

/// Default size of each upload chunk, i.e. progress granularity (64KB).
pub const DEFAULT_UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Throughput in megabits per second, or `None` for a non-positive or
/// non-finite elapsed time.
pub fn throughput_mbps(bytes: u64, elapsed_secs: f64) -> Option<f64> {
    if !elapsed_secs.is_finite() || elapsed_secs <= 0.0 {
        return None;
    }
    Some((bytes as f64 * 8.0) / (elapsed_secs * 1e6))
}

/// Download speed for a completed fetch. Empty bodies are discarded.
pub fn download_mbps(body_bytes: u64, elapsed_secs: f64) -> Option<f64> {
    if body_bytes == 0 {
        return None;
    }
    throughput_mbps(body_bytes, elapsed_secs)
}

/// Upload speed for one progress event.
pub fn upload_sample_mbps(bytes_sent: u64, elapsed_secs: f64) -> Option<f64> {
    throughput_mbps(bytes_sent, elapsed_secs)
}

/// Atomically replaceable speed value in Mbps.
///
/// Writes are whole-value replacements, so no lock is needed.
#[derive(Debug, Default)]
pub struct SpeedCell {
    bits: AtomicU64,
}

impl SpeedCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest stored value (0.0 until the first sample lands).
    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Replace the value. Negative or non-finite samples are ignored.
    pub fn set(&self, mbps: f64) -> bool {
        if !mbps.is_finite() || mbps < 0.0 {
            return false;
        }
        self.bits.store(mbps.to_bits(), Ordering::Release);
        true
    }
}

/// Point-in-time copy of both directions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpeedSample {
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

/// Probe endpoints and payload sizing.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub download_url: String,
    pub upload_url: String,
    pub upload_bytes: usize,
    pub upload_chunk_bytes: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            upload_bytes: DEFAULT_UPLOAD_BYTES,
            upload_chunk_bytes: DEFAULT_UPLOAD_CHUNK_BYTES,
        }
    }
}

/// Download and upload speed prober.
///
/// Cheap to clone; clones share the same result cells.
#[derive(Clone)]
pub struct SpeedProbe {
    http: Arc<dyn AsyncHttpClient>,
    config: Arc<ProbeConfig>,
    download: Arc<SpeedCell>,
    upload: Arc<SpeedCell>,
    cancellation: CancellationToken,
}

impl std::fmt::Debug for SpeedProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeedProbe")
            .field("config", &self.config)
            .field("latest", &self.latest())
            .finish_non_exhaustive()
    }
}

impl SpeedProbe {
    /// Create a probe. Spawned measurements stop when `cancellation` fires.
    pub fn new(
        http: Arc<dyn AsyncHttpClient>,
        config: ProbeConfig,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            http,
            config: Arc::new(config),
            download: Arc::new(SpeedCell::new()),
            upload: Arc::new(SpeedCell::new()),
            cancellation,
        }
    }

    /// Last completed download speed.
    pub fn last_download_mbps(&self) -> f64 {
        self.download.get()
    }

    /// Last sampled upload speed.
    pub fn last_upload_mbps(&self) -> f64 {
        self.upload.get()
    }

    pub fn latest(&self) -> SpeedSample {
        SpeedSample {
            download_mbps: self.last_download_mbps(),
            upload_mbps: self.last_upload_mbps(),
        }
    }

    /// Start one download and one upload measurement and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn measure(&self) {
        let download = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = download.cancellation.cancelled() => {}
                _ = download.measure_download() => {}
            }
        });

        let upload = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = upload.cancellation.cancelled() => {}
                _ = upload.measure_upload() => {}
            }
        });
    }

    /// Time one fetch of the download resource.
    ///
    /// Returns the stored value, or `None` when the fetch failed or the
    /// sample was discarded (the previous value is kept).
    pub async fn measure_download(&self) -> Option<f64> {
        let url = &self.config.download_url;
        let start = Instant::now();

        let body = match self.http.get(url).await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Download probe failed");
                return None;
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        match download_mbps(body.len() as u64, elapsed) {
            Some(mbps) if self.download.set(mbps) => {
                debug!(
                    bytes = body.len(),
                    elapsed_secs = elapsed,
                    mbps = format!("{:.2}", mbps),
                    "Download probe completed"
                );
                Some(mbps)
            }
            _ => {
                debug!(bytes = body.len(), elapsed_secs = elapsed, "Download sample discarded");
                None
            }
        }
    }

    /// Upload the fixed payload, sampling speed on every progress event.
    ///
    /// Returns `true` when the transfer completed successfully.
    pub async fn measure_upload(&self) -> bool {
        let payload = Bytes::from(vec![0u8; self.config.upload_bytes]);
        let start = Instant::now();
        let cell = Arc::clone(&self.upload);

        let progress: UploadProgress = Arc::new(move |sent| {
            if let Some(mbps) = upload_sample_mbps(sent, start.elapsed().as_secs_f64()) {
                cell.set(mbps);
            }
        });

        match self
            .http
            .upload(
                &self.config.upload_url,
                payload,
                self.config.upload_chunk_bytes,
                progress,
            )
            .await
        {
            Ok(()) => {
                debug!(
                    mbps = format!("{:.2}", self.upload.get()),
                    "Upload probe completed"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "Upload probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::MockHttpClient;
    use crate::transport::TransportError;
    use std::time::Duration;

    fn probe(mock: &Arc<MockHttpClient>) -> SpeedProbe {
        let config = ProbeConfig {
            download_url: "http://probe/download".to_string(),
            upload_url: "http://probe/upload".to_string(),
            upload_bytes: 100_000,
            upload_chunk_bytes: 10_000,
        };
        SpeedProbe::new(mock.clone(), config, CancellationToken::new())
    }

    fn approx(a: f64, b: f64, tolerance: f64) -> bool {
        (a - b).abs() <= tolerance
    }

    #[test]
    fn test_upload_sample_one_megabit() {
        let mbps = upload_sample_mbps(125_000, 1.0).unwrap();
        assert!(approx(mbps, 1.0, 1e-12));
    }

    #[test]
    fn test_zero_elapsed_sample_discarded() {
        assert_eq!(upload_sample_mbps(125_000, 0.0), None);
        assert_eq!(upload_sample_mbps(125_000, -0.5), None);
        assert_eq!(download_mbps(1_000_000, 0.0), None);
        assert_eq!(throughput_mbps(1, f64::NAN), None);
    }

    #[test]
    fn test_empty_download_discarded() {
        assert_eq!(download_mbps(0, 1.0), None);
    }

    #[test]
    fn test_speed_cell_rejects_invalid_values() {
        let cell = SpeedCell::new();
        assert_eq!(cell.get(), 0.0);
        assert!(cell.set(3.5));
        assert!(!cell.set(f64::NAN));
        assert!(!cell.set(f64::INFINITY));
        assert!(!cell.set(-1.0));
        assert_eq!(cell.get(), 3.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_measurement_uses_elapsed_time() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond("/download", Ok(vec![0u8; 1_000_000]));
        mock.set_latency(Duration::from_secs(1));
        let probe = probe(&mock);

        let mbps = probe.measure_download().await.unwrap();

        assert!(approx(mbps, 8.0, 0.1), "got {mbps}");
        assert_eq!(probe.last_download_mbps(), mbps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_elapsed_download_keeps_previous_value() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond("/download", Ok(vec![0u8; 1_000]));
        let probe = probe(&mock);
        probe.download.set(42.0);

        // Paused clock and no latency: the fetch completes in zero time.
        assert_eq!(probe.measure_download().await, None);
        assert_eq!(probe.last_download_mbps(), 42.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_download_keeps_previous_value() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond(
            "/download",
            Err(TransportError::Request {
                url: "http://probe/download".to_string(),
                reason: "connection refused".to_string(),
            }),
        );
        let probe = probe(&mock);
        probe.download.set(9.0);

        assert_eq!(probe.measure_download().await, None);
        assert_eq!(probe.last_download_mbps(), 9.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_samples_progress() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond("/upload", Ok(Vec::new()));
        let probe = probe(&mock);

        assert!(probe.measure_upload().await);

        // 10 chunks of 10KB, one every 10ms: 100KB in 100ms = 8 Mbps.
        let mbps = probe.last_upload_mbps();
        assert!(approx(mbps, 8.0, 0.5), "got {mbps}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_measure_returns_immediately_and_updates_later() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond("/download", Ok(vec![0u8; 500_000]));
        mock.respond("/upload", Ok(Vec::new()));
        mock.set_latency(Duration::from_millis(500));
        let probe = probe(&mock);

        probe.measure();
        assert_eq!(probe.latest(), SpeedSample::default());

        tokio::time::sleep(Duration::from_secs(2)).await;

        let latest = probe.latest();
        assert!(approx(latest.download_mbps, 8.0, 0.1), "got {latest:?}");
        assert!(latest.upload_mbps > 0.0);
        assert_eq!(mock.calls_to("/download"), 1);
        assert_eq!(mock.calls_to("/upload"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_does_not_update() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond("/download", Ok(vec![0u8; 500_000]));
        mock.respond("/upload", Ok(Vec::new()));
        mock.set_latency(Duration::from_secs(1));
        let probe = probe(&mock);

        probe.measure();
        probe.cancellation.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(probe.last_download_mbps(), 0.0);
    }
}
