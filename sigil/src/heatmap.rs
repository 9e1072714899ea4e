//! Heatmap polling.
//!
//! The backend renders upload and download speed heatmaps as base64 PNGs.
//! [`HeatmapViewer`] fetches both on a fixed period and publishes them on a
//! [`HeatmapDisplay`]. A panel only changes when its field is present in the
//! response; until the first image arrives it stays [`HeatmapPanel::Loading`].
//! When an output directory is configured, each new image is also written
//! there as a PNG file.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::schedule::{ticker, FirstTick};

/// Default heatmap polling period.
pub const DEFAULT_HEATMAP_PERIOD: Duration = Duration::from_secs(5);

pub const UPLOAD_HEATMAP_FILE: &str = "upload_heatmap.png";
pub const DOWNLOAD_HEATMAP_FILE: &str = "download_heatmap.png";

/// Errors handling one heatmap image.
#[derive(Debug, Error)]
pub enum HeatmapError {
    #[error("Invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to write {}: {source}", .path.display())]
    Export {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Which of the two heatmaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeatmapKind {
    Upload,
    Download,
}

impl HeatmapKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            HeatmapKind::Upload => UPLOAD_HEATMAP_FILE,
            HeatmapKind::Download => DOWNLOAD_HEATMAP_FILE,
        }
    }
}

/// A decoded heatmap image.
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapImage {
    /// Encoded image bytes (PNG as served by the backend).
    pub data: Bytes,
    /// Pixel dimensions, when the header could be read.
    pub dimensions: Option<(u32, u32)>,
}

impl HeatmapImage {
    /// Decode a base64 image field.
    pub fn from_base64(encoded: &str) -> Result<Self, HeatmapError> {
        let data = Bytes::from(BASE64_STANDARD.decode(encoded.trim())?);
        let dimensions = image::ImageReader::new(Cursor::new(&data[..]))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok());
        Ok(Self { data, dimensions })
    }
}

/// State of one heatmap panel.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum HeatmapPanel {
    /// No image has arrived yet.
    #[default]
    Loading,
    Ready(Arc<HeatmapImage>),
}

impl HeatmapPanel {
    pub fn is_loading(&self) -> bool {
        matches!(self, HeatmapPanel::Loading)
    }

    pub fn image(&self) -> Option<&HeatmapImage> {
        match self {
            HeatmapPanel::Loading => None,
            HeatmapPanel::Ready(image) => Some(image),
        }
    }
}

/// Both heatmap panels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeatmapBoard {
    pub upload: HeatmapPanel,
    pub download: HeatmapPanel,
    /// Number of successful fetches so far.
    pub fetches: u64,
}

impl HeatmapBoard {
    fn panel_mut(&mut self, kind: HeatmapKind) -> &mut HeatmapPanel {
        match kind {
            HeatmapKind::Upload => &mut self.upload,
            HeatmapKind::Download => &mut self.download,
        }
    }
}

/// Observable heatmap state.
#[derive(Debug, Clone)]
pub struct HeatmapDisplay {
    tx: Arc<watch::Sender<HeatmapBoard>>,
}

impl Default for HeatmapDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl HeatmapDisplay {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(HeatmapBoard::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> HeatmapBoard {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HeatmapBoard> {
        self.tx.subscribe()
    }
}

/// Periodic heatmap fetcher.
pub struct HeatmapViewer {
    backend: BackendClient,
    display: HeatmapDisplay,
    output_dir: Option<PathBuf>,
    period: Duration,
}

impl HeatmapViewer {
    pub fn new(backend: BackendClient, display: HeatmapDisplay, period: Duration) -> Self {
        Self {
            backend,
            display,
            output_dir: None,
            period,
        }
    }

    /// Also write each new image into `dir`.
    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.output_dir = Some(dir);
        self
    }

    /// Fetch once and update whichever panels the response carries.
    ///
    /// Returns `true` if the request itself succeeded.
    pub async fn fetch_once(&self) -> bool {
        let response = match self.backend.fetch_heatmap().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Failed to fetch heatmap");
                return false;
            }
        };

        let mut updates = Vec::new();
        for (kind, field) in [
            (HeatmapKind::Upload, response.upload_heatmap_image),
            (HeatmapKind::Download, response.download_heatmap_image),
        ] {
            let Some(encoded) = field else {
                debug!(kind = ?kind, "Heatmap response has no image for panel");
                continue;
            };
            match HeatmapImage::from_base64(&encoded) {
                Ok(image) => updates.push((kind, Arc::new(image))),
                Err(e) => warn!(kind = ?kind, error = %e, "Discarding heatmap image"),
            }
        }

        self.display.tx.send_modify(|board| {
            board.fetches += 1;
            for (kind, image) in &updates {
                *board.panel_mut(*kind) = HeatmapPanel::Ready(Arc::clone(image));
            }
        });

        if let Some(dir) = &self.output_dir {
            for (kind, image) in &updates {
                if let Err(e) = export(dir, *kind, image).await {
                    warn!(error = %e, "Failed to export heatmap");
                }
            }
        }

        true
    }

    /// Run the polling cycle until cancelled. The first fetch happens immediately.
    ///
    /// Each fetch runs in its own task, so a slow response never delays the
    /// next tick.
    pub async fn run(self, cancellation: CancellationToken) {
        info!(period_secs = self.period.as_secs_f64(), "Heatmap viewer started");
        let mut interval = ticker(self.period, FirstTick::Immediate);
        let viewer = Arc::new(self);

        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                _ = interval.tick() => {
                    let viewer = Arc::clone(&viewer);
                    let cancellation = cancellation.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            biased;

                            _ = cancellation.cancelled() => {}
                            _ = viewer.fetch_once() => {}
                        }
                    });
                }
            }
        }

        info!("Heatmap viewer stopped");
    }
}

async fn export(
    dir: &std::path::Path,
    kind: HeatmapKind,
    image: &HeatmapImage,
) -> Result<(), HeatmapError> {
    let path = dir.join(kind.file_name());
    tokio::fs::write(&path, &image.data)
        .await
        .map_err(|source| HeatmapError::Export {
            path: path.clone(),
            source,
        })?;
    debug!(path = %path.display(), "Heatmap exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HEATMAP_PATH;
    use crate::transport::tests::MockHttpClient;
    use serde_json::json;

    fn png_base64(width: u32, height: u32) -> String {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        BASE64_STANDARD.encode(buf.into_inner())
    }

    fn viewer(mock: &Arc<MockHttpClient>, display: &HeatmapDisplay) -> HeatmapViewer {
        HeatmapViewer::new(
            BackendClient::new("http://backend", mock.clone()),
            display.clone(),
            DEFAULT_HEATMAP_PERIOD,
        )
    }

    #[test]
    fn test_decode_reads_dimensions() {
        let image = HeatmapImage::from_base64(&png_base64(4, 3)).unwrap();
        assert_eq!(image.dimensions, Some((4, 3)));
    }

    #[test]
    fn test_decode_non_image_bytes_has_no_dimensions() {
        let image = HeatmapImage::from_base64(&BASE64_STANDARD.encode(b"not a png")).unwrap();
        assert_eq!(image.dimensions, None);
        assert_eq!(&image.data[..], b"not a png");
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(matches!(
            HeatmapImage::from_base64("%%%"),
            Err(HeatmapError::Base64(_))
        ));
    }

    #[tokio::test]
    async fn test_both_panels_update() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_json(
            HEATMAP_PATH,
            json!({
                "upload_heatmap_image": png_base64(2, 2),
                "download_heatmap_image": png_base64(3, 3)
            }),
        );
        let display = HeatmapDisplay::new();

        assert!(viewer(&mock, &display).fetch_once().await);

        let board = display.current();
        assert_eq!(board.upload.image().unwrap().dimensions, Some((2, 2)));
        assert_eq!(board.download.image().unwrap().dimensions, Some((3, 3)));
        assert_eq!(board.fetches, 1);
    }

    #[tokio::test]
    async fn test_missing_download_field_keeps_loading_placeholder() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_json(
            HEATMAP_PATH,
            json!({ "upload_heatmap_image": png_base64(2, 2) }),
        );
        let display = HeatmapDisplay::new();

        viewer(&mock, &display).fetch_once().await;

        let board = display.current();
        assert!(!board.upload.is_loading());
        assert!(board.download.is_loading());
    }

    #[tokio::test]
    async fn test_missing_field_keeps_prior_image() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_json(
            HEATMAP_PATH,
            json!({
                "upload_heatmap_image": png_base64(2, 2),
                "download_heatmap_image": png_base64(3, 3)
            }),
        );
        mock.respond_json(
            HEATMAP_PATH,
            json!({ "upload_heatmap_image": png_base64(5, 5) }),
        );
        let display = HeatmapDisplay::new();
        let viewer = viewer(&mock, &display);

        viewer.fetch_once().await;
        viewer.fetch_once().await;

        let board = display.current();
        assert_eq!(board.upload.image().unwrap().dimensions, Some((5, 5)));
        assert_eq!(board.download.image().unwrap().dimensions, Some((3, 3)));
        assert_eq!(board.fetches, 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_board_untouched() {
        let mock = Arc::new(MockHttpClient::new());
        let display = HeatmapDisplay::new();

        assert!(!viewer(&mock, &display).fetch_once().await);
        assert_eq!(display.current(), HeatmapBoard::default());
    }

    #[tokio::test]
    async fn test_export_writes_png_files() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_json(
            HEATMAP_PATH,
            json!({ "download_heatmap_image": png_base64(2, 2) }),
        );
        let dir = tempfile::tempdir().unwrap();
        let display = HeatmapDisplay::new();

        viewer(&mock, &display)
            .with_output_dir(dir.path().to_path_buf())
            .fetch_once()
            .await;

        assert!(dir.path().join(DOWNLOAD_HEATMAP_FILE).exists());
        assert!(!dir.path().join(UPLOAD_HEATMAP_FILE).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fetches_immediately_then_every_period() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_json(HEATMAP_PATH, json!({}));
        let display = HeatmapDisplay::new();
        let token = CancellationToken::new();

        let handle = tokio::spawn(viewer(&mock, &display).run(token.clone()));

        tokio::time::sleep(Duration::from_millis(12_500)).await;
        assert_eq!(mock.calls_to(HEATMAP_PATH), 3);

        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.calls_to(HEATMAP_PATH), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_does_not_delay_next_tick() {
        let mock = Arc::new(MockHttpClient::new());
        mock.respond_json(
            HEATMAP_PATH,
            json!({ "upload_heatmap_image": png_base64(2, 2) }),
        );
        mock.set_latency(Duration::from_secs(12));
        let display = HeatmapDisplay::new();
        let token = CancellationToken::new();

        let handle = tokio::spawn(viewer(&mock, &display).run(token.clone()));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(mock.calls_to(HEATMAP_PATH), 3);
        assert!(display.current().upload.is_loading());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(display.current().fetches, 1);

        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(display.current().fetches, 1);
    }
}
