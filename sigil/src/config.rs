//! Configuration file handling.
//!
//! Settings live in an INI file at `~/.config/sigil/config.ini` (platform
//! equivalent via `dirs`). A missing file yields defaults. Every setting is
//! addressable as a [`ConfigKey`] (`section.key`), which the CLI uses for
//! `config get|set|list`.
//!
//! ```ini
//! [backend]
//! url = http://localhost:5000
//! timeout = 30
//!
//! [probe]
//! download_url = https://httpbin.org/image/jpeg
//! upload_url = https://httpbin.org/post
//! upload_bytes = 1000000
//! upload_chunk_bytes = 65536
//!
//! [position]
//! latitude = 52.52
//! longitude = 13.40
//! geoip_url =
//!
//! [schedule]
//! speed_refresh_ms = 1000
//! heatmap_secs = 5
//! recommendation_secs = 10
//! submit_secs = 30
//!
//! [recommendation]
//! algorithm = q-learning
//!
//! [heatmap]
//! output_dir =
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::agent::{AgentConfig, PositionConfig};
use crate::backend::DEFAULT_BACKEND_URL;
use crate::coord::Coordinate;
use crate::heatmap::DEFAULT_HEATMAP_PERIOD;
use crate::poller::DEFAULT_RECOMMENDATION_PERIOD;
use crate::probe::ProbeConfig;
use crate::recommendation::Algorithm;
use crate::reporter::{DEFAULT_SPEED_REFRESH_PERIOD, DEFAULT_SUBMIT_PERIOD};
use crate::transport::DEFAULT_TIMEOUT_SECS;

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors loading, saving or editing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Failed to read {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: ConfigKey,
        value: String,
        reason: String,
    },
}

/// `[backend]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub url: String,
    /// Request timeout in seconds.
    pub timeout: u64,
}

/// `[position]` section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionSettings {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub geoip_url: Option<String>,
}

/// `[schedule]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSettings {
    pub speed_refresh_ms: u64,
    pub heatmap_secs: u64,
    pub recommendation_secs: u64,
    pub submit_secs: u64,
}

/// Complete configuration file contents.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub backend: BackendSettings,
    pub probe: ProbeConfig,
    pub position: PositionSettings,
    pub schedule: ScheduleSettings,
    pub algorithm: Algorithm,
    pub heatmap_output_dir: Option<PathBuf>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            backend: BackendSettings {
                url: DEFAULT_BACKEND_URL.to_string(),
                timeout: DEFAULT_TIMEOUT_SECS,
            },
            probe: ProbeConfig::default(),
            position: PositionSettings::default(),
            schedule: ScheduleSettings {
                speed_refresh_ms: DEFAULT_SPEED_REFRESH_PERIOD.as_millis() as u64,
                heatmap_secs: DEFAULT_HEATMAP_PERIOD.as_secs(),
                recommendation_secs: DEFAULT_RECOMMENDATION_PERIOD.as_secs(),
                submit_secs: DEFAULT_SUBMIT_PERIOD.as_secs(),
            },
            algorithm: Algorithm::default(),
            heatmap_output_dir: None,
        }
    }
}

/// Path of the user's config file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("sigil").join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

impl ConfigFile {
    /// Load from the default path, or defaults if no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path()?)
    }

    /// Load from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config = Self::default();
        for key in ConfigKey::ALL {
            if let Some(value) = ini.get_from(Some(key.section()), key.key_name()) {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Save to the default path.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::ALL {
            ini.with_section(Some(key.section()))
                .set(key.key_name(), key.get(self));
        }
        ini.write_to_file(path).map_err(write_err)
    }

    /// Build the runtime agent configuration.
    pub fn to_agent_config(&self) -> AgentConfig {
        let position = match (self.position.latitude, self.position.longitude) {
            (Some(lat), Some(lon)) => PositionConfig::Fixed(Coordinate::new(lat, lon)),
            _ => match &self.position.geoip_url {
                Some(url) => PositionConfig::GeoIp(url.clone()),
                None => PositionConfig::Unavailable,
            },
        };

        AgentConfig {
            backend_url: self.backend.url.clone(),
            request_timeout: Duration::from_secs(self.backend.timeout),
            probe: self.probe.clone(),
            position,
            speed_refresh_period: Duration::from_millis(self.schedule.speed_refresh_ms),
            heatmap_period: Duration::from_secs(self.schedule.heatmap_secs),
            recommendation_period: Duration::from_secs(self.schedule.recommendation_secs),
            submit_period: Duration::from_secs(self.schedule.submit_secs),
            algorithm: self.algorithm,
            heatmap_output_dir: self.heatmap_output_dir.clone(),
        }
    }
}

/// Addressable configuration settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    BackendUrl,
    BackendTimeout,
    ProbeDownloadUrl,
    ProbeUploadUrl,
    ProbeUploadBytes,
    ProbeUploadChunkBytes,
    PositionLatitude,
    PositionLongitude,
    PositionGeoipUrl,
    ScheduleSpeedRefreshMs,
    ScheduleHeatmapSecs,
    ScheduleRecommendationSecs,
    ScheduleSubmitSecs,
    RecommendationAlgorithm,
    HeatmapOutputDir,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 15] = [
        ConfigKey::BackendUrl,
        ConfigKey::BackendTimeout,
        ConfigKey::ProbeDownloadUrl,
        ConfigKey::ProbeUploadUrl,
        ConfigKey::ProbeUploadBytes,
        ConfigKey::ProbeUploadChunkBytes,
        ConfigKey::PositionLatitude,
        ConfigKey::PositionLongitude,
        ConfigKey::PositionGeoipUrl,
        ConfigKey::ScheduleSpeedRefreshMs,
        ConfigKey::ScheduleHeatmapSecs,
        ConfigKey::ScheduleRecommendationSecs,
        ConfigKey::ScheduleSubmitSecs,
        ConfigKey::RecommendationAlgorithm,
        ConfigKey::HeatmapOutputDir,
    ];

    pub fn all() -> &'static [ConfigKey] {
        &Self::ALL
    }

    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::BackendUrl | ConfigKey::BackendTimeout => "backend",
            ConfigKey::ProbeDownloadUrl
            | ConfigKey::ProbeUploadUrl
            | ConfigKey::ProbeUploadBytes
            | ConfigKey::ProbeUploadChunkBytes => "probe",
            ConfigKey::PositionLatitude
            | ConfigKey::PositionLongitude
            | ConfigKey::PositionGeoipUrl => "position",
            ConfigKey::ScheduleSpeedRefreshMs
            | ConfigKey::ScheduleHeatmapSecs
            | ConfigKey::ScheduleRecommendationSecs
            | ConfigKey::ScheduleSubmitSecs => "schedule",
            ConfigKey::RecommendationAlgorithm => "recommendation",
            ConfigKey::HeatmapOutputDir => "heatmap",
        }
    }

    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::BackendUrl => "url",
            ConfigKey::BackendTimeout => "timeout",
            ConfigKey::ProbeDownloadUrl => "download_url",
            ConfigKey::ProbeUploadUrl => "upload_url",
            ConfigKey::ProbeUploadBytes => "upload_bytes",
            ConfigKey::ProbeUploadChunkBytes => "upload_chunk_bytes",
            ConfigKey::PositionLatitude => "latitude",
            ConfigKey::PositionLongitude => "longitude",
            ConfigKey::PositionGeoipUrl => "geoip_url",
            ConfigKey::ScheduleSpeedRefreshMs => "speed_refresh_ms",
            ConfigKey::ScheduleHeatmapSecs => "heatmap_secs",
            ConfigKey::ScheduleRecommendationSecs => "recommendation_secs",
            ConfigKey::ScheduleSubmitSecs => "submit_secs",
            ConfigKey::RecommendationAlgorithm => "algorithm",
            ConfigKey::HeatmapOutputDir => "output_dir",
        }
    }

    /// Current value as a string; unset optional values are empty.
    pub fn get(&self, config: &ConfigFile) -> String {
        fn opt<T: ToString>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }

        match self {
            ConfigKey::BackendUrl => config.backend.url.clone(),
            ConfigKey::BackendTimeout => config.backend.timeout.to_string(),
            ConfigKey::ProbeDownloadUrl => config.probe.download_url.clone(),
            ConfigKey::ProbeUploadUrl => config.probe.upload_url.clone(),
            ConfigKey::ProbeUploadBytes => config.probe.upload_bytes.to_string(),
            ConfigKey::ProbeUploadChunkBytes => config.probe.upload_chunk_bytes.to_string(),
            ConfigKey::PositionLatitude => opt(&config.position.latitude),
            ConfigKey::PositionLongitude => opt(&config.position.longitude),
            ConfigKey::PositionGeoipUrl => opt(&config.position.geoip_url),
            ConfigKey::ScheduleSpeedRefreshMs => config.schedule.speed_refresh_ms.to_string(),
            ConfigKey::ScheduleHeatmapSecs => config.schedule.heatmap_secs.to_string(),
            ConfigKey::ScheduleRecommendationSecs => {
                config.schedule.recommendation_secs.to_string()
            }
            ConfigKey::ScheduleSubmitSecs => config.schedule.submit_secs.to_string(),
            ConfigKey::RecommendationAlgorithm => config.algorithm.as_str().to_string(),
            ConfigKey::HeatmapOutputDir => config
                .heatmap_output_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        }
    }

    /// Parse and store `value`. An empty value clears optional settings.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: *self,
            value: value.to_string(),
            reason: reason.to_string(),
        };

        match self {
            ConfigKey::BackendUrl => config.backend.url = parse_url(value).map_err(invalid)?,
            ConfigKey::BackendTimeout => config.backend.timeout = parse_positive(value).map_err(invalid)?,
            ConfigKey::ProbeDownloadUrl => {
                config.probe.download_url = parse_url(value).map_err(invalid)?
            }
            ConfigKey::ProbeUploadUrl => {
                config.probe.upload_url = parse_url(value).map_err(invalid)?
            }
            ConfigKey::ProbeUploadBytes => {
                config.probe.upload_bytes = parse_positive(value).map_err(invalid)? as usize
            }
            ConfigKey::ProbeUploadChunkBytes => {
                config.probe.upload_chunk_bytes = parse_positive(value).map_err(invalid)? as usize
            }
            ConfigKey::PositionLatitude => {
                config.position.latitude = parse_degrees(value, 90.0).map_err(invalid)?
            }
            ConfigKey::PositionLongitude => {
                config.position.longitude = parse_degrees(value, 180.0).map_err(invalid)?
            }
            ConfigKey::PositionGeoipUrl => {
                config.position.geoip_url = if value.is_empty() {
                    None
                } else {
                    Some(parse_url(value).map_err(invalid)?)
                }
            }
            ConfigKey::ScheduleSpeedRefreshMs => {
                config.schedule.speed_refresh_ms = parse_positive(value).map_err(invalid)?
            }
            ConfigKey::ScheduleHeatmapSecs => {
                config.schedule.heatmap_secs = parse_positive(value).map_err(invalid)?
            }
            ConfigKey::ScheduleRecommendationSecs => {
                config.schedule.recommendation_secs = parse_positive(value).map_err(invalid)?
            }
            ConfigKey::ScheduleSubmitSecs => {
                config.schedule.submit_secs = parse_positive(value).map_err(invalid)?
            }
            ConfigKey::RecommendationAlgorithm => {
                config.algorithm = value
                    .parse()
                    .map_err(|_| invalid("expected 'q-learning' or 'dqn'"))?
            }
            ConfigKey::HeatmapOutputDir => {
                config.heatmap_output_dir = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.to_string() == wanted)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

fn parse_url(value: &str) -> Result<String, &'static str> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(value.to_string())
    } else {
        Err("expected an http:// or https:// URL")
    }
}

fn parse_positive(value: &str) -> Result<u64, &'static str> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err("expected a positive integer"),
    }
}

fn parse_degrees(value: &str, limit: f64) -> Result<Option<f64>, &'static str> {
    if value.is_empty() {
        return Ok(None);
    }
    match value.parse::<f64>() {
        Ok(deg) if deg.is_finite() && deg.abs() <= limit => Ok(Some(deg)),
        _ => Err("expected degrees within range"),
    }
}
