use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::annotate::DISPLAY_SINK_NAMES;
use crate::calibration::DEFAULT_CALIBRATION_PATH;
use crate::detect::{SyntheticDetectorConfig, DETECTOR_NAMES};
use crate::error::PipelineError;
use crate::frame::PixelFormat;
use crate::ingest::CameraConfig;
use crate::pipeline::PipelineSettings;
use crate::queue::QueuePolicy;
use crate::transport::{parse_udp_target, DEFAULT_MULTICAST_TTL};
use crate::wire::{HEADER_LEN, DETECTION_LEN, MAX_UDP_PAYLOAD};

const DEFAULT_CAMERA: &str = "stub://camera";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_UDP_TARGET: &str = "224.0.0.69:7400";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8780";
const DEFAULT_DETECTOR: &str = "synthetic";
const DEFAULT_DISPLAY_SINK: &str = "log";
const DEFAULT_SNAPSHOT_PATH: &str = "preview.jpg";
const DEFAULT_HEALTH_SECS: u64 = 5;
const MIN_PAYLOAD_LIMIT: usize = HEADER_LEN + DETECTION_LEN;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RelaydConfigFile {
    camera: Option<CameraConfigFile>,
    calibration: Option<CalibrationConfigFile>,
    detector: Option<DetectorConfigFile>,
    udp: Option<UdpConfigFile>,
    http: Option<HttpConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    display: Option<DisplayConfigFile>,
    health_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    format: Option<String>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    path: Option<PathBuf>,
    persist_nominal: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    name: Option<String>,
    markers: Option<usize>,
    marker_size: Option<f64>,
    base_id: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct UdpConfigFile {
    target: Option<String>,
    bind: Option<String>,
    payload_limit: Option<usize>,
    multicast_ttl: Option<u32>,
    multicast_loop: Option<bool>,
    broadcast: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct HttpConfigFile {
    enabled: Option<bool>,
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    pool_capacity: Option<usize>,
    capture_queue: Option<QueueConfigFile>,
    annotate_queue: Option<usize>,
    display_queue: Option<usize>,
    poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
enum QueueConfigFile {
    Unbounded,
    DropOldest { capacity: usize },
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    sink: Option<String>,
    snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RelaydConfig {
    pub camera: CameraConfig,
    pub calibration: CalibrationSettings,
    pub detector: DetectorSettings,
    pub udp: UdpSettings,
    pub http: HttpSettings,
    pub pipeline: PipelineSettings,
    pub display: DisplaySettings,
    pub health_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct CalibrationSettings {
    pub path: PathBuf,
    /// Write nominal intrinsics to `path` when the file is missing.
    pub persist_nominal: bool,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub name: String,
    pub synthetic: SyntheticDetectorConfig,
}

#[derive(Debug, Clone)]
pub struct UdpSettings {
    pub target: String,
    pub bind: Option<String>,
    pub payload_limit: usize,
    pub multicast_ttl: u32,
    pub multicast_loop: bool,
    /// Target is a subnet broadcast address.
    pub broadcast: bool,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub enabled: bool,
    pub addr: String,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub sink: String,
    pub snapshot_path: PathBuf,
}

impl RelaydConfig {
    /// Load from the file named by `RELAY_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("RELAY_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from `path` (defaults only when `None`), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => RelaydConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RelaydConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let format = match camera_file.format.as_deref() {
            None => PixelFormat::Rgb8,
            Some(name) => parse_pixel_format(name)?,
        };
        let camera = CameraConfig {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_HEIGHT),
            fps: camera_file.fps.unwrap_or(DEFAULT_FPS),
            format,
            max_frames: camera_file.max_frames,
        };

        let calibration_file = file.calibration.unwrap_or_default();
        let calibration = CalibrationSettings {
            path: calibration_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CALIBRATION_PATH)),
            persist_nominal: calibration_file.persist_nominal.unwrap_or(false),
        };

        let detector_file = file.detector.unwrap_or_default();
        let synthetic_defaults = SyntheticDetectorConfig::default();
        let detector = DetectorSettings {
            name: detector_file
                .name
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            synthetic: SyntheticDetectorConfig {
                markers: detector_file.markers.unwrap_or(synthetic_defaults.markers),
                marker_size: detector_file
                    .marker_size
                    .unwrap_or(synthetic_defaults.marker_size),
                base_id: detector_file.base_id.unwrap_or(synthetic_defaults.base_id),
                ..synthetic_defaults
            },
        };

        let udp_file = file.udp.unwrap_or_default();
        let udp = UdpSettings {
            target: udp_file
                .target
                .unwrap_or_else(|| DEFAULT_UDP_TARGET.to_string()),
            bind: udp_file.bind,
            payload_limit: udp_file.payload_limit.unwrap_or(MAX_UDP_PAYLOAD),
            multicast_ttl: udp_file.multicast_ttl.unwrap_or(DEFAULT_MULTICAST_TTL),
            multicast_loop: udp_file.multicast_loop.unwrap_or(true),
            broadcast: udp_file.broadcast.unwrap_or(false),
        };

        let http_file = file.http.unwrap_or_default();
        let http = HttpSettings {
            enabled: http_file.enabled.unwrap_or(false),
            addr: http_file
                .addr
                .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
        };

        let pipeline_file = file.pipeline.unwrap_or_default();
        let pipeline_defaults = PipelineSettings::default();
        let pipeline = PipelineSettings {
            pool_capacity: pipeline_file
                .pool_capacity
                .unwrap_or(pipeline_defaults.pool_capacity),
            capture_queue: match pipeline_file.capture_queue {
                Some(QueueConfigFile::Unbounded) => QueuePolicy::Unbounded,
                Some(QueueConfigFile::DropOldest { capacity }) => QueuePolicy::DropOldest(capacity),
                None => pipeline_defaults.capture_queue,
            },
            annotate_queue: pipeline_file
                .annotate_queue
                .unwrap_or(pipeline_defaults.annotate_queue),
            display_queue: pipeline_file
                .display_queue
                .unwrap_or(pipeline_defaults.display_queue),
            poll_interval: pipeline_file
                .poll_ms
                .map(Duration::from_millis)
                .unwrap_or(pipeline_defaults.poll_interval),
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            sink: display_file
                .sink
                .unwrap_or_else(|| DEFAULT_DISPLAY_SINK.to_string()),
            snapshot_path: display_file
                .snapshot_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
        };

        Ok(Self {
            camera,
            calibration,
            detector,
            udp,
            http,
            pipeline,
            display,
            health_interval: Duration::from_secs(
                file.health_interval_secs.unwrap_or(DEFAULT_HEALTH_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = non_empty_env("RELAY_CAMERA") {
            self.camera.device = device;
        }
        if let Some(target) = non_empty_env("RELAY_UDP_TARGET") {
            self.udp.target = target;
        }
        if let Some(addr) = non_empty_env("RELAY_HTTP_ADDR") {
            self.http.addr = addr;
            self.http.enabled = true;
        }
        if let Some(path) = non_empty_env("RELAY_CALIBRATION") {
            self.calibration.path = PathBuf::from(path);
        }
        if let Some(capacity) = non_empty_env("RELAY_POOL_CAPACITY") {
            self.pipeline.pool_capacity = capacity.parse().map_err(|_| {
                PipelineError::InvalidConfig(
                    "RELAY_POOL_CAPACITY must be a positive integer".to_string(),
                )
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> anyhow::Error { PipelineError::InvalidConfig(msg).into() };

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(invalid(format!(
                "camera size must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.pipeline.pool_capacity < 2 {
            return Err(invalid(format!(
                "pool capacity must be at least 2, got {}",
                self.pipeline.pool_capacity
            )));
        }
        if let QueuePolicy::DropOldest(0) = self.pipeline.capture_queue {
            return Err(invalid("capture queue capacity must be at least 1".to_string()));
        }
        if self.pipeline.annotate_queue == 0 || self.pipeline.display_queue == 0 {
            return Err(invalid("annotate/display queue capacity must be at least 1".to_string()));
        }
        if self.pipeline.poll_interval.is_zero() {
            return Err(invalid("poll_ms must be greater than zero".to_string()));
        }
        if !(MIN_PAYLOAD_LIMIT..=MAX_UDP_PAYLOAD).contains(&self.udp.payload_limit) {
            return Err(invalid(format!(
                "udp payload limit must be within {}..={}, got {}",
                MIN_PAYLOAD_LIMIT, MAX_UDP_PAYLOAD, self.udp.payload_limit
            )));
        }
        parse_udp_target(&self.udp.target).map_err(|e| invalid(format!("{:#}", e)))?;
        if let Some(bind) = &self.udp.bind {
            bind.parse::<SocketAddr>()
                .map_err(|_| invalid(format!("udp bind address '{}' is not ip:port", bind)))?;
        }
        if self.http.enabled {
            self.http
                .addr
                .parse::<SocketAddr>()
                .map_err(|_| invalid(format!("http address '{}' is not ip:port", self.http.addr)))?;
        }
        if !DETECTOR_NAMES.contains(&self.detector.name.as_str()) {
            return Err(invalid(format!(
                "unknown detector '{}' (available: {})",
                self.detector.name,
                DETECTOR_NAMES.join(", ")
            )));
        }
        if !DISPLAY_SINK_NAMES.contains(&self.display.sink.as_str()) {
            return Err(invalid(format!(
                "unknown display sink '{}' (available: {})",
                self.display.sink,
                DISPLAY_SINK_NAMES.join(", ")
            )));
        }
        if self.health_interval.is_zero() {
            return Err(invalid("health_interval_secs must be greater than zero".to_string()));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RelaydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_pixel_format(name: &str) -> Result<PixelFormat> {
    match name.to_lowercase().as_str() {
        "rgb8" | "rgb" => Ok(PixelFormat::Rgb8),
        "gray8" | "gray" | "mono" => Ok(PixelFormat::Gray8),
        other => Err(PipelineError::InvalidConfig(format!(
            "unknown pixel format '{}': expected 'rgb8' or 'gray8'",
            other
        ))
        .into()),
    }
}
