//! Wiring a `RelaydConfig` into a running relay.

use anyhow::{Context, Result};
use std::time::Duration;

use crate::annotate::{display_sink_by_name, OutlineRenderer};
use crate::api::{ApiConfig, ApiHandle, ApiServer};
use crate::calibration::CameraIntrinsics;
use crate::config::RelaydConfig;
use crate::detect::detector_by_name;
use crate::ingest::CameraSource;
use crate::pipeline::{self, PipelineHandle, PipelineParts, StatsSnapshot};
use crate::shutdown::StopToken;
use crate::transport::{parse_udp_target, UdpBroadcaster, UdpSinkConfig};

/// Build every collaborator named by `cfg`. Nothing is opened or bound except the
/// UDP socket.
pub fn assemble(cfg: &RelaydConfig) -> Result<PipelineParts> {
    let intrinsics = CameraIntrinsics::load_or_nominal(
        &cfg.calibration.path,
        cfg.camera.width,
        cfg.camera.height,
        cfg.calibration.persist_nominal,
    )?;

    let target = parse_udp_target(&cfg.udp.target)?;
    let mut udp = UdpSinkConfig::new(target);
    if let Some(bind) = &cfg.udp.bind {
        udp.bind = bind.parse().with_context(|| format!("udp bind '{}'", bind))?;
    }
    udp.payload_limit = cfg.udp.payload_limit;
    udp.multicast_ttl = cfg.udp.multicast_ttl;
    udp.multicast_loop = cfg.udp.multicast_loop;
    udp.broadcast = cfg.udp.broadcast;
    let packets = UdpBroadcaster::open(&udp)?;

    Ok(PipelineParts {
        source: Box::new(CameraSource::new(cfg.camera.clone())?),
        detector: detector_by_name(&cfg.detector.name, cfg.detector.synthetic.clone())?,
        intrinsics,
        packets: Box::new(packets),
        renderer: Box::new(OutlineRenderer::default()),
        display: display_sink_by_name(&cfg.display.sink, &cfg.display.snapshot_path)?,
    })
}

/// Running pipeline plus the optional HTTP API.
pub struct Relay {
    pipeline: PipelineHandle,
    api: Option<ApiHandle>,
    health_interval: Duration,
}

impl Relay {
    pub fn start(cfg: &RelaydConfig, stop: StopToken) -> Result<Self> {
        let parts = assemble(cfg)?;
        let pipeline = pipeline::spawn(parts, &cfg.pipeline, stop)?;
        let api = if cfg.http.enabled {
            let server = ApiServer::new(
                ApiConfig {
                    addr: cfg.http.addr.clone(),
                },
                pipeline.latest(),
                pipeline.shared_stats(),
            );
            match server.spawn() {
                Ok(handle) => Some(handle),
                Err(err) => {
                    pipeline.shutdown()?;
                    return Err(err);
                }
            }
        } else {
            None
        };
        Ok(Self {
            pipeline,
            api,
            health_interval: cfg.health_interval,
        })
    }

    pub fn pipeline(&self) -> &PipelineHandle {
        &self.pipeline
    }

    pub fn api_addr(&self) -> Option<std::net::SocketAddr> {
        self.api.as_ref().map(|api| api.addr)
    }

    /// Supervise until stopped, drained, or `limit` elapses; then shut down.
    pub fn run(self, limit: Option<Duration>) -> Result<StatsSnapshot> {
        self.pipeline.supervise(self.health_interval, limit);
        self.shutdown()
    }

    pub fn shutdown(self) -> Result<StatsSnapshot> {
        let stats = self.pipeline.shutdown();
        if let Some(api) = self.api {
            api.stop()?;
        }
        stats
    }
}
