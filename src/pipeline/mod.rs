//! Staged frame pipeline.
//!
//! ```text
//! capture --queue--> detect --pool--> broadcast --queue--> annotate --queue--> display
//!                                        |
//!                                        +--> UDP packet, latest frame (HTTP)
//! ```
//!
//! Every stage is a named OS thread. The pool has a single reader; broadcast fans
//! each record out to the annotation queue after sending it. End of stream drains
//! downstream: each stage finishes once its input is closed and empty.

mod latest;
mod stages;
mod stats;

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::annotate::{DisplaySink, Renderer};
use crate::calibration::CameraIntrinsics;
use crate::detect::MarkerDetector;
use crate::error::PipelineError;
use crate::ingest::FrameSource;
use crate::pool::RecordPool;
use crate::queue::{handoff, QueuePolicy};
use crate::record::DetectionRecord;
use crate::shutdown::StopToken;
use crate::transport::PacketSink;
use crate::wire::HEADER_LEN;

pub use latest::LatestFrame;
pub use stats::{PipelineStats, StatsSnapshot};

/// Sizing and timing for the pipeline.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub pool_capacity: usize,
    pub capture_queue: QueuePolicy,
    pub annotate_queue: usize,
    pub display_queue: usize,
    /// Upper bound on how long a waiting stage goes without checking the stop token.
    pub poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pool_capacity: 8,
            capture_queue: QueuePolicy::DropOldest(4),
            annotate_queue: 2,
            display_queue: 2,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// The collaborators a pipeline runs. Each is moved onto the thread that uses it.
pub struct PipelineParts {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn MarkerDetector>,
    pub intrinsics: CameraIntrinsics,
    pub packets: Box<dyn PacketSink>,
    pub renderer: Box<dyn Renderer>,
    pub display: Box<dyn DisplaySink>,
}

/// Open the camera, configure the detector, and start every stage.
///
/// Errors here are startup failures; once this returns, stages only log.
pub fn spawn(
    parts: PipelineParts,
    settings: &PipelineSettings,
    stop: StopToken,
) -> Result<PipelineHandle> {
    let PipelineParts {
        mut source,
        mut detector,
        intrinsics,
        packets,
        renderer,
        display,
    } = parts;

    if settings.annotate_queue == 0 || settings.display_queue == 0 {
        let msg = "queue capacities must be at least 1".to_string();
        return Err(PipelineError::InvalidConfig(msg).into());
    }
    if let QueuePolicy::DropOldest(0) = settings.capture_queue {
        let msg = "capture queue capacity must be at least 1".to_string();
        return Err(PipelineError::InvalidConfig(msg).into());
    }
    if packets.payload_limit() < HEADER_LEN {
        return Err(PipelineError::InvalidConfig(format!(
            "packet sink payload limit {} cannot hold the {}-byte header",
            packets.payload_limit(),
            HEADER_LEN
        ))
        .into());
    }
    let pool = RecordPool::new(settings.pool_capacity, DetectionRecord::preallocate)?;

    source
        .open()
        .map_err(|e| PipelineError::ResourceUnavailable(format!("camera: {:#}", e)))?;
    let (width, height) = source.dimensions();
    if (intrinsics.width, intrinsics.height) != (width, height) {
        log::warn!(
            "intrinsics are for {}x{}, camera delivers {}x{}",
            intrinsics.width,
            intrinsics.height,
            width,
            height
        );
    }
    detector
        .configure_lens_distortion(&intrinsics, width, height)
        .context("configure detector lens")?;

    let (writer, reader) = pool.split();
    let (frame_tx, frame_rx) = handoff(settings.capture_queue);
    let (job_tx, job_rx) = handoff(QueuePolicy::DropOldest(settings.annotate_queue));
    let (shown_tx, shown_rx) = handoff(QueuePolicy::DropOldest(settings.display_queue));
    // Overlays in flight plus one being filled and one returning.
    let (spare_tx, spare_rx) = handoff(QueuePolicy::DropOldest(settings.annotate_queue + 2));

    let stats = Arc::new(PipelineStats::default());
    let latest = LatestFrame::default();
    let poll = settings.poll_interval;
    let mut handle = PipelineHandle {
        stop: stop.clone(),
        stats: stats.clone(),
        latest: latest.clone(),
        threads: Vec::with_capacity(5),
        started: Instant::now(),
    };

    // Downstream first so nothing upstream produces into a stage that failed to start.
    {
        let (stats, stop) = (stats.clone(), stop.clone());
        handle.start("display", move || stages::display(display, shown_rx, stats, stop, poll))?;
    }
    {
        let (stats, stop) = (stats.clone(), stop.clone());
        handle.start("annotate", move || {
            stages::annotate(renderer, job_rx, shown_tx, spare_tx, stats, stop, poll)
        })?;
    }
    {
        let (stats, stop) = (stats.clone(), stop.clone());
        handle.start("broadcast", move || {
            stages::broadcast(reader, packets, job_tx, spare_rx, latest, stats, stop, poll)
        })?;
    }
    {
        let (stats, stop) = (stats.clone(), stop.clone());
        handle.start("detect", move || {
            stages::detect(detector, frame_rx, writer, stats, stop, poll)
        })?;
    }
    {
        let (stats, stop) = (stats.clone(), stop.clone());
        handle.start("capture", move || stages::capture(source, frame_tx, stats, stop, poll))?;
    }

    log::info!(
        "pipeline running: {}x{}, pool of {}, capture queue {:?}",
        width,
        height,
        settings.pool_capacity,
        settings.capture_queue
    );
    Ok(handle)
}

/// Running pipeline.
pub struct PipelineHandle {
    stop: StopToken,
    stats: Arc<PipelineStats>,
    latest: LatestFrame,
    threads: Vec<JoinHandle<()>>,
    started: Instant,
}

impl PipelineHandle {
    fn start<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => {
                self.threads.push(handle);
                Ok(())
            }
            Err(err) => {
                self.stop.stop();
                let msg = format!("spawn {} thread: {}", name, err);
                Err(PipelineError::ResourceUnavailable(msg).into())
            }
        }
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shared_stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn latest(&self) -> LatestFrame {
        self.latest.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once every stage has exited (end of stream or stop).
    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(|t| t.is_finished())
    }

    /// Block until stopped, drained, or `limit` elapses, logging a health line every
    /// `health_every`.
    pub fn supervise(&self, health_every: Duration, limit: Option<Duration>) {
        let step = Duration::from_millis(100).min(health_every);
        let mut next_health = Instant::now() + health_every;
        loop {
            if self.stop.is_stopped() || self.is_finished() {
                return;
            }
            if limit.is_some_and(|limit| self.uptime() >= limit) {
                log::info!("run limit reached");
                return;
            }
            if Instant::now() >= next_health {
                log::info!("health: {}", self.stats());
                next_health += health_every;
            }
            thread::sleep(step);
        }
    }

    /// Stop every stage and wait for it.
    pub fn shutdown(self) -> Result<StatsSnapshot> {
        self.stop.stop();
        self.join()
    }

    /// Wait for every stage to exit on its own.
    pub fn join(self) -> Result<StatsSnapshot> {
        let mut panicked = Vec::new();
        for handle in self.threads {
            let name = handle.thread().name().unwrap_or("stage").to_string();
            if handle.join().is_err() {
                panicked.push(name);
            }
        }
        let stats = self.stats.snapshot();
        if !panicked.is_empty() {
            return Err(anyhow!("pipeline stage(s) panicked: {}", panicked.join(", ")));
        }
        log::info!("pipeline stopped: {}", stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotate::{AnnotatedFrame, NullSink, OutlineRenderer};
    use crate::detect::testing::FixedDetector;
    use crate::frame::{Frame, PixelFormat};
    use crate::ingest::SourceStats;
    use crate::wire::{decode_packet, MAX_UDP_PAYLOAD};
    use std::sync::Mutex;

    struct ScriptedSource {
        remaining: u64,
        next: u64,
        fail_open: bool,
    }

    impl FrameSource for ScriptedSource {
        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(anyhow!("no such device"));
            }
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            self.next += 1;
            Ok(Some(Frame::new(
                vec![0; 16 * 8],
                16,
                8,
                PixelFormat::Gray8,
                self.next,
                self.next as f64 / 30.0,
            )?))
        }

        fn dimensions(&self) -> (u32, u32) {
            (16, 8)
        }

        fn is_healthy(&self) -> bool {
            true
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.next,
                device: "scripted".into(),
            }
        }
    }

    #[derive(Clone, Default)]
    struct MemorySink {
        packets: Arc<Mutex<Vec<Vec<u8>>>>,
        limit: Option<usize>,
    }

    impl PacketSink for MemorySink {
        fn payload_limit(&self) -> usize {
            self.limit.unwrap_or(MAX_UDP_PAYLOAD)
        }

        fn send_packet(&mut self, payload: &[u8]) -> Result<(), PipelineError> {
            self.packets.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CountingDisplay {
        frames: Arc<Mutex<Vec<u32>>>,
    }

    impl DisplaySink for CountingDisplay {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn present(&mut self, frame: &AnnotatedFrame) -> Result<()> {
            self.frames.lock().unwrap().push(frame.frame_number);
            Ok(())
        }
    }

    fn lossless() -> PipelineSettings {
        PipelineSettings {
            capture_queue: QueuePolicy::Unbounded,
            annotate_queue: 64,
            display_queue: 64,
            poll_interval: Duration::from_millis(10),
            ..PipelineSettings::default()
        }
    }

    fn parts(
        frames: u64,
        detector: FixedDetector,
        sink: MemorySink,
        display: CountingDisplay,
    ) -> PipelineParts {
        PipelineParts {
            source: Box::new(ScriptedSource {
                remaining: frames,
                next: 0,
                fail_open: false,
            }),
            detector: Box::new(detector),
            intrinsics: CameraIntrinsics::nominal(16, 8),
            packets: Box::new(sink),
            renderer: Box::new(OutlineRenderer::default()),
            display: Box::new(display),
        }
    }

    fn quiet_parts(frames: u64, markers: usize) -> PipelineParts {
        let detector = FixedDetector {
            count: markers,
            fail_every: None,
        };
        parts(frames, detector, MemorySink::default(), CountingDisplay::default())
    }

    #[test]
    fn every_frame_is_broadcast_in_order_then_drains() {
        let sink = MemorySink::default();
        let display = CountingDisplay::default();
        let detector = FixedDetector {
            count: 2,
            fail_every: None,
        };
        let handle = spawn(
            parts(20, detector, sink.clone(), display.clone()),
            &lossless(),
            StopToken::new(),
        )
        .unwrap();
        let latest = handle.latest();
        let stats = handle.join().unwrap();

        let packets = sink.packets.lock().unwrap();
        assert_eq!(packets.len(), 20);
        let numbers: Vec<u32> = packets
            .iter()
            .map(|p| decode_packet(p).unwrap().frame_number)
            .collect();
        assert_eq!(numbers, (1..=20).collect::<Vec<_>>());
        assert_eq!(decode_packet(&packets[0]).unwrap().poses.len(), 2);

        assert_eq!(stats.published, 20);
        assert_eq!(stats.packets_sent, 20);
        assert_eq!(latest.snapshot().unwrap().frame_number, 20);
        assert_eq!(*display.frames.lock().unwrap(), (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn rejected_frames_are_skipped_and_numbering_stays_dense() {
        let sink = MemorySink::default();
        let detector = FixedDetector {
            count: 1,
            fail_every: Some(3),
        };
        let handle = spawn(
            parts(9, detector, sink.clone(), CountingDisplay::default()),
            &lossless(),
            StopToken::new(),
        )
        .unwrap();
        let stats = handle.join().unwrap();

        assert_eq!(stats.detection_failures, 3);
        assert_eq!(stats.published, 6);
        let packets = sink.packets.lock().unwrap();
        let numbers: Vec<u32> = packets
            .iter()
            .map(|p| decode_packet(p).unwrap().frame_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn oversized_detection_lists_are_clamped_to_the_payload() {
        let sink = MemorySink {
            limit: Some(12 + 28 * 3),
            ..MemorySink::default()
        };
        let detector = FixedDetector {
            count: 5,
            fail_every: None,
        };
        let handle = spawn(
            parts(2, detector, sink.clone(), CountingDisplay::default()),
            &lossless(),
            StopToken::new(),
        )
        .unwrap();
        let latest = handle.latest();
        let stats = handle.join().unwrap();

        assert_eq!(stats.clamped_packets, 2);
        for packet in sink.packets.lock().unwrap().iter() {
            assert_eq!(packet.len(), 12 + 28 * 3);
        }
        let ids: Vec<u32> = latest.snapshot().unwrap().detections.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![100, 101, 102]);
    }

    #[test]
    fn camera_open_failure_is_resource_unavailable() {
        let mut p = quiet_parts(1, 0);
        p.source = Box::new(ScriptedSource {
            remaining: 1,
            next: 0,
            fail_open: true,
        });
        let err = spawn(p, &lossless(), StopToken::new()).err().unwrap();
        let pipeline_err = err.downcast_ref::<PipelineError>().unwrap();
        assert!(matches!(pipeline_err, PipelineError::ResourceUnavailable(_)));
    }

    #[test]
    fn pool_below_two_is_invalid_config() {
        let settings = PipelineSettings {
            pool_capacity: 1,
            ..lossless()
        };
        let p = quiet_parts(1, 0);
        let err = spawn(p, &settings, StopToken::new()).err().unwrap();
        assert!(err.downcast_ref::<PipelineError>().unwrap().is_fatal());
    }

    #[test]
    fn payload_limit_below_header_is_invalid_config() {
        let mut p = quiet_parts(1, 1);
        p.packets = Box::new(MemorySink {
            limit: Some(HEADER_LEN - 4),
            ..MemorySink::default()
        });
        let err = spawn(p, &lossless(), StopToken::new()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidConfig(msg)) if msg.contains("payload limit 8")
        ));
    }

    #[test]
    fn stop_ends_an_endless_stream() {
        let mut p = quiet_parts(0, 1);
        p.source = Box::new(ScriptedSource {
            remaining: u64::MAX,
            next: 0,
            fail_open: false,
        });
        p.display = Box::new(NullSink);
        let handle = spawn(p, &PipelineSettings::default(), StopToken::new()).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        let stats = handle.shutdown().unwrap();
        assert!(stats.captured > 0);
    }
}
