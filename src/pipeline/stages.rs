//! Stage loops. Each runs on its own thread and owns the resources it touches.

use std::sync::Arc;
use std::time::Duration;

use crate::annotate::{AnnotatedFrame, AnnotationJob, DisplaySink, Overlay, Renderer};
use crate::detect::MarkerDetector;
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::pool::{PoolReader, PoolWriter};
use crate::queue::{Disconnected, HandoffReceiver, HandoffSender};
use crate::record::DetectionRecord;
use crate::shutdown::StopToken;
use crate::transport::PacketSink;
use crate::wire::{self, WireFrame};

use super::stats::{bump, PipelineStats};
use super::LatestFrame;

/// Consecutive read errors after which the camera is treated as gone.
const MAX_CONSECUTIVE_CAPTURE_ERRORS: u32 = 10;

/// Frames between debug heartbeats.
const HEARTBEAT_EVERY: u64 = 300;

pub(crate) fn capture(
    mut source: Box<dyn FrameSource>,
    frames: HandoffSender<Frame>,
    stats: Arc<PipelineStats>,
    stop: StopToken,
    poll: Duration,
) {
    log::info!("capture: started on {}", source.stats().device);
    let mut consecutive_errors = 0;
    while !stop.is_stopped() {
        match source.next_frame() {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                bump(&stats.captured);
                if frame.sequence % HEARTBEAT_EVERY == 0 {
                    log::debug!("capture: frame {} at {:.3}s", frame.sequence, frame.timestamp_s);
                }
                match frames.send(frame) {
                    Ok(Some(evicted)) => {
                        bump(&stats.capture_drops);
                        log::debug!("capture: detector behind, dropped frame {}", evicted.sequence);
                    }
                    Ok(None) => {}
                    Err(Disconnected(_)) => break,
                }
            }
            Ok(None) => {
                log::info!("capture: end of stream");
                break;
            }
            Err(err) => {
                bump(&stats.capture_errors);
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_CAPTURE_ERRORS {
                    log::error!(
                        "capture: giving up after {} consecutive errors: {:#}",
                        consecutive_errors,
                        err
                    );
                    break;
                }
                log::warn!("capture: {:#}", err);
                stop.sleep(poll, poll);
            }
        }
    }
    let source_stats = source.stats();
    log::info!(
        "capture: stopped after {} frames (healthy: {})",
        source_stats.frames_captured,
        source.is_healthy()
    );
}

pub(crate) fn detect(
    mut detector: Box<dyn MarkerDetector>,
    frames: HandoffReceiver<Frame>,
    mut writer: PoolWriter<DetectionRecord>,
    stats: Arc<PipelineStats>,
    stop: StopToken,
    poll: Duration,
) {
    log::info!("detect: started ({} detector)", detector.name());
    let mut frame_number: u32 = 0;
    while let Some(frame) = frames.recv(&stop, poll) {
        let Some(mut slot) = writer.wait_write_slot(&stop, poll) else {
            break;
        };
        let found = match detect_markers(detector.as_mut(), &frame) {
            Ok(found) => found,
            Err(err) => {
                // Slot goes back uncommitted.
                bump(&stats.detection_failures);
                log::warn!("detect: {}", err);
                continue;
            }
        };
        frame_number = frame_number.wrapping_add(1);
        let stored =
            slot.fill_from_detector(detector.as_ref(), found, frame_number, frame.timestamp_s);
        if stored < found {
            log::debug!("detect: frame {} kept {} of {} markers", frame_number, stored, found);
        }
        slot.frame = Some(frame);
        slot.commit();
        bump(&stats.published);
    }
    log::info!("detect: stopped after {} records", frame_number);
}

/// Run the detector on one frame. A rejected frame is a `DetectionFailure`.
fn detect_markers(
    detector: &mut dyn MarkerDetector,
    frame: &Frame,
) -> Result<usize, PipelineError> {
    detector.detect(frame).map_err(|err| {
        PipelineError::DetectionFailure(format!("frame {} skipped: {:#}", frame.sequence, err))
    })
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn broadcast(
    mut reader: PoolReader<DetectionRecord>,
    mut sink: Box<dyn PacketSink>,
    jobs: HandoffSender<AnnotationJob>,
    spare_overlays: HandoffReceiver<Overlay>,
    latest: LatestFrame,
    stats: Arc<PipelineStats>,
    stop: StopToken,
    poll: Duration,
) {
    let payload_limit = sink.payload_limit();
    let capacity = wire::max_detections_for_payload(payload_limit);
    log::info!(
        "broadcast: started (up to {} detections per packet)",
        capacity
    );

    let mut wire_frame = WireFrame::default();
    let mut packet = Vec::with_capacity(payload_limit.min(wire::MAX_UDP_PAYLOAD));
    let mut preview_open = true;
    let mut spare: Option<Overlay> = None;
    while let Some(mut slot) = reader.wait_read_slot(&stop, poll) {
        if let Err(err) = wire::check_capacity(slot.detection_count(), capacity) {
            bump(&stats.clamped_packets);
            log::warn!("broadcast: frame {}: {}", slot.frame_number, err);
        }
        wire_frame.fill_from_record(&slot, capacity);
        wire::encode_packet(&wire_frame, payload_limit, &mut packet);
        match sink.send_packet(&packet) {
            Ok(()) => bump(&stats.packets_sent),
            Err(err) => {
                bump(&stats.send_failures);
                log::warn!("broadcast: frame {}: {}", slot.frame_number, err);
            }
        }
        latest.publish(&wire_frame);

        if !preview_open {
            continue;
        }
        if let Some(frame) = slot.frame.take() {
            let mut overlay = spare
                .take()
                .or_else(|| spare_overlays.try_recv())
                .unwrap_or_default();
            overlay.fill_from_record(&slot);
            match jobs.send(AnnotationJob { frame, overlay }) {
                Ok(Some(evicted)) => {
                    bump(&stats.annotate_drops);
                    spare = Some(evicted.overlay);
                }
                Ok(None) => {}
                Err(Disconnected(_)) => {
                    log::warn!("broadcast: annotation stage gone; preview disabled");
                    preview_open = false;
                }
            }
        }
    }
    log::info!("broadcast: stopped");
}

pub(crate) fn annotate(
    mut renderer: Box<dyn Renderer>,
    jobs: HandoffReceiver<AnnotationJob>,
    rendered: HandoffSender<AnnotatedFrame>,
    spare_overlays: HandoffSender<Overlay>,
    stats: Arc<PipelineStats>,
    stop: StopToken,
    poll: Duration,
) {
    log::info!("annotate: started");
    while let Some(AnnotationJob { mut frame, overlay }) = jobs.recv(&stop, poll) {
        renderer.render(&mut frame, &overlay);
        bump(&stats.annotated);
        let annotated = AnnotatedFrame {
            frame,
            frame_number: overlay.frame_number,
            detections: overlay.len(),
        };
        // Broadcast may already be gone; the buffers are then just freed.
        let _ = spare_overlays.send(overlay);
        match rendered.send(annotated) {
            Ok(Some(_)) => bump(&stats.display_drops),
            Ok(None) => {}
            Err(Disconnected(_)) => break,
        }
    }
    log::info!("annotate: stopped");
}

pub(crate) fn display(
    mut sink: Box<dyn DisplaySink>,
    rendered: HandoffReceiver<AnnotatedFrame>,
    stats: Arc<PipelineStats>,
    stop: StopToken,
    poll: Duration,
) {
    log::info!("display: started ({} sink)", sink.name());
    while let Some(frame) = rendered.recv(&stop, poll) {
        match sink.present(&frame) {
            Ok(()) => bump(&stats.displayed),
            Err(err) => {
                bump(&stats.display_errors);
                log::warn!("display: frame {}: {:#}", frame.frame_number, err);
            }
        }
    }
    log::info!("display: stopped");
}
