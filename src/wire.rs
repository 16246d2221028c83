//! Wire format for published detections.
//!
//! Binary datagram, big-endian:
//!
//! ```text
//! i32 frameNumber | f32 frameTime | i32 detectionCount
//! detectionCount x ( f32 x, y, z | f32 qx, qy, qz, qw )
//! ```
//!
//! The marker id is not carried in the binary form; the JSON form served over HTTP
//! includes it.

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::record::DetectionRecord;

pub const HEADER_LEN: usize = 12;
pub const DETECTION_LEN: usize = 28;

/// Largest UDP payload over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Number of detections that fit in a datagram of `payload_limit` bytes.
pub fn max_detections_for_payload(payload_limit: usize) -> usize {
    payload_limit.saturating_sub(HEADER_LEN) / DETECTION_LEN
}

/// Report a clamp of `requested` detections down to `capacity`.
pub fn check_capacity(requested: usize, capacity: usize) -> Result<(), PipelineError> {
    if requested > capacity {
        return Err(PipelineError::EncodingOverflow {
            requested,
            capacity,
        });
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireDetection {
    pub id: u32,
    pub position: [f32; 3],
    /// Quaternion as x, y, z, w.
    pub rotation: [f32; 4],
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFrame {
    pub frame_number: u32,
    pub frame_time: f32,
    pub detections: Vec<WireDetection>,
}

impl WireFrame {
    /// Snapshot the first `max_detections` entries of `record`.
    pub fn from_record(record: &DetectionRecord, max_detections: usize) -> Self {
        let mut frame = Self::default();
        frame.fill_from_record(record, max_detections);
        frame
    }

    /// Like `from_record`, reusing this frame's detection storage.
    pub fn fill_from_record(&mut self, record: &DetectionRecord, max_detections: usize) {
        let count = record.detection_count().min(max_detections);
        self.frame_number = record.frame_number;
        self.frame_time = record.frame_time as f32;
        self.detections.clear();
        self.detections.extend(
            record.ids()[..count]
                .iter()
                .zip(&record.poses()[..count])
                .map(|(id, pose)| {
                    let t = pose.translation.vector;
                    let q = pose.rotation.quaternion();
                    WireDetection {
                        id: *id,
                        position: [t.x as f32, t.y as f32, t.z as f32],
                        rotation: [q.i as f32, q.j as f32, q.k as f32, q.w as f32],
                    }
                }),
        );
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.detections.len() * DETECTION_LEN
    }
}

/// Encode `frame` into `out`, replacing its contents.
///
/// Detections beyond what `payload_limit` can carry are dropped, keeping the lowest
/// indices. Returns the number of detections written. `payload_limit` must hold at
/// least the header.
pub fn encode_packet(frame: &WireFrame, payload_limit: usize, out: &mut Vec<u8>) -> usize {
    debug_assert!(
        payload_limit >= HEADER_LEN,
        "payload limit {payload_limit} is smaller than the {HEADER_LEN}-byte header"
    );
    let count = frame
        .detections
        .len()
        .min(max_detections_for_payload(payload_limit));

    out.clear();
    out.reserve(HEADER_LEN + count * DETECTION_LEN);
    out.extend_from_slice(&frame.frame_number.to_be_bytes());
    out.extend_from_slice(&frame.frame_time.to_be_bytes());
    out.extend_from_slice(&(count as i32).to_be_bytes());

    let mut i = 0;
    while i < count {
        let detection = &frame.detections[i];
        for v in detection.position.iter().chain(detection.rotation.iter()) {
            out.extend_from_slice(&v.to_be_bytes());
        }
        i += 1;
    }
    count
}

/// Pose as carried in the binary packet.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WirePose {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedPacket {
    pub frame_number: u32,
    pub frame_time: f32,
    pub poses: Vec<WirePose>,
}

pub fn decode_packet(bytes: &[u8]) -> Result<DecodedPacket, PipelineError> {
    if bytes.len() < HEADER_LEN {
        return Err(PipelineError::MalformedPacket(format!(
            "{} bytes is shorter than the {HEADER_LEN}-byte header",
            bytes.len()
        )));
    }
    let frame_number = u32::from_be_bytes(word(bytes, 0));
    let frame_time = f32::from_be_bytes(word(bytes, 4));
    let count = i32::from_be_bytes(word(bytes, 8));
    let count = usize::try_from(count).map_err(|_| {
        PipelineError::MalformedPacket(format!("negative detection count {count}"))
    })?;

    let expected = HEADER_LEN + count * DETECTION_LEN;
    if bytes.len() != expected {
        return Err(PipelineError::MalformedPacket(format!(
            "{count} detections need {expected} bytes, got {}",
            bytes.len()
        )));
    }

    let mut poses = Vec::with_capacity(count);
    for n in 0..count {
        let base = HEADER_LEN + n * DETECTION_LEN;
        let f = |k: usize| f32::from_be_bytes(word(bytes, base + 4 * k));
        poses.push(WirePose {
            position: [f(0), f(1), f(2)],
            rotation: [f(3), f(4), f(5), f(6)],
        });
    }
    Ok(DecodedPacket {
        frame_number,
        frame_time,
        poses,
    })
}

fn word(bytes: &[u8], at: usize) -> [u8; 4] {
    [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]
}
