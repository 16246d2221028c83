//! Marker relay
//!
//! Real-time fiducial marker pipeline: frames are captured from a camera, markers
//! are detected and their poses estimated, and each frame's results are broadcast
//! as one UDP datagram (plus an optional HTTP JSON view) while an annotated preview
//! is rendered alongside.
//!
//! # Architecture
//!
//! - Detection results live in a fixed pool of preallocated records (`pool`,
//!   `record`). One detection thread writes, one broadcast thread reads; records are
//!   reused in place, never copied or reallocated per frame.
//! - Stages are OS threads connected by non-blocking handoff queues (`queue`) with a
//!   drop-oldest policy where a slow consumer must not stall the camera.
//! - Published records are encoded into a fixed binary layout (`wire`) sized to fit
//!   one datagram.
//!
//! # Module Structure
//!
//! - `ingest`: camera sources (`stub://` synthetic, V4L2)
//! - `detect`: marker detector trait and backends
//! - `pipeline`: stage threads, statistics, supervisor
//! - `transport`, `api`: UDP publishing and the HTTP view
//! - `annotate`: overlay rendering and display sinks

pub mod annotate;
pub mod api;
pub mod calibration;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod record;
pub mod relay;
pub mod shutdown;
pub mod transport;
pub mod wire;

pub use calibration::CameraIntrinsics;
pub use config::RelaydConfig;
pub use detect::MarkerDetector;
pub use error::{PipelineError, PoolEmpty, PoolFull};
pub use frame::{Frame, PixelFormat};
pub use ingest::{CameraConfig, CameraSource, FrameSource};
pub use pipeline::{PipelineHandle, PipelineParts, PipelineSettings, StatsSnapshot};
pub use pool::{PoolReader, PoolWriter, ReadSlot, RecordPool, WriteSlot};
pub use queue::{handoff, QueuePolicy};
pub use record::{DetectionRecord, MAX_DETECTIONS};
pub use relay::Relay;
pub use shutdown::StopToken;
pub use wire::{decode_packet, encode_packet, DecodedPacket, WireDetection, WireFrame};
