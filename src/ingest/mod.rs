//! Camera frame sources.
//!
//! - `stub://` sources generate pattern frames with noise (tests, benches, demos)
//! - V4L2 devices such as `/dev/video0` (feature: camera-v4l2)
//!
//! A source is owned by the capture thread. It is opened once, then polled with
//! `next_frame` until it reports end of stream.

mod camera;
mod normalize;
#[cfg(feature = "camera-v4l2")]
mod v4l2;

use anyhow::Result;

use crate::frame::{Frame, PixelFormat};

pub use camera::CameraSource;

pub const STUB_SCHEME: &str = "stub://";

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// `stub://<name>` or a device path.
    pub device: String,
    pub width: u32,
    pub height: u32,
    /// Requested frame rate. Synthetic sources pace themselves to it; 0 is unpaced.
    pub fps: u32,
    /// Pixel format produced by synthetic sources. Devices always produce RGB8.
    pub format: PixelFormat,
    /// End the stream after this many frames.
    pub max_frames: Option<u64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
            format: PixelFormat::Rgb8,
            max_frames: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// A camera as seen by the capture stage.
pub trait FrameSource: Send {
    /// Open the device. Failure here is fatal at startup.
    fn open(&mut self) -> Result<()>;

    /// Next frame, or `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Dimensions of produced frames. Valid after `open`.
    fn dimensions(&self) -> (u32, u32);

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}
