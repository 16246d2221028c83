use anyhow::Result;
use nalgebra::{Isometry3, Point2};

use crate::calibration::CameraIntrinsics;
use crate::frame::Frame;
use crate::record::Quad;

/// Fiducial marker detector.
///
/// The detector owns its per-frame results. After `detect` returns `n`, the indexed
/// accessors are valid for `0..n` until the next `detect`. Accessors write into
/// caller-owned storage so the pipeline can fill pool records in place.
///
/// The detection algorithm itself lives behind this trait; the pipeline only moves
/// its results around.
pub trait MarkerDetector: Send {
    fn name(&self) -> &'static str;

    /// One-time lens setup before the first `detect`.
    fn configure_lens_distortion(
        &mut self,
        intrinsics: &CameraIntrinsics,
        width: u32,
        height: u32,
    ) -> Result<()>;

    /// Detect markers in `frame`, returning how many were found.
    ///
    /// An error means the frame was rejected; the caller skips it.
    fn detect(&mut self, frame: &Frame) -> Result<usize>;

    fn id(&self, index: usize) -> u32;

    fn center(&self, index: usize, out: &mut Point2<f64>);

    fn bounds(&self, index: usize, out: &mut Quad);

    /// Marker-to-camera transform.
    fn pose(&self, index: usize, out: &mut Isometry3<f64>);
}
