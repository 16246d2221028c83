//! Detection record: one reusable pool slot holding one frame's results.

use nalgebra::{Isometry3, Point2};

use crate::detect::MarkerDetector;
use crate::frame::Frame;

/// Upper bound on detections stored per record.
pub const MAX_DETECTIONS: usize = 256;

/// Pixel-space bounding polygon of a square marker, corners in detector order.
pub type Quad = [Point2<f64>; 4];

/// Preallocated detection results for one frame.
///
/// The four parallel arrays always have length `MAX_DETECTIONS`. Only
/// `[0, detection_count)` is meaningful for the current publish; entries past
/// that are left over from earlier cycles and must be ignored.
#[derive(Debug)]
pub struct DetectionRecord {
    pub frame_number: u32,
    pub frame_time: f64,
    detection_count: usize,
    ids: Box<[u32]>,
    poses: Box<[Isometry3<f64>]>,
    bounds: Box<[Quad]>,
    centers: Box<[Point2<f64>]>,
    /// Source frame, moved in by the detection stage for the display path.
    pub frame: Option<Frame>,
}

impl DetectionRecord {
    /// Pool factory: allocates every array once.
    pub fn preallocate() -> Self {
        Self {
            frame_number: 0,
            frame_time: 0.0,
            detection_count: 0,
            ids: vec![0; MAX_DETECTIONS].into_boxed_slice(),
            poses: vec![Isometry3::identity(); MAX_DETECTIONS].into_boxed_slice(),
            bounds: vec![[Point2::origin(); 4]; MAX_DETECTIONS].into_boxed_slice(),
            centers: vec![Point2::origin(); MAX_DETECTIONS].into_boxed_slice(),
            frame: None,
        }
    }

    pub fn detection_count(&self) -> usize {
        self.detection_count
    }

    /// Overwrite this record in place from the detector's last `detect` call.
    ///
    /// `found` is clamped to `MAX_DETECTIONS`; returns the stored count.
    pub fn fill_from_detector(
        &mut self,
        detector: &dyn MarkerDetector,
        found: usize,
        frame_number: u32,
        frame_time: f64,
    ) -> usize {
        let count = found.min(MAX_DETECTIONS);
        self.frame_number = frame_number;
        self.frame_time = frame_time;
        self.detection_count = count;
        for i in 0..count {
            self.ids[i] = detector.id(i);
            detector.center(i, &mut self.centers[i]);
            detector.bounds(i, &mut self.bounds[i]);
            detector.pose(i, &mut self.poses[i]);
        }
        count
    }

    /// Write one entry directly. Grows `detection_count` to cover `index`.
    pub fn set_detection(
        &mut self,
        index: usize,
        id: u32,
        pose: Isometry3<f64>,
        bounds: Quad,
        center: Point2<f64>,
    ) {
        assert!(index < MAX_DETECTIONS, "detection index {index} out of range");
        self.ids[index] = id;
        self.poses[index] = pose;
        self.bounds[index] = bounds;
        self.centers[index] = center;
        self.detection_count = self.detection_count.max(index + 1);
    }

    /// Shrink or extend the meaningful range without touching array contents.
    pub fn set_detection_count(&mut self, count: usize) {
        self.detection_count = count.min(MAX_DETECTIONS);
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids[..self.detection_count]
    }

    pub fn poses(&self) -> &[Isometry3<f64>] {
        &self.poses[..self.detection_count]
    }

    pub fn bounds(&self) -> &[Quad] {
        &self.bounds[..self.detection_count]
    }

    pub fn centers(&self) -> &[Point2<f64>] {
        &self.centers[..self.detection_count]
    }
}

impl Default for DetectionRecord {
    fn default() -> Self {
        Self::preallocate()
    }
}
