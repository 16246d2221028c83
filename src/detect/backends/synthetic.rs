use std::f64::consts::TAU;

use anyhow::{anyhow, Result};
use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion};

use crate::calibration::CameraIntrinsics;
use crate::detect::backend::MarkerDetector;
use crate::frame::Frame;
use crate::record::Quad;

/// Settings for the synthetic detector.
#[derive(Clone, Debug)]
pub struct SyntheticDetectorConfig {
    /// Markers reported per frame.
    pub markers: usize,
    /// Marker edge length in meters.
    pub marker_size: f64,
    /// First marker id; the rest count up from here.
    pub base_id: u32,
    /// Distance of the orbit center from the camera, in meters.
    pub distance: f64,
    /// Orbit radius in meters.
    pub orbit_radius: f64,
}

impl Default for SyntheticDetectorConfig {
    fn default() -> Self {
        Self {
            markers: 3,
            marker_size: 0.15,
            base_id: 0,
            distance: 1.5,
            orbit_radius: 0.3,
        }
    }
}

struct SyntheticMarker {
    id: u32,
    pose: Isometry3<f64>,
    center: Point2<f64>,
    bounds: Quad,
}

/// Detector for running the pipeline without a marker library.
///
/// Reports markers orbiting in front of the camera as a function of frame time and
/// projects them through the configured lens, so centers and bounds agree with the
/// calibration. Frames whose size differs from the configured lens are rejected.
pub struct SyntheticDetector {
    config: SyntheticDetectorConfig,
    intrinsics: Option<CameraIntrinsics>,
    width: u32,
    height: u32,
    found: Vec<SyntheticMarker>,
}

impl SyntheticDetector {
    pub fn new(config: SyntheticDetectorConfig) -> Self {
        let found = Vec::with_capacity(config.markers);
        Self {
            config,
            intrinsics: None,
            width: 0,
            height: 0,
            found,
        }
    }

    fn marker_pose(&self, index: usize, t: f64) -> Isometry3<f64> {
        let phase = index as f64 * TAU / self.config.markers.max(1) as f64;
        let angle = 0.5 * t + phase;
        let translation = Translation3::new(
            self.config.orbit_radius * angle.cos(),
            0.5 * self.config.orbit_radius * angle.sin(),
            self.config.distance + 0.1 * index as f64,
        );
        let rotation =
            UnitQuaternion::from_euler_angles(0.2 * angle.sin(), 0.3 * angle.cos(), angle);
        Isometry3::from_parts(translation, rotation)
    }

    fn project_marker(
        &self,
        intrinsics: &CameraIntrinsics,
        pose: &Isometry3<f64>,
    ) -> Option<(Point2<f64>, Quad)> {
        let half = self.config.marker_size / 2.0;
        let corners = [
            Point3::new(-half, -half, 0.0),
            Point3::new(half, -half, 0.0),
            Point3::new(half, half, 0.0),
            Point3::new(-half, half, 0.0),
        ];
        let center = intrinsics.project(&pose.transform_point(&Point3::origin()))?;
        let mut bounds = [Point2::origin(); 4];
        for (out, corner) in bounds.iter_mut().zip(corners.iter()) {
            *out = intrinsics.project(&pose.transform_point(corner))?;
        }
        Some((center, bounds))
    }
}

impl Default for SyntheticDetector {
    fn default() -> Self {
        Self::new(SyntheticDetectorConfig::default())
    }
}

impl MarkerDetector for SyntheticDetector {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn configure_lens_distortion(
        &mut self,
        intrinsics: &CameraIntrinsics,
        width: u32,
        height: u32,
    ) -> Result<()> {
        intrinsics.validate()?;
        self.intrinsics = Some(intrinsics.clone());
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<usize> {
        let intrinsics = self
            .intrinsics
            .take()
            .ok_or_else(|| anyhow!("lens distortion not configured"))?;
        if frame.width != self.width || frame.height != self.height {
            self.intrinsics = Some(intrinsics);
            return Err(anyhow!(
                "frame is {}x{}, detector configured for {}x{}",
                frame.width,
                frame.height,
                self.width,
                self.height
            ));
        }

        self.found.clear();
        for index in 0..self.config.markers {
            let pose = self.marker_pose(index, frame.timestamp_s);
            let Some((center, bounds)) = self.project_marker(&intrinsics, &pose) else {
                continue;
            };
            self.found.push(SyntheticMarker {
                id: self.config.base_id + index as u32,
                pose,
                center,
                bounds,
            });
        }
        self.intrinsics = Some(intrinsics);
        Ok(self.found.len())
    }

    fn id(&self, index: usize) -> u32 {
        self.found[index].id
    }

    fn center(&self, index: usize, out: &mut Point2<f64>) {
        *out = self.found[index].center;
    }

    fn bounds(&self, index: usize, out: &mut Quad) {
        *out = self.found[index].bounds;
    }

    fn pose(&self, index: usize, out: &mut Isometry3<f64>) {
        *out = self.found[index].pose;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use approx::assert_relative_eq;

    fn frame(width: u32, height: u32, t: f64) -> Frame {
        Frame::new(
            vec![0; (width * height) as usize],
            width,
            height,
            PixelFormat::Gray8,
            1,
            t,
        )
        .unwrap()
    }

    fn configured(markers: usize) -> SyntheticDetector {
        let mut detector = SyntheticDetector::new(SyntheticDetectorConfig {
            markers,
            ..SyntheticDetectorConfig::default()
        });
        detector
            .configure_lens_distortion(&CameraIntrinsics::nominal(640, 480), 640, 480)
            .unwrap();
        detector
    }

    #[test]
    fn rejects_frames_before_lens_setup() {
        let mut detector = SyntheticDetector::default();
        assert!(detector.detect(&frame(640, 480, 0.0)).is_err());
    }

    #[test]
    fn rejects_mismatched_frame_size() {
        let mut detector = configured(2);
        let err = detector.detect(&frame(320, 240, 0.0)).unwrap_err();
        assert!(err.to_string().contains("320x240"));
    }

    #[test]
    fn reports_configured_marker_count_with_sequential_ids() {
        let mut detector = configured(4);
        assert_eq!(detector.detect(&frame(640, 480, 1.25)).unwrap(), 4);
        let ids: Vec<_> = (0..4).map(|i| detector.id(i)).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn center_is_projection_of_pose_origin() {
        let mut detector = configured(1);
        detector.detect(&frame(640, 480, 0.0)).unwrap();
        let mut pose = Isometry3::identity();
        let mut center = Point2::origin();
        detector.pose(0, &mut pose);
        detector.center(0, &mut center);

        let k = CameraIntrinsics::nominal(640, 480);
        let t = pose.translation.vector;
        assert_relative_eq!(center.x, k.fx * t.x / t.z + k.cx, epsilon = 1e-9);
        assert_relative_eq!(center.y, k.fy * t.y / t.z + k.cy, epsilon = 1e-9);
    }

    #[test]
    fn markers_move_with_time() {
        let mut detector = configured(1);
        let mut a = Isometry3::identity();
        let mut b = Isometry3::identity();
        detector.detect(&frame(640, 480, 0.0)).unwrap();
        detector.pose(0, &mut a);
        detector.detect(&frame(640, 480, 1.0)).unwrap();
        detector.pose(0, &mut b);
        assert!((a.translation.vector - b.translation.vector).norm() > 1e-3);
    }
}
