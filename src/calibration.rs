//! Camera intrinsics.
//!
//! Intrinsics come from a calibration file written by an external calibration run.
//! When the file is missing the relay falls back to a nominal pinhole model so it can
//! still start; poses are then only roughly scaled.

use anyhow::{anyhow, Context, Result};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CALIBRATION_PATH: &str = "intrinsics.json";

/// Pinhole camera with radial-tangential (Brown) distortion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    #[serde(default)]
    pub skew: f64,
    pub width: u32,
    pub height: u32,
    /// Radial coefficients k1, k2, ...
    #[serde(default)]
    pub radial: Vec<f64>,
    #[serde(default)]
    pub t1: f64,
    #[serde(default)]
    pub t2: f64,
}

impl CameraIntrinsics {
    /// Placeholder model: focal length of half the width, principal point at the
    /// image center, no distortion.
    pub fn nominal(width: u32, height: u32) -> Self {
        let half_w = f64::from(width) / 2.0;
        Self {
            fx: half_w,
            fy: half_w,
            cx: half_w,
            cy: f64::from(height) / 2.0,
            skew: 0.0,
            width,
            height,
            radial: Vec::new(),
            t1: 0.0,
            t2: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("intrinsics image size must be non-zero"));
        }
        if !(self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0) {
            return Err(anyhow!("focal lengths must be positive and finite"));
        }
        if !(self.cx.is_finite() && self.cy.is_finite()) {
            return Err(anyhow!("principal point must be finite"));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read calibration file {}", path.display()))?;
        let intrinsics: Self = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid calibration file {}: {}", path.display(), e))?;
        intrinsics
            .validate()
            .with_context(|| format!("invalid calibration file {}", path.display()))?;
        Ok(intrinsics)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write calibration file {}", path.display()))?;
        Ok(())
    }

    /// Load `path`, or fall back to `nominal(width, height)` when it does not exist.
    /// With `persist` the fallback is written to `path` for later editing.
    pub fn load_or_nominal(path: &Path, width: u32, height: u32, persist: bool) -> Result<Self> {
        if path.exists() {
            let intrinsics = Self::load(path)?;
            if intrinsics.width != width || intrinsics.height != height {
                log::warn!(
                    "calibration {} is for {}x{} but capture is {}x{}; poses will be off",
                    path.display(),
                    intrinsics.width,
                    intrinsics.height,
                    width,
                    height
                );
            }
            log::info!(
                "loaded intrinsics from {} (fx={:.1} fy={:.1} cx={:.1} cy={:.1})",
                path.display(),
                intrinsics.fx,
                intrinsics.fy,
                intrinsics.cx,
                intrinsics.cy
            );
            return Ok(intrinsics);
        }

        log::warn!(
            "no calibration at {}; using nominal intrinsics for {}x{} (run a calibration for accurate poses)",
            path.display(),
            width,
            height
        );
        let intrinsics = Self::nominal(width, height);
        if persist {
            intrinsics.save(path)?;
            log::info!("nominal intrinsics written to {}", path.display());
        }
        Ok(intrinsics)
    }

    /// Project a camera-frame point to distorted pixel coordinates.
    /// Points at or behind the image plane have no projection.
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if point.z <= f64::EPSILON {
            return None;
        }
        let x = point.x / point.z;
        let y = point.y / point.z;
        let r2 = x * x + y * y;

        let mut radial = 1.0;
        let mut r_pow = r2;
        for k in &self.radial {
            radial += k * r_pow;
            r_pow *= r2;
        }
        let xd = x * radial + 2.0 * self.t1 * x * y + self.t2 * (r2 + 2.0 * x * x);
        let yd = y * radial + self.t1 * (r2 + 2.0 * y * y) + 2.0 * self.t2 * x * y;

        Some(Point2::new(
            self.fx * xd + self.skew * yd + self.cx,
            self.fy * yd + self.cy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn nominal_matches_placeholder_model() {
        let k = CameraIntrinsics::nominal(1280, 720);
        assert_eq!(k.fx, 640.0);
        assert_eq!(k.fy, 640.0);
        assert_eq!(k.cx, 640.0);
        assert_eq!(k.cy, 360.0);
        assert!(k.validate().is_ok());
    }

    #[test]
    fn optical_axis_projects_to_principal_point() {
        let k = CameraIntrinsics {
            radial: vec![0.08, -0.17],
            ..CameraIntrinsics::nominal(800, 450)
        };
        let p = k.project(&Point3::new(0.0, 0.0, 2.0)).unwrap();
        assert_relative_eq!(p.x, 400.0);
        assert_relative_eq!(p.y, 225.0);
        assert!(k.project(&Point3::new(0.1, 0.1, -1.0)).is_none());
    }

    #[test]
    fn radial_distortion_pushes_points_outward() {
        let plain = CameraIntrinsics::nominal(800, 450);
        let barrel = CameraIntrinsics {
            radial: vec![0.1],
            ..plain.clone()
        };
        let point = Point3::new(0.5, 0.0, 1.0);
        let a = plain.project(&point).unwrap();
        let b = barrel.project(&point).unwrap();
        assert_relative_eq!(a.x, 400.0 + 400.0 * 0.5);
        assert_relative_eq!(b.x, 400.0 + 400.0 * 0.5 * (1.0 + 0.1 * 0.25));
    }

    #[test]
    fn missing_file_falls_back_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intrinsics.json");
        let k = CameraIntrinsics::load_or_nominal(&path, 640, 480, true).unwrap();
        assert_eq!(k, CameraIntrinsics::nominal(640, 480));
        assert!(path.exists());
        assert_eq!(CameraIntrinsics::load(&path).unwrap(), k);
    }

    #[test]
    fn partial_file_uses_serde_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intrinsics.json");
        std::fs::write(
            &path,
            r#"{"fx": 632.6, "fy": 629.4, "cx": 401.2, "cy": 229.3, "width": 800, "height": 450}"#,
        )
        .unwrap();
        let k = CameraIntrinsics::load(&path).unwrap();
        assert!(k.radial.is_empty());
        assert_eq!(k.t1, 0.0);
        assert_eq!(k.width, 800);
    }

    #[test]
    fn rejects_non_positive_focal_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("intrinsics.json");
        std::fs::write(
            &path,
            r#"{"fx": 0.0, "fy": 629.4, "cx": 401.2, "cy": 229.3, "width": 800, "height": 450}"#,
        )
        .unwrap();
        assert!(CameraIntrinsics::load(&path).is_err());
    }
}
