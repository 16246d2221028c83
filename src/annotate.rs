//! Annotated preview: drawing detections onto frames and presenting them.

use anyhow::{anyhow, Result};
use nalgebra::{Isometry3, Point2};
#[cfg(feature = "display-snapshot")]
use std::path::PathBuf;
#[cfg(feature = "display-snapshot")]
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::record::{DetectionRecord, Quad};

/// Detections to draw, copied out of a pool record so the record can be released.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub frame_number: u32,
    pub ids: Vec<u32>,
    pub poses: Vec<Isometry3<f64>>,
    pub bounds: Vec<Quad>,
    pub centers: Vec<Point2<f64>>,
}

impl Overlay {
    pub fn from_record(record: &DetectionRecord) -> Self {
        let mut overlay = Self::default();
        overlay.fill_from_record(record);
        overlay
    }

    /// Overwrite from `record`, reusing this overlay's buffers.
    pub fn fill_from_record(&mut self, record: &DetectionRecord) {
        self.frame_number = record.frame_number;
        self.ids.clear();
        self.ids.extend_from_slice(record.ids());
        self.poses.clear();
        self.poses.extend_from_slice(record.poses());
        self.bounds.clear();
        self.bounds.extend_from_slice(record.bounds());
        self.centers.clear();
        self.centers.extend_from_slice(record.centers());
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Frame on its way to the annotation stage.
#[derive(Debug)]
pub struct AnnotationJob {
    pub frame: Frame,
    pub overlay: Overlay,
}

/// Rendered frame on its way to the display.
#[derive(Debug)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub frame_number: u32,
    pub detections: usize,
}

pub trait Renderer: Send {
    fn render(&mut self, frame: &mut Frame, overlay: &Overlay);
}

/// Draws each marker's bounding quad and a cross on its center.
#[derive(Clone, Debug)]
pub struct OutlineRenderer {
    pub outline: [u8; 3],
    pub center: [u8; 3],
    /// Half-length of the center cross arms, in pixels.
    pub cross_radius: i64,
}

impl Default for OutlineRenderer {
    fn default() -> Self {
        Self {
            outline: [0, 255, 0],
            center: [255, 0, 0],
            cross_radius: 4,
        }
    }
}

impl Renderer for OutlineRenderer {
    fn render(&mut self, frame: &mut Frame, overlay: &Overlay) {
        for quad in &overlay.bounds {
            for k in 0..4 {
                let a = quad[k];
                let b = quad[(k + 1) % 4];
                draw_line(frame, to_pixel(a), to_pixel(b), self.outline);
            }
        }
        let r = self.cross_radius;
        for center in &overlay.centers {
            let (x, y) = to_pixel(*center);
            draw_line(frame, (x - r, y), (x + r, y), self.center);
            draw_line(frame, (x, y - r), (x, y + r), self.center);
        }
    }
}

fn to_pixel(p: Point2<f64>) -> (i64, i64) {
    // `as` saturates, NaN becomes 0.
    (p.x.round() as i64, p.y.round() as i64)
}

/// Bresenham line; pixels outside the frame are skipped. Lines with an endpoint far
/// outside the frame are dropped whole.
fn draw_line(frame: &mut Frame, from: (i64, i64), to: (i64, i64), rgb: [u8; 3]) {
    let reach = 16 * i64::from(frame.width.max(frame.height));
    if [from.0, from.1, to.0, to.1].iter().any(|v| v.abs() > reach) {
        return;
    }
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        frame.put_pixel(x, y, rgb);
        if (x, y) == to {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

/// Final consumer of annotated frames.
pub trait DisplaySink: Send {
    fn name(&self) -> &'static str;

    fn present(&mut self, frame: &AnnotatedFrame) -> Result<()>;
}

/// Logs one debug line per presented frame.
#[derive(Debug, Default)]
pub struct LogSink {
    presented: u64,
}

impl DisplaySink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn present(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        self.presented += 1;
        log::debug!(
            "display: frame {} ({} markers, {}x{}), {} presented",
            frame.frame_number,
            frame.detections,
            frame.frame.width,
            frame.frame.height,
            self.presented
        );
        Ok(())
    }
}

/// Discards frames.
#[derive(Debug, Default)]
pub struct NullSink;

impl DisplaySink for NullSink {
    fn name(&self) -> &'static str {
        "none"
    }

    fn present(&mut self, _frame: &AnnotatedFrame) -> Result<()> {
        Ok(())
    }
}

/// Writes the latest annotated frame as a JPEG, at most once per `interval`.
#[cfg(feature = "display-snapshot")]
#[derive(Debug)]
pub struct SnapshotSink {
    path: PathBuf,
    interval: Duration,
    last_write: Option<Instant>,
}

#[cfg(feature = "display-snapshot")]
impl SnapshotSink {
    pub fn new(path: PathBuf, interval: Duration) -> Self {
        Self {
            path,
            interval,
            last_write: None,
        }
    }
}

#[cfg(feature = "display-snapshot")]
impl DisplaySink for SnapshotSink {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn present(&mut self, frame: &AnnotatedFrame) -> Result<()> {
        use crate::frame::PixelFormat;
        use anyhow::Context;

        if let Some(last) = self.last_write {
            if last.elapsed() < self.interval {
                return Ok(());
            }
        }
        let f = &frame.frame;
        let color = match f.format {
            PixelFormat::Rgb8 => image::ExtendedColorType::Rgb8,
            PixelFormat::Gray8 => image::ExtendedColorType::L8,
        };
        image::save_buffer_with_format(
            &self.path,
            f.pixels(),
            f.width,
            f.height,
            color,
            image::ImageFormat::Jpeg,
        )
        .with_context(|| format!("write snapshot {}", self.path.display()))?;
        self.last_write = Some(Instant::now());
        Ok(())
    }
}

pub const DISPLAY_SINK_NAMES: &[&str] = &["log", "none", "snapshot"];

/// Build a display sink by name. `snapshot_path` is used by the snapshot sink.
pub fn display_sink_by_name(
    name: &str,
    snapshot_path: &std::path::Path,
) -> Result<Box<dyn DisplaySink>> {
    match name {
        "log" => Ok(Box::new(LogSink::default())),
        "none" => Ok(Box::new(NullSink)),
        #[cfg(feature = "display-snapshot")]
        "snapshot" => Ok(Box::new(SnapshotSink::new(
            snapshot_path.to_path_buf(),
            Duration::from_secs(1),
        ))),
        #[cfg(not(feature = "display-snapshot"))]
        "snapshot" => {
            let _ = snapshot_path;
            Err(anyhow!("display sink 'snapshot' requires the display-snapshot feature"))
        }
        other => Err(anyhow!(
            "unknown display sink '{}' (available: {})",
            other,
            DISPLAY_SINK_NAMES.join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use nalgebra::{Translation3, UnitQuaternion};

    fn blank(format: PixelFormat) -> Frame {
        let len = 32 * 24 * format.bytes_per_pixel();
        Frame::new(vec![0; len], 32, 24, format, 1, 0.0).unwrap()
    }

    fn square(x0: f64, y0: f64, side: f64) -> Quad {
        [
            Point2::new(x0, y0),
            Point2::new(x0 + side, y0),
            Point2::new(x0 + side, y0 + side),
            Point2::new(x0, y0 + side),
        ]
    }

    fn overlay_with(bounds: Quad, center: Point2<f64>) -> Overlay {
        Overlay {
            frame_number: 3,
            ids: vec![7],
            poses: vec![Isometry3::identity()],
            bounds: vec![bounds],
            centers: vec![center],
        }
    }

    #[test]
    fn outline_and_cross_are_drawn() {
        let mut frame = blank(PixelFormat::Rgb8);
        let overlay = overlay_with(square(4.0, 4.0, 10.0), Point2::new(9.0, 9.0));
        OutlineRenderer::default().render(&mut frame, &overlay);

        assert_eq!(frame.pixel(4, 4), Some(&[0, 255, 0][..]));
        assert_eq!(frame.pixel(14, 9), Some(&[0, 255, 0][..]));
        assert_eq!(frame.pixel(9, 14), Some(&[0, 255, 0][..]));
        assert_eq!(frame.pixel(9, 9), Some(&[255, 0, 0][..]));
        assert_eq!(frame.pixel(11, 9), Some(&[255, 0, 0][..]));
        assert_eq!(frame.pixel(20, 20), Some(&[0, 0, 0][..]));
    }

    #[test]
    fn far_off_frame_geometry_is_skipped() {
        let mut frame = blank(PixelFormat::Gray8);
        let overlay = overlay_with(square(-50.0, -50.0, 1e6), Point2::new(-1e12, 1e12));
        OutlineRenderer::default().render(&mut frame, &overlay);
        assert!(frame.pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn partially_visible_edges_are_clipped_per_pixel() {
        let mut frame = blank(PixelFormat::Gray8);
        let overlay = overlay_with(square(-10.0, 5.0, 20.0), Point2::new(-100.0, -100.0));
        OutlineRenderer::default().render(&mut frame, &overlay);
        assert_ne!(frame.pixel(0, 5), Some(&[0][..]));
        assert_ne!(frame.pixel(10, 15), Some(&[0][..]));
    }

    #[test]
    fn overlay_copies_only_live_detections() {
        let mut record = DetectionRecord::preallocate();
        let pose =
            Isometry3::from_parts(Translation3::new(0.0, 0.0, 1.0), UnitQuaternion::identity());
        for i in 0..3 {
            record.set_detection(i, i as u32, pose, square(0.0, 0.0, 1.0), Point2::origin());
        }
        record.set_detection_count(2);
        record.frame_number = 12;
        let overlay = Overlay::from_record(&record);
        assert_eq!(overlay.len(), 2);
        assert_eq!(overlay.ids, vec![0, 1]);
        assert_eq!(overlay.frame_number, 12);
    }

    #[test]
    fn refilling_an_overlay_keeps_its_buffers() {
        let pose =
            Isometry3::from_parts(Translation3::new(0.0, 0.0, 1.0), UnitQuaternion::identity());
        let mut record = DetectionRecord::preallocate();
        for i in 0..4 {
            record.set_detection(i, i as u32, pose, square(0.0, 0.0, 1.0), Point2::origin());
        }
        let mut overlay = Overlay::from_record(&record);
        let buffers = (
            overlay.ids.as_ptr(),
            overlay.poses.as_ptr(),
            overlay.bounds.as_ptr(),
            overlay.centers.as_ptr(),
        );

        record.set_detection_count(2);
        record.frame_number = 40;
        overlay.fill_from_record(&record);

        assert_eq!(overlay.frame_number, 40);
        assert_eq!(overlay.ids, vec![0, 1]);
        assert_eq!(overlay.centers.len(), 2);
        assert_eq!(
            buffers,
            (
                overlay.ids.as_ptr(),
                overlay.poses.as_ptr(),
                overlay.bounds.as_ptr(),
                overlay.centers.as_ptr(),
            )
        );
    }

    #[test]
    fn sink_lookup() {
        let path = std::path::Path::new("preview.jpg");
        assert_eq!(display_sink_by_name("log", path).unwrap().name(), "log");
        assert_eq!(display_sink_by_name("none", path).unwrap().name(), "none");
        assert!(display_sink_by_name("window", path).is_err());
    }

    #[cfg(feature = "display-snapshot")]
    #[test]
    fn snapshot_sink_writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let mut sink = SnapshotSink::new(path.clone(), Duration::from_secs(60));
        let annotated = AnnotatedFrame {
            frame: blank(PixelFormat::Rgb8),
            frame_number: 1,
            detections: 0,
        };
        sink.present(&annotated).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
