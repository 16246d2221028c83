use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::time::{Duration, Instant};

use super::{CameraConfig, FrameSource, SourceStats, STUB_SCHEME};
use crate::frame::Frame;

/// Camera frame source.
///
/// `stub://` devices produce synthetic frames; anything else is opened as a V4L2
/// device when the `camera-v4l2` feature is enabled.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "camera-v4l2")]
    Device(super::v4l2::DeviceCamera),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "camera {} has zero frame size {}x{}",
                config.device,
                config.width,
                config.height
            ));
        }
        if config.device.starts_with(STUB_SCHEME) {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::new(config)),
            });
        }
        #[cfg(feature = "camera-v4l2")]
        {
            Ok(Self {
                backend: CameraBackend::Device(super::v4l2::DeviceCamera::new(config)),
            })
        }
        #[cfg(not(feature = "camera-v4l2"))]
        {
            anyhow::bail!(
                "camera device {} requires the camera-v4l2 feature (or use {}<name>)",
                config.device,
                STUB_SCHEME
            )
        }
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.open(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.open(),
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        match &self.backend {
            CameraBackend::Synthetic(source) => (source.config.width, source.config.height),
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.dimensions(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(_) => true,
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => SourceStats {
                frames_captured: source.frame_count,
                device: source.config.device.clone(),
            },
            #[cfg(feature = "camera-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticCamera {
    config: CameraConfig,
    rng: StdRng,
    frame_count: u64,
    opened_at: Option<Instant>,
    /// Scratch buffer for per-frame noise.
    noise: Vec<u8>,
}

impl SyntheticCamera {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
            frame_count: 0,
            opened_at: None,
            noise: Vec::new(),
        }
    }

    fn open(&mut self) -> Result<()> {
        self.opened_at = Some(Instant::now());
        log::info!(
            "CameraSource: opened {} ({}x{} @ {} fps, synthetic)",
            self.config.device,
            self.config.width,
            self.config.height,
            self.config.fps
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let opened_at = self
            .opened_at
            .ok_or_else(|| anyhow!("camera {} not opened", self.config.device))?;
        if let Some(limit) = self.config.max_frames {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }

        // Pace to the nominal rate from the open instant so drift does not accumulate.
        if self.config.fps > 0 {
            let due = opened_at
                + Duration::from_secs_f64(self.frame_count as f64 / f64::from(self.config.fps));
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        self.frame_count += 1;
        let pixels = self.generate_pixels();
        let frame = Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.config.format,
            self.frame_count,
            opened_at.elapsed().as_secs_f64(),
        )?;
        Ok(Some(frame))
    }

    /// Diagonal gradient that scrolls one step per frame, plus low-amplitude noise.
    fn generate_pixels(&mut self) -> Vec<u8> {
        let bpp = self.config.format.bytes_per_pixel();
        let width = self.config.width as usize;
        let len = width * self.config.height as usize * bpp;

        self.noise.resize(len, 0);
        self.rng.fill_bytes(&mut self.noise);

        let shift = self.frame_count as usize;
        let mut pixels = vec![0u8; len];
        for (i, (pixel, noise)) in pixels.iter_mut().zip(&self.noise).enumerate() {
            let p = i / bpp;
            let base = ((p % width) + (p / width) + shift) % 224;
            *pixel = base as u8 + (noise & 0x1f);
        }
        pixels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn stub_config(max_frames: Option<u64>) -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width: 64,
            height: 48,
            fps: 0,
            format: PixelFormat::Rgb8,
            max_frames,
        }
    }

    #[test]
    fn stub_source_produces_frames() -> Result<()> {
        let mut source = CameraSource::new(stub_config(None))?;
        source.open()?;
        let frame = source.next_frame()?.expect("frame");
        assert_eq!((frame.width, frame.height), (64, 48));
        assert_eq!(frame.byte_len(), 64 * 48 * 3);
        assert_eq!(frame.sequence, 1);
        assert_eq!(source.dimensions(), (64, 48));
        Ok(())
    }

    #[test]
    fn frame_limit_ends_the_stream() -> Result<()> {
        let mut source = CameraSource::new(stub_config(Some(3)))?;
        source.open()?;
        for _ in 0..3 {
            assert!(source.next_frame()?.is_some());
        }
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 3);
        Ok(())
    }

    #[test]
    fn timestamps_are_seconds_since_open() -> Result<()> {
        let mut source = CameraSource::new(stub_config(None))?;
        source.open()?;
        let a = source.next_frame()?.expect("frame");
        std::thread::sleep(Duration::from_millis(20));
        let b = source.next_frame()?.expect("frame");
        assert!(a.timestamp_s >= 0.0);
        assert!(b.timestamp_s - a.timestamp_s >= 0.015);
        Ok(())
    }

    #[test]
    fn frames_differ_between_captures() -> Result<()> {
        let mut source = CameraSource::new(stub_config(None))?;
        source.open()?;
        let a = source.next_frame()?.expect("frame");
        let b = source.next_frame()?.expect("frame");
        assert_ne!(a.pixels(), b.pixels());
        Ok(())
    }

    #[test]
    fn next_frame_before_open_fails() -> Result<()> {
        let mut source = CameraSource::new(stub_config(None))?;
        assert!(source.next_frame().is_err());
        Ok(())
    }

    #[test]
    fn zero_size_is_rejected() {
        let mut config = stub_config(None);
        config.height = 0;
        assert!(CameraSource::new(config).is_err());
    }

    #[cfg(not(feature = "camera-v4l2"))]
    #[test]
    fn device_paths_need_the_feature() {
        let mut config = stub_config(None);
        config.device = "/dev/video0".to_string();
        let err = CameraSource::new(config).err().expect("error");
        assert!(err.to_string().contains("camera-v4l2"));
    }
}
