//! V4L2 capture device.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{to_rgb, DeviceLayout};
use super::{CameraConfig, SourceStats};
use crate::frame::{Frame, PixelFormat};

pub(crate) struct DeviceCamera {
    config: CameraConfig,
    state: Option<DeviceState>,
    layout: DeviceLayout,
    frame_count: u64,
    opened_at: Option<Instant>,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl DeviceCamera {
    pub(crate) fn new(config: CameraConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            layout: DeviceLayout::Rgb24,
            frame_count: 0,
            opened_at: None,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub(crate) fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "CameraSource: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        self.layout = DeviceLayout::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} offers unsupported pixel format {}",
                self.config.device,
                format.fourcc
            )
        })?;

        if self.config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "CameraSource: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        self.last_error = None;

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(err.to_string());
            err
        })?;
        self.state = Some(state);
        self.opened_at = Some(Instant::now());

        log::info!(
            "CameraSource: opened {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.layout
        );
        Ok(())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        if let Some(limit) = self.config.max_frames {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }
        let opened_at = self.opened_at.context("v4l2 device not opened")?;
        let state = self.state.as_mut().context("v4l2 device not opened")?;

        let mut pixels = Vec::new();
        let (width, height, layout) = (self.active_width, self.active_height, self.layout);
        let captured = state.with_mut(|fields| -> Result<()> {
            let (buf, _meta) = fields
                .stream
                .next()
                .map_err(|err| anyhow::Error::new(err).context("capture v4l2 frame"))?;
            to_rgb(buf, width, height, layout, &mut pixels)
        });
        if let Err(err) = captured {
            self.last_error = Some(err.to_string());
            return Err(err);
        }
        self.last_error = None;

        self.frame_count += 1;
        let now = Instant::now();
        self.last_frame_at = Some(now);

        let frame = Frame::new(
            pixels,
            width,
            height,
            PixelFormat::Rgb8,
            self.frame_count,
            now.duration_since(opened_at).as_secs_f64(),
        )?;
        Ok(Some(frame))
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        (self.active_width, self.active_height)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    pub(crate) fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.config.device.clone(),
        }
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.config.fps == 0 {
            2_000
        } else {
            (1000 / self.config.fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}
