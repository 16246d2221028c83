//! Conversion of device pixel layouts to packed RGB.

#![cfg_attr(not(feature = "camera-v4l2"), allow(dead_code))]

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeviceLayout {
    Rgb24,
    /// Packed 4:2:2, Y0 U Y1 V.
    Yuyv,
}

impl DeviceLayout {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }

    fn frame_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            Self::Rgb24 => pixels.checked_mul(3),
            Self::Yuyv => pixels.checked_mul(2),
        }
    }
}

/// Convert `raw` into `out` (resized to `width * height * 3`).
pub(crate) fn to_rgb(
    raw: &[u8],
    width: u32,
    height: u32,
    layout: DeviceLayout,
    out: &mut Vec<u8>,
) -> Result<()> {
    let expected = layout
        .frame_len(width, height)
        .ok_or_else(|| anyhow!("{}x{} frame dimensions overflow", width, height))?;
    // Drivers may pad the buffer past the image.
    if raw.len() < expected {
        return Err(anyhow!(
            "{:?} frame too short: expected {}, got {}",
            layout,
            expected,
            raw.len()
        ));
    }

    match layout {
        DeviceLayout::Rgb24 => {
            out.clear();
            out.extend_from_slice(&raw[..expected]);
        }
        DeviceLayout::Yuyv => {
            out.resize(width as usize * height as usize * 3, 0);
            for (pair, rgb) in raw[..expected].chunks_exact(4).zip(out.chunks_exact_mut(6)) {
                let u = pair[1] as f32 - 128.0;
                let v = pair[3] as f32 - 128.0;
                yuv_to_rgb(pair[0], u, v, &mut rgb[..3]);
                yuv_to_rgb(pair[2], u, v, &mut rgb[3..]);
            }
        }
    }
    Ok(())
}

fn yuv_to_rgb(y: u8, u: f32, v: f32, out: &mut [u8]) {
    let y = y as f32;
    out[0] = clamp_to_u8(y + 1.402 * v);
    out[1] = clamp_to_u8(y - 0.344_136 * u - 0.714_136 * v);
    out[2] = clamp_to_u8(y + 1.772 * u);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_is_gray() -> Result<()> {
        let yuyv = [128u8, 128, 64, 128, 200, 128, 10, 128];
        let mut rgb = Vec::new();
        to_rgb(&yuyv, 4, 1, DeviceLayout::Yuyv, &mut rgb)?;
        assert_eq!(rgb, vec![128, 128, 128, 64, 64, 64, 200, 200, 200, 10, 10, 10]);
        Ok(())
    }

    #[test]
    fn rgb_ignores_driver_padding() -> Result<()> {
        let raw = [1u8, 2, 3, 4, 5, 6, 0, 0];
        let mut rgb = vec![9; 32];
        to_rgb(&raw, 2, 1, DeviceLayout::Rgb24, &mut rgb)?;
        assert_eq!(rgb, vec![1, 2, 3, 4, 5, 6]);
        Ok(())
    }

    #[test]
    fn short_buffer_is_rejected() {
        let mut rgb = Vec::new();
        assert!(to_rgb(&[0; 3], 2, 1, DeviceLayout::Yuyv, &mut rgb).is_err());
        assert!(to_rgb(&[0; 5], 2, 1, DeviceLayout::Rgb24, &mut rgb).is_err());
    }

    #[test]
    fn yuyv_ignores_driver_padding() -> Result<()> {
        let mut rgb = Vec::new();
        to_rgb(&[50, 128, 60, 128, 0xAA], 2, 1, DeviceLayout::Yuyv, &mut rgb)?;
        assert_eq!(rgb, vec![50, 50, 50, 60, 60, 60]);
        Ok(())
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(DeviceLayout::from_fourcc(b"YUYV"), Some(DeviceLayout::Yuyv));
        assert_eq!(DeviceLayout::from_fourcc(b"MJPG"), None);
    }
}
