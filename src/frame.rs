//! Captured camera frames.
//!
//! A `Frame` is produced by the capture stage, moved (never copied) into a pool
//! record by the detection stage, taken back out by the broadcast stage for the
//! display path, and finally drawn on by the renderer.

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 8-bit RGB, 3 bytes per pixel.
    Rgb8,
    /// 8-bit luma, 1 byte per pixel.
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture sequence number assigned by the source (counts every captured frame).
    pub sequence: u64,
    /// Seconds since the source was opened.
    pub timestamp_s: f64,
}

impl Frame {
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        sequence: u64,
        timestamp_s: f64,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{} {:?}",
                pixels.len(),
                expected,
                width,
                height,
                format
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            format,
            sequence,
            timestamp_s,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as u64) < self.width as u64 && (y as u64) < self.height as u64
    }

    /// Set one pixel. RGB colors are reduced to luma on gray frames.
    /// Out-of-bounds coordinates are ignored.
    pub fn put_pixel(&mut self, x: i64, y: i64, rgb: [u8; 3]) {
        if !self.contains(x, y) {
            return;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bpp;
        match self.format {
            PixelFormat::Rgb8 => self.pixels[offset..offset + 3].copy_from_slice(&rgb),
            PixelFormat::Gray8 => {
                let luma = (u32::from(rgb[0]) * 299
                    + u32::from(rgb[1]) * 587
                    + u32::from(rgb[2]) * 114)
                    / 1000;
                self.pixels[offset] = luma as u8;
            }
        }
    }

    pub fn pixel(&self, x: i64, y: i64) -> Option<&[u8]> {
        if !self.contains(x, y) {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bpp;
        Some(&self.pixels[offset..offset + bpp])
    }
}
