//! Validated RGBA frames.
//!
//! A `Frame` is the unit handed from a frame source to the detection pipeline.
//! Its buffer length is checked once at construction, so every consumer can
//! rely on `pixels().len() == width * height * 4`.
//!
//! Frames are ephemeral: they are never persisted, and their pixels are never
//! logged (the `Debug` impl omits them).

use anyhow::{anyhow, Result};

/// Bytes per RGBA pixel.
pub const RGBA_CHANNELS: usize = 4;

/// One captured RGBA frame.
///
/// Pixel data is private; there is no `Clone`, so a frame has a single owner
/// as it moves from the source to the worker.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic identifier assigned by the frame source.
    pub frame_id: u64,
    /// Capture time in milliseconds since the Unix epoch.
    pub captured_at_ms: u64,
}

impl Frame {
    /// Build a frame from an RGBA buffer.
    ///
    /// Fails when the buffer length is not `width * height * 4`.
    pub fn from_rgba(
        data: Vec<u8>,
        width: u32,
        height: u32,
        frame_id: u64,
        captured_at_ms: u64,
    ) -> Result<Self> {
        let expected = expected_rgba_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGBA frame length mismatch: expected {} ({}x{}x4), got {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            frame_id,
            captured_at_ms,
        })
    }

    /// Read-only view of the RGBA bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// RGBA value at `(x, y)`.
    pub fn rgba_at(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y as usize * self.width as usize + x as usize) * RGBA_CHANNELS;
        [
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]
    }

    /// Contract check for the pipeline entry point. A frame that got here with
    /// a malformed buffer is a programming error, not a recoverable condition.
    pub(crate) fn assert_well_formed(&self) {
        assert_eq!(
            self.data.len(),
            self.pixel_count() * RGBA_CHANNELS,
            "frame {} violates the RGBA length contract",
            self.frame_id
        );
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frame_id", &self.frame_id)
            .field("captured_at_ms", &self.captured_at_ms)
            .finish_non_exhaustive()
    }
}

/// Expected RGBA buffer length for the given dimensions, with overflow checks.
pub fn expected_rgba_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGBA_CHANNELS))
        .ok_or_else(|| anyhow!("RGBA frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_buffer_length_mismatch() {
        assert!(Frame::from_rgba(vec![0u8; 15], 2, 2, 1, 0).is_err());
        assert!(Frame::from_rgba(vec![0u8; 17], 2, 2, 1, 0).is_err());
    }

    #[test]
    fn accepts_exact_rgba_buffer() -> Result<()> {
        let mut data = vec![0u8; 16];
        data[4..8].copy_from_slice(&[10, 20, 30, 255]);
        let frame = Frame::from_rgba(data, 2, 2, 7, 42)?;
        assert_eq!(frame.pixel_count(), 4);
        assert_eq!(frame.rgba_at(1, 0), [10, 20, 30, 255]);
        assert_eq!(frame.frame_id, 7);
        Ok(())
    }

    #[test]
    fn debug_output_omits_pixels() -> Result<()> {
        let frame = Frame::from_rgba(vec![9u8; 4], 1, 1, 3, 0)?;
        let text = format!("{:?}", frame);
        assert!(text.contains("frame_id: 3"));
        assert!(!text.contains("[9, 9"));
        Ok(())
    }
}
