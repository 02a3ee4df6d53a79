//! Luma conversion and Sobel edge magnitude.

use crate::frame::Frame;

/// Single-channel luma plane.
#[derive(Clone, Debug, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

/// Edge magnitude plane, one byte per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl EdgeImage {
    pub fn at(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }
}

/// `0.299 R + 0.587 G + 0.114 B` per pixel; alpha is ignored.
pub fn grayscale(frame: &Frame) -> GrayImage {
    let data = frame
        .pixels()
        .chunks_exact(4)
        .map(|px| 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
        .collect();
    GrayImage {
        width: frame.width as usize,
        height: frame.height as usize,
        data,
    }
}

/// 3x3 Sobel magnitude, `min(255, sqrt(gx^2 + gy^2))` rounded to a byte.
///
/// The one-pixel border is left at zero.
pub fn sobel_magnitude(gray: &GrayImage) -> EdgeImage {
    let (w, h) = (gray.width, gray.height);
    let mut data = vec![0u8; w * h];
    if w < 3 || h < 3 {
        return EdgeImage {
            width: w,
            height: h,
            data,
        };
    }

    let p = |x: usize, y: usize| gray.data[y * w + x];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = (p(x + 1, y - 1) + 2.0 * p(x + 1, y) + p(x + 1, y + 1))
                - (p(x - 1, y - 1) + 2.0 * p(x - 1, y) + p(x - 1, y + 1));
            let gy = (p(x - 1, y + 1) + 2.0 * p(x, y + 1) + p(x + 1, y + 1))
                - (p(x - 1, y - 1) + 2.0 * p(x, y - 1) + p(x + 1, y - 1));
            let magnitude = (gx * gx + gy * gy).sqrt().min(255.0);
            data[y * w + x] = magnitude.round() as u8;
        }
    }

    EdgeImage {
        width: w,
        height: h,
        data,
    }
}
