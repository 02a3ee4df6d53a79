//! Adaptive foreground mask over the edge plane.
//!
//! A pixel is foreground iff its edge value exceeds the mean edge value of its
//! `(2 * MASK_RADIUS + 1)^2` neighbourhood minus `MASK_OFFSET`. Windows are
//! clipped at the image border and the mean is taken over the pixels actually
//! inside the window.
//!
//! Sums come from a `u64` integral image and the comparison is done in
//! integers (`(edge + offset) * count > sum`), so the result is exactly the
//! per-pixel rule with no floating-point drift.

use super::edges::EdgeImage;

pub const MASK_RADIUS: usize = 15;
pub const MASK_OFFSET: u64 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<bool>,
}

impl Mask {
    pub fn at(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }
}

/// Summed-area table with a zero row and column prepended.
struct Integral {
    stride: usize,
    sums: Vec<u64>,
}

impl Integral {
    fn new(edges: &EdgeImage) -> Self {
        let stride = edges.width + 1;
        let mut sums = vec![0u64; stride * (edges.height + 1)];
        for y in 0..edges.height {
            let mut row = 0u64;
            for x in 0..edges.width {
                row += edges.at(x, y) as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { stride, sums }
    }

    /// Sum over the inclusive rectangle `[x0, x1] x [y0, y1]`.
    fn window_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let s = self.stride;
        self.sums[(y1 + 1) * s + x1 + 1] + self.sums[y0 * s + x0]
            - self.sums[y0 * s + x1 + 1]
            - self.sums[(y1 + 1) * s + x0]
    }
}

pub fn adaptive_mask(edges: &EdgeImage) -> Mask {
    let (w, h) = (edges.width, edges.height);
    let mut data = vec![false; w * h];
    if w == 0 || h == 0 {
        return Mask {
            width: w,
            height: h,
            data,
        };
    }

    let integral = Integral::new(edges);
    for y in 0..h {
        let y0 = y.saturating_sub(MASK_RADIUS);
        let y1 = (y + MASK_RADIUS).min(h - 1);
        for x in 0..w {
            let x0 = x.saturating_sub(MASK_RADIUS);
            let x1 = (x + MASK_RADIUS).min(w - 1);
            let count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as u64;
            let sum = integral.window_sum(x0, y0, x1, y1);
            let edge = edges.at(x, y) as u64;
            data[y * w + x] = (edge + MASK_OFFSET) * count > sum;
        }
    }

    Mask {
        width: w,
        height: h,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Direct evaluation of the rule, one window at a time.
    fn naive_mask(edges: &EdgeImage) -> Mask {
        let (w, h) = (edges.width, edges.height);
        let mut data = vec![false; w * h];
        for y in 0..h {
            for x in 0..w {
                let mut sum = 0.0f64;
                let mut count = 0.0f64;
                for wy in y.saturating_sub(MASK_RADIUS)..=(y + MASK_RADIUS).min(h - 1) {
                    for wx in x.saturating_sub(MASK_RADIUS)..=(x + MASK_RADIUS).min(w - 1) {
                        sum += edges.at(wx, wy) as f64;
                        count += 1.0;
                    }
                }
                let mean = sum / count;
                data[y * w + x] = edges.at(x, y) as f64 > mean - MASK_OFFSET as f64;
            }
        }
        Mask {
            width: w,
            height: h,
            data,
        }
    }

    fn pseudo_random_edges(width: usize, height: usize, seed: u64) -> EdgeImage {
        let mut state = seed;
        let data = (0..width * height)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                // Sparse strong edges over a weak floor.
                let v = (state >> 33) as u8;
                if v > 200 {
                    v
                } else {
                    v / 16
                }
            })
            .collect();
        EdgeImage {
            width,
            height,
            data,
        }
    }

    #[test]
    fn integral_mask_matches_naive_rule() {
        for (w, h, seed) in [(64, 48, 1), (33, 70, 7), (5, 3, 42), (1, 1, 3)] {
            let edges = pseudo_random_edges(w, h, seed);
            assert_eq!(adaptive_mask(&edges), naive_mask(&edges), "{}x{}", w, h);
        }
    }

    #[test]
    fn flat_plane_is_entirely_foreground() {
        let edges = EdgeImage {
            width: 10,
            height: 10,
            data: vec![0; 100],
        };
        assert_eq!(adaptive_mask(&edges).foreground_count(), 100);
    }

    #[test]
    fn weak_pixel_next_to_strong_edges_is_background() {
        let mut data = vec![200u8; 9];
        data[4] = 0;
        let edges = EdgeImage {
            width: 3,
            height: 3,
            data,
        };
        let mask = adaptive_mask(&edges);
        assert!(!mask.at(1, 1));
        assert!(mask.at(0, 0));
    }
}
