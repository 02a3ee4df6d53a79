//! Local frame source.
//!
//! `FileSource` reads frames from the local machine only:
//! - `stub://<name>`: synthetic scene rendered in memory
//! - a still image or a directory of stills (feature: ingest-image)
//!
//! Remote URLs are rejected.

use anyhow::{anyhow, Result};

use super::normalize::{normalize_to_rgba, PixelFormat};
use crate::frame::Frame;

/// Configuration for a local frame source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// `stub://<name>`, or a local image path / directory.
    pub path: String,
    /// Synthetic frame size. Decoded images keep their own size.
    pub width: u32,
    pub height: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: "stub://shelf".to_string(),
            width: 640,
            height: 480,
        }
    }
}

pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-image")]
    Image(ImageSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "frame sources only support local paths (no URL schemes)"
            ));
        }
        if config.path.starts_with("stub://") {
            Ok(Self {
                backend: FileBackend::Synthetic(SyntheticSource::new(config)?),
            })
        } else {
            #[cfg(feature = "ingest-image")]
            {
                Ok(Self {
                    backend: FileBackend::Image(ImageSource::new(config)?),
                })
            }
            #[cfg(not(feature = "ingest-image"))]
            {
                Err(anyhow!("image sources require the ingest-image feature"))
            }
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(source) => source.connect(),
        }
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            FileBackend::Synthetic(_) => true,
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-image")]
            FileBackend::Image(source) => source.stats(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_captured: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

const BACKGROUND: u8 = 20;
const FOREGROUND: u8 = 230;
const OBJECT_SIZE: u32 = 60;
const OBJECT_SPACING: u32 = 140;
const PAN_STEP: u32 = 4;

/// Bright discs (or squares, for `stub://...box...`) on a dark background,
/// panning right by `PAN_STEP` pixels per frame.
struct SyntheticSource {
    config: FileConfig,
    boxes: bool,
    frame_count: u64,
}

impl SyntheticSource {
    fn new(config: FileConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!("synthetic source needs a non-zero frame size"));
        }
        let boxes = config.path.contains("box");
        Ok(Self {
            config,
            boxes,
            frame_count: 0,
        })
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("FileSource: connected to {} (synthetic)", self.config.path);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let (width, height) = (self.config.width, self.config.height);
        let rgba = normalize_to_rgba(&self.render(), width, height, PixelFormat::Rgb24)?;
        Frame::from_rgba(
            rgba,
            width,
            height,
            self.frame_count,
            crate::now_ms(),
        )
    }

    /// Packed RGB24, as a camera would deliver it.
    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let mut pixels = vec![BACKGROUND; w as usize * h as usize * 3];

        let period = u64::from(w + OBJECT_SPACING);
        let shift = ((self.frame_count * u64::from(PAN_STEP)) % period) as i64;
        let radius = i64::from(OBJECT_SIZE / 2);
        let cy = i64::from(h / 2);
        let mut cx = shift - i64::from(OBJECT_SPACING);
        while cx < i64::from(w) + radius {
            self.stamp(&mut pixels, cx, cy, radius);
            cx += i64::from(OBJECT_SPACING);
        }
        pixels
    }

    fn stamp(&self, pixels: &mut [u8], cx: i64, cy: i64, radius: i64) {
        let (w, h) = (i64::from(self.config.width), i64::from(self.config.height));
        for y in (cy - radius).max(0)..(cy + radius).min(h) {
            for x in (cx - radius).max(0)..(cx + radius).min(w) {
                let (dx, dy) = (x - cx, y - cy);
                if !self.boxes && dx * dx + dy * dy > radius * radius {
                    continue;
                }
                let offset = ((y * w + x) * 3) as usize;
                pixels[offset..offset + 3].fill(FOREGROUND);
            }
        }
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Still images (feature: ingest-image)
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-image")]
struct ImageSource {
    config: FileConfig,
    files: Vec<std::path::PathBuf>,
    next_index: usize,
    frame_count: u64,
    healthy: bool,
}

#[cfg(feature = "ingest-image")]
impl ImageSource {
    fn new(config: FileConfig) -> Result<Self> {
        Ok(Self {
            config,
            files: Vec::new(),
            next_index: 0,
            frame_count: 0,
            healthy: false,
        })
    }

    fn connect(&mut self) -> Result<()> {
        let root = std::path::Path::new(&self.config.path);
        let mut files = if root.is_dir() {
            std::fs::read_dir(root)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image_path(p))
                .collect::<Vec<_>>()
        } else if root.is_file() {
            vec![root.to_path_buf()]
        } else {
            return Err(anyhow!("image source not found: {}", self.config.path));
        };
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no images under {}", self.config.path));
        }
        log::info!(
            "FileSource: connected to {} ({} images)",
            self.config.path,
            files.len()
        );
        self.files = files;
        self.healthy = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.files.is_empty() {
            return Err(anyhow!("image source not connected"));
        }
        let path = &self.files[self.next_index % self.files.len()];
        self.next_index = (self.next_index + 1) % self.files.len();
        let decoded = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                self.healthy = false;
                return Err(anyhow!("failed to decode {}: {}", path.display(), e));
            }
        };
        self.healthy = true;
        self.frame_count += 1;
        let (width, height) = decoded.dimensions();
        let rgba = normalize_to_rgba(decoded.as_raw(), width, height, PixelFormat::Rgb24)?;
        Frame::from_rgba(
            rgba,
            width,
            height,
            self.frame_count,
            crate::now_ms(),
        )
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_captured: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

#[cfg(feature = "ingest-image")]
fn is_image_path(path: &std::path::Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("png" | "jpg" | "jpeg")
    )
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with("stub://") {
        return true;
    }
    !path.contains("://")
}
