//! Frame sources.
//!
//! - `stub://<name>`: synthetic panning scene, no camera required
//! - local image file or directory (feature: ingest-image)
//!
//! Sources hand out validated RGBA `Frame`s with monotonically increasing
//! frame ids. Frames are never written to disk or logged.

pub mod file;
mod normalize;

pub use file::{FileConfig, FileSource, FileStats};
pub use normalize::{normalize_to_rgba, PixelFormat};
