//! Collaborator traits.
//!
//! The loading core talks to the outside world through narrow seams so that
//! native dialogs, PDF rendering and image decoding can be swapped out (and
//! stubbed in tests). Storage has its own trait in [`store`](crate::store).
//!
//! ```text
//!  PathSelector ──▶ expand_selection ──▶ Pass A ──▶ AnnotationStore
//!                        │                              │
//!                  PdfRasterizer                        ▼
//!                                         Pass B ──▶ ImageProbe
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::models::{ImageMetadata, SelectionKind};

// ═══════════════════════════════════════════════════════════════════════
// Path selection
// ═══════════════════════════════════════════════════════════════════════

/// Source of user-chosen paths (a native picker, CLI arguments, ...).
#[async_trait]
pub trait PathSelector: Send + Sync {
    /// Absolute paths of the chosen files or folder, or `None` when the user
    /// cancelled.
    async fn select(&self, kind: SelectionKind) -> Option<Vec<PathBuf>>;
}

/// A selection decided up front, e.g. from command-line arguments.
#[derive(Debug, Clone)]
pub struct StaticSelection(Option<Vec<PathBuf>>);

impl StaticSelection {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self(Some(paths))
    }

    pub fn cancelled() -> Self {
        Self(None)
    }
}

#[async_trait]
impl PathSelector for StaticSelection {
    async fn select(&self, _kind: SelectionKind) -> Option<Vec<PathBuf>> {
        self.0.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// PDF rasterization
// ═══════════════════════════════════════════════════════════════════════

/// Turns a document into one image per page.
pub trait PdfRasterizer: Send + Sync {
    /// Ordered page image paths, at most `max_pages` of them, or `None` when
    /// the document cannot be read. Pages past the cap are dropped, not errors.
    fn rasterize(&self, pdf: &Path, max_pages: usize) -> Option<Vec<PathBuf>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Image probing
// ═══════════════════════════════════════════════════════════════════════

/// Readability checks and metadata extraction for image files.
///
/// Both methods do blocking file I/O; async callers run them on the blocking
/// pool.
pub trait ImageProbe: Send + Sync {
    fn is_readable_image(&self, path: &Path) -> bool;

    /// Dimensions, channel depth and a PNG thumbnail bounded by
    /// `max_width` x `max_height`.
    fn metadata(&self, path: &Path, max_width: u32, max_height: u32) -> Result<ImageMetadata>;
}
