use std::path::PathBuf;
use thiserror::Error;

use crate::constants::{A5_MM, pt_to_mm};

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("not a readable PDF document: {0}")]
    InvalidFormat(String),
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serde")]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, LayoutError>;

/// Standard paper sizes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaperSize {
    A4,
    A5,
    Custom { width_mm: f64, height_mm: f64 },
}

impl PaperSize {
    /// Get base dimensions (always portrait for the standard sizes)
    pub fn dimensions_mm(self) -> (f64, f64) {
        match self {
            PaperSize::A4 => (210.0, 297.0),
            PaperSize::A5 => A5_MM,
            PaperSize::Custom {
                width_mm,
                height_mm,
            } => (width_mm, height_mm),
        }
    }
}

/// Size of the source document's first page, in points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourcePage {
    pub width_pt: f64,
    pub height_pt: f64,
}

impl SourcePage {
    pub fn new(width_pt: f64, height_pt: f64) -> Self {
        Self {
            width_pt,
            height_pt,
        }
    }

    /// Page size converted to millimeters (width, height)
    pub fn size_mm(&self) -> (f64, f64) {
        (pt_to_mm(self.width_pt), pt_to_mm(self.height_pt))
    }

    /// Whether the page is within `tolerance` (relative) of A5 in either orientation
    pub fn is_a5_like(&self, tolerance: f64) -> bool {
        let (w, h) = self.size_mm();
        let (a5_w, a5_h) = A5_MM;
        let upright = nearly(w, a5_w, tolerance) && nearly(h, a5_h, tolerance);
        let rotated = nearly(w, a5_h, tolerance) && nearly(h, a5_w, tolerance);
        upright || rotated
    }
}

fn nearly(value: f64, target: f64, tolerance: f64) -> bool {
    if target == 0.0 {
        return value.abs() < 1e-6;
    }
    (value - target).abs() / target <= tolerance
}

/// What a print job learns about its source document
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentInfo {
    /// The page being placed
    pub page: SourcePage,
    pub page_count: usize,
}

/// The region of a sheet a printer can mark, reported by the driver.
///
/// Origin is the offset of the printable region from the physical sheet's
/// top-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "PascalCase"))]
pub struct PrintableArea {
    pub width_mm: f64,
    pub height_mm: f64,
    pub origin_x_mm: f64,
    pub origin_y_mm: f64,
}

impl PrintableArea {
    pub fn new(width_mm: f64, height_mm: f64, origin_x_mm: f64, origin_y_mm: f64) -> Self {
        Self {
            width_mm,
            height_mm,
            origin_x_mm,
            origin_y_mm,
        }
    }

    /// Sheet inset by the same hardware margin on every side
    pub fn inset(paper: PaperSize, hardware_margin_mm: f64) -> Self {
        let (w, h) = paper.dimensions_mm();
        Self::new(
            (w - 2.0 * hardware_margin_mm).max(0.0),
            (h - 2.0 * hardware_margin_mm).max(0.0),
            hardware_margin_mm,
            hardware_margin_mm,
        )
    }
}

/// A rectangle in millimeters, anchored at its top-left corner
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MmRect {
    /// Distance from the reference left edge
    pub left: f64,
    /// Distance from the reference top edge
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl MmRect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Right edge
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    /// Bottom edge
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}
