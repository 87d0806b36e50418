//! Seams to the systems the batch controller drives but does not implement.
//!
//! Page geometry and rasterization are called from tokio's blocking pool, so
//! those providers must be `Send + Sync`. Printer capability and transmission
//! run on the printer host's dedicated thread and have no such bound.

use halfsheet_layout::{DocumentInfo, LayoutError, LayoutResult, PrintableArea, SourcePage};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// RGBA bitmap handed from the rasterizer to the print sink
pub type Raster = image::RgbaImage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("invalid document: {0}")]
    InvalidFormat(String),
    #[error("printer unavailable: {0}")]
    PrinterUnavailable(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("print failed: {0}")]
    Print(String),
    #[error("printer host stopped")]
    HostStopped,
}

impl From<LayoutError> for CollaboratorError {
    fn from(e: LayoutError) -> Self {
        match e {
            LayoutError::NotFound(path) => Self::NotFound(path),
            other => Self::InvalidFormat(other.to_string()),
        }
    }
}

/// Where on the physical sheet a raster goes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SheetPlacement {
    /// Left edge, from the sheet's left edge (printable origin + layout offset)
    pub offset_left_mm: f64,
    /// Top edge, from the sheet's top edge (printable origin + layout offset)
    pub offset_top_mm: f64,
    pub content_width_mm: f64,
    pub content_height_mm: f64,
    /// Resolution the raster was rendered at
    pub dpi: u32,
}

impl SheetPlacement {
    pub fn new(layout: &LayoutResult, area: &PrintableArea, dpi: u32) -> Self {
        Self {
            offset_left_mm: area.origin_x_mm + layout.offset_left_mm,
            offset_top_mm: area.origin_y_mm + layout.offset_top_mm,
            content_width_mm: layout.content_width_mm,
            content_height_mm: layout.content_height_mm,
            dpi,
        }
    }
}

pub trait PageSizeProvider: Send + Sync {
    /// Size of page `page_index` (0-based) in points
    fn page_size(&self, path: &Path, page_index: usize) -> Result<SourcePage, CollaboratorError>;

    fn page_count(&self, path: &Path) -> Result<usize, CollaboratorError>;

    /// Page size and page count together. Override when one read can answer both.
    fn document_info(
        &self,
        path: &Path,
        page_index: usize,
    ) -> Result<DocumentInfo, CollaboratorError> {
        Ok(DocumentInfo {
            page: self.page_size(path, page_index)?,
            page_count: self.page_count(path)?,
        })
    }
}

pub trait PrinterCapabilityProvider {
    /// Current printable area of `printer`. Queried for every job.
    fn printable_area(&mut self, printer: &str) -> Result<PrintableArea, CollaboratorError>;

    /// Names of the printers this provider can address
    fn printers(&mut self) -> Result<Vec<String>, CollaboratorError>;
}

pub trait PageRasterizer: Send + Sync {
    fn render(
        &self,
        path: &Path,
        page_index: usize,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Result<Raster, CollaboratorError>;
}

pub trait PrintSink {
    fn send(
        &mut self,
        raster: &Raster,
        placement: &SheetPlacement,
        printer: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Page sizes read from the PDF's MediaBox with lopdf
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfPageSizes;

impl PageSizeProvider for LopdfPageSizes {
    fn page_size(&self, path: &Path, page_index: usize) -> Result<SourcePage, CollaboratorError> {
        Ok(halfsheet_layout::read_page_size_blocking(path, page_index)?)
    }

    fn page_count(&self, path: &Path) -> Result<usize, CollaboratorError> {
        let doc = halfsheet_layout::load_pdf_blocking(path)?;
        Ok(halfsheet_layout::page_count(&doc))
    }

    fn document_info(
        &self,
        path: &Path,
        page_index: usize,
    ) -> Result<DocumentInfo, CollaboratorError> {
        Ok(halfsheet_layout::read_document_info_blocking(path, page_index)?)
    }
}
