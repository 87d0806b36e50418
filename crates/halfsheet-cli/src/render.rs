use halfsheet_runtime::{CollaboratorError, PageRasterizer, Raster};
use std::path::Path;

#[cfg(feature = "pdfium")]
use pdfium_render::prelude::*;

/// Initialize Pdfium, trying the vendored library first, then falling back to system
#[cfg(feature = "pdfium")]
pub fn init_pdfium() -> Result<Pdfium, PdfiumError> {
    let vendor_path = std::env::current_dir().ok().and_then(|mut p| {
        p.push("vendor/pdfium/lib");
        if p.exists() { Some(p) } else { None }
    });

    if let Some(vendor_path) = vendor_path {
        if let Ok(binding) =
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&vendor_path))
        {
            return Ok(Pdfium::new(binding));
        }
    }

    Pdfium::bind_to_system_library().map(Pdfium::new)
}

/// Rasterizes pages with Pdfium.
///
/// Pdfium handles are not thread-safe, so each render binds its own.
#[cfg(feature = "pdfium")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfiumRasterizer;

#[cfg(feature = "pdfium")]
impl PageRasterizer for PdfiumRasterizer {
    fn render(
        &self,
        path: &Path,
        page_index: usize,
        pixel_width: u32,
        pixel_height: u32,
    ) -> Result<Raster, CollaboratorError> {
        let render_err = |e: PdfiumError| CollaboratorError::Render(e.to_string());

        let pdfium = init_pdfium().map_err(render_err)?;
        let document = pdfium.load_pdf_from_file(path, None).map_err(render_err)?;
        let index = u16::try_from(page_index)
            .map_err(|_| CollaboratorError::Render(format!("page {page_index} out of range")))?;
        let page = document.pages().get(index).map_err(render_err)?;

        let config = PdfRenderConfig::new()
            .set_target_width(to_pixels(pixel_width))
            .set_maximum_height(to_pixels(pixel_height));
        let bitmap = page.render_with_config(&config).map_err(render_err)?;

        let width = bitmap.width() as u32;
        let height = bitmap.height() as u32;
        Raster::from_raw(width, height, bitmap.as_rgba_bytes().to_vec()).ok_or_else(|| {
            CollaboratorError::Render(format!("bitmap of {width}×{height} has the wrong length"))
        })
    }
}

#[cfg(feature = "pdfium")]
fn to_pixels(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Stand-in used when the binary is built without Pdfium
#[cfg(not(feature = "pdfium"))]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableRasterizer;

#[cfg(not(feature = "pdfium"))]
impl PageRasterizer for UnavailableRasterizer {
    fn render(
        &self,
        _path: &Path,
        _page_index: usize,
        _pixel_width: u32,
        _pixel_height: u32,
    ) -> Result<Raster, CollaboratorError> {
        Err(CollaboratorError::Render(
            "built without the pdfium feature".to_string(),
        ))
    }
}

/// The rasterizer this build supports
pub fn default_rasterizer() -> std::sync::Arc<dyn PageRasterizer> {
    #[cfg(feature = "pdfium")]
    {
        std::sync::Arc::new(PdfiumRasterizer)
    }
    #[cfg(not(feature = "pdfium"))]
    {
        std::sync::Arc::new(UnavailableRasterizer)
    }
}
