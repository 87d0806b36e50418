//! Raster resolution under a pixel ceiling
//!
//! Rendering a page at print resolution can allocate a very large bitmap. The
//! render budget lowers the resolution proportionally when the pixel count at
//! the requested DPI exceeds the ceiling, trading sharpness for a raster the
//! driver will accept.

use crate::constants::{DEFAULT_MAX_PIXELS, MIN_RENDER_DPI, mm_to_px};

/// Pixel ceiling and resolution floor for rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBudget {
    /// Maximum raster area (width × height) in pixels
    pub max_pixels: u64,
    /// Resolution never reduced below this
    pub min_dpi: u32,
}

impl Default for RenderBudget {
    fn default() -> Self {
        Self {
            max_pixels: DEFAULT_MAX_PIXELS,
            min_dpi: MIN_RENDER_DPI,
        }
    }
}

impl RenderBudget {
    pub fn new(max_pixels: u64) -> Self {
        Self {
            max_pixels,
            ..Default::default()
        }
    }

    /// Resolution to render content of the given size at.
    ///
    /// `requested_dpi` is returned unchanged when it fits the ceiling.
    pub fn effective_dpi(&self, content_width_mm: f64, content_height_mm: f64, requested_dpi: u32) -> u32 {
        let dpi = f64::from(requested_dpi);
        let pixels = mm_to_px(content_width_mm, dpi) * mm_to_px(content_height_mm, dpi);
        let max_pixels = self.max_pixels as f64;

        if pixels.is_nan() || pixels <= max_pixels {
            return requested_dpi;
        }

        let reduced = (dpi * (max_pixels / pixels).sqrt()).floor();
        let reduced = if reduced.is_finite() && reduced > 0.0 {
            reduced as u32
        } else {
            0
        };
        reduced.max(self.min_dpi)
    }
}

/// Cap `requested_dpi` so the content raster stays under `max_pixels`,
/// never going below [`MIN_RENDER_DPI`].
pub fn cap_resolution(
    content_width_mm: f64,
    content_height_mm: f64,
    requested_dpi: u32,
    max_pixels: u64,
) -> u32 {
    RenderBudget::new(max_pixels).effective_dpi(content_width_mm, content_height_mm, requested_dpi)
}

/// Raster dimensions (width, height) for content rendered at `dpi`.
///
/// Rounded to the nearest pixel, never smaller than 1×1.
pub fn pixel_size(content_width_mm: f64, content_height_mm: f64, dpi: u32) -> (u32, u32) {
    let dpi = f64::from(dpi);
    let to_px = |mm: f64| {
        let px = mm_to_px(mm, dpi).round();
        if px.is_finite() && px >= 1.0 {
            px.min(f64::from(u32::MAX)) as u32
        } else {
            1
        }
    };
    (to_px(content_width_mm), to_px(content_height_mm))
}
