//! Shared constants for half-sheet placement
//!
//! This module centralizes unit conversions and the policy numbers used by the
//! layout and render-budget calculations.

// =============================================================================
// Unit Conversion
// =============================================================================

/// Millimeters per inch
pub const MM_PER_INCH: f64 = 25.4;

/// Points per inch (PDF user space)
pub const POINTS_PER_INCH: f64 = 72.0;

/// Millimeters per point (1pt = 1/72 inch)
pub const MM_PER_POINT: f64 = MM_PER_INCH / POINTS_PER_INCH; // ≈ 0.352778

/// Convert points to millimeters
#[inline]
pub fn pt_to_mm(pt: f64) -> f64 {
    pt * MM_PER_POINT
}

/// Convert millimeters to device pixels at the given resolution
#[inline]
pub fn mm_to_px(mm: f64, dpi: f64) -> f64 {
    mm / MM_PER_INCH * dpi
}

// =============================================================================
// Sheet Sizes
// =============================================================================

/// A4 portrait (width, height) in millimeters
pub const A4_MM: (f64, f64) = (210.0, 297.0);

/// A5 portrait (width, height) in millimeters
pub const A5_MM: (f64, f64) = (148.0, 210.0);

/// Relative tolerance used when deciding whether a page is "A5-like"
pub const A5_TOLERANCE: f64 = 0.05;

// =============================================================================
// Auto-shrink Policy
// =============================================================================

/// Smallest scale auto-shrink may apply. Content overflows below this.
pub const MIN_SHRINK_SCALE: f64 = 0.90;

/// Content is never enlarged
pub const MAX_SCALE: f64 = 1.0;

// =============================================================================
// Render Budget
// =============================================================================

/// Lowest resolution the render budget will reduce a raster to
pub const MIN_RENDER_DPI: u32 = 150;

/// Highest resolution accepted for a print request
pub const MAX_REQUEST_DPI: u32 = 1200;

/// Default print resolution
pub const DEFAULT_PRINT_DPI: u32 = 300;

/// Default ceiling on raster pixel count (width × height)
pub const DEFAULT_MAX_PIXELS: u64 = 12_000_000;

// =============================================================================
// Calibration Sheet
// =============================================================================

/// Spacing of ruler ticks on the calibration sheet (mm)
pub const CALIBRATION_TICK_STEP_MM: u32 = 5;

/// Every n-th tick is a major (labelled) tick
pub const CALIBRATION_MAJOR_EVERY_MM: u32 = 10;
