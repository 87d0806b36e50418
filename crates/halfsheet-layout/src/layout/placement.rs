//! Content placement on the upper half of a sheet
//!
//! The placement is anchored at the top-left of the printable area, inset by
//! the template margin. The target region stops `safe_gap_mm` above the
//! horizontal midline so content does not bleed into the lower half.
//!
//! Scaling rules:
//! - A page that fits at 1:1 is never enlarged
//! - With auto-shrink, an oversized page is reduced proportionally, but never
//!   below [`MIN_SHRINK_SCALE`]; below that the content is allowed to overflow
//! - Without auto-shrink the page stays at 1:1 and the caller checks
//!   [`LayoutResult::overflow`]

use crate::constants::{MAX_SCALE, MIN_SHRINK_SCALE, pt_to_mm};
use crate::template::Template;
use crate::types::{MmRect, PrintableArea, SourcePage};

/// Overshoot below this is floating-point noise, not overflow
const OVERFLOW_EPSILON_MM: f64 = 1e-6;

/// Scale and position of the source page inside the printable area
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutResult {
    /// Scale relative to 1:1, in `[MIN_SHRINK_SCALE, 1.0]`
    pub scale: f64,
    /// Left offset from the printable area's left edge
    pub offset_left_mm: f64,
    /// Top offset from the printable area's top edge
    pub offset_top_mm: f64,
    /// Width of the placed content (page width × scale)
    pub content_width_mm: f64,
    /// Height of the placed content (page height × scale)
    pub content_height_mm: f64,
}

/// How far placed content extends past the safe region
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overflow {
    /// Past the right margin (0 when within bounds)
    pub horizontal_mm: f64,
    /// Past the safe line above the midline (0 when within bounds)
    pub vertical_mm: f64,
}

impl LayoutResult {
    /// Content rectangle relative to the printable area
    pub fn content_rect(&self) -> MmRect {
        MmRect::new(
            self.offset_left_mm,
            self.offset_top_mm,
            self.content_width_mm,
            self.content_height_mm,
        )
    }

    /// Check the placed content against the safe region.
    ///
    /// Returns `None` when the content stays inside the right margin and above
    /// the safe line at `printable_height / 2 - safe_gap`.
    pub fn overflow(
        &self,
        printable_width_mm: f64,
        printable_height_mm: f64,
        margin_mm: f64,
        safe_gap_mm: f64,
    ) -> Option<Overflow> {
        let safe_bottom = printable_height_mm / 2.0 - safe_gap_mm;
        let safe_right = printable_width_mm - margin_mm;

        let vertical = (self.offset_top_mm + self.content_height_mm - safe_bottom).max(0.0);
        let horizontal = (self.offset_left_mm + self.content_width_mm - safe_right).max(0.0);

        if vertical > OVERFLOW_EPSILON_MM || horizontal > OVERFLOW_EPSILON_MM {
            Some(Overflow {
                horizontal_mm: horizontal,
                vertical_mm: vertical,
            })
        } else {
            None
        }
    }
}

/// Target rectangle on the upper half, relative to the printable area.
///
/// Dimensions collapse to 0 for degenerate inputs instead of going negative.
pub fn target_region(
    printable_width_mm: f64,
    printable_height_mm: f64,
    margin_mm: f64,
    safe_gap_mm: f64,
) -> MmRect {
    let width = (printable_width_mm - margin_mm * 2.0).max(0.0);
    let height = (printable_height_mm / 2.0 - safe_gap_mm - margin_mm).max(0.0);
    MmRect::new(margin_mm, margin_mm, width, height)
}

/// Compute scale and offset for placing a page on the top half of a sheet.
///
/// # Arguments
/// * `page_width_pt` / `page_height_pt` - Source page size in points
/// * `printable_width_mm` / `printable_height_mm` - Printer's printable area
/// * `margin_mm` - Inset from the printable area's edges
/// * `safe_gap_mm` - Clearance kept above the horizontal midline
/// * `auto_shrink` - Allow proportional reduction down to 90%
pub fn compute_top_half_placement(
    page_width_pt: f64,
    page_height_pt: f64,
    printable_width_mm: f64,
    printable_height_mm: f64,
    margin_mm: f64,
    safe_gap_mm: f64,
    auto_shrink: bool,
) -> LayoutResult {
    let page_w = pt_to_mm(page_width_pt);
    let page_h = pt_to_mm(page_height_pt);

    let target = target_region(
        printable_width_mm,
        printable_height_mm,
        margin_mm,
        safe_gap_mm,
    );

    let fits = page_w <= target.width && page_h <= target.height;
    let scale = if !fits && auto_shrink {
        shrink_scale(page_w, page_h, target.width, target.height)
    } else {
        MAX_SCALE
    };

    LayoutResult {
        scale,
        offset_left_mm: margin_mm,
        offset_top_mm: margin_mm,
        content_width_mm: page_w * scale,
        content_height_mm: page_h * scale,
    }
}

/// Place a page using a template's margin, safe gap and shrink policy
pub fn place_for_template(
    page: SourcePage,
    area: &PrintableArea,
    template: &Template,
) -> LayoutResult {
    compute_top_half_placement(
        page.width_pt,
        page.height_pt,
        area.width_mm,
        area.height_mm,
        f64::from(template.margin_mm),
        f64::from(template.safe_gap_mm),
        template.auto_shrink,
    )
}

/// Proportional fit ratio, bounded to the auto-shrink range
fn shrink_scale(page_w: f64, page_h: f64, target_w: f64, target_h: f64) -> f64 {
    let scale_w = target_w / page_w;
    let scale_h = target_h / page_h;
    let ratio = scale_w.min(scale_h);
    if ratio.is_nan() {
        return MAX_SCALE;
    }
    ratio.clamp(MIN_SHRINK_SCALE, MAX_SCALE)
}
