//! Calibration sheet geometry
//!
//! A calibration sheet lets the user check a printer's real printable area
//! against the template before printing a batch. All coordinates are in mm,
//! relative to the printable area's top-left corner.

use crate::constants::{CALIBRATION_MAJOR_EVERY_MM, CALIBRATION_TICK_STEP_MM};
use crate::types::{MmRect, PrintableArea};

use super::target_region;

/// A ruler tick along one edge of the printable area
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RulerTick {
    /// Position along the edge
    pub position_mm: f64,
    /// Major ticks are longer and carry a label
    pub major: bool,
}

/// Everything drawn on a calibration sheet
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSheet {
    /// Outline of the printable area
    pub bounds: MmRect,
    /// Ticks along the top edge
    pub top_ruler: Vec<RulerTick>,
    /// Ticks along the left edge
    pub left_ruler: Vec<RulerTick>,
    /// Horizontal midline of the printable area
    pub midline_mm: f64,
    /// Dashed line `safe_gap` above the midline
    pub safe_line_mm: f64,
    /// The region content is placed into
    pub content_box: MmRect,
    /// Caption printed near the bottom of the sheet
    pub caption: String,
}

impl CalibrationSheet {
    pub fn new(area: &PrintableArea, margin_mm: u32, safe_gap_mm: u32) -> Self {
        let margin = f64::from(margin_mm);
        let safe_gap = f64::from(safe_gap_mm);
        let midline = area.height_mm / 2.0;

        Self {
            bounds: MmRect::new(0.0, 0.0, area.width_mm.max(0.0), area.height_mm.max(0.0)),
            top_ruler: ruler(area.width_mm),
            left_ruler: ruler(area.height_mm),
            midline_mm: midline,
            safe_line_mm: midline - safe_gap,
            content_box: target_region(area.width_mm, area.height_mm, margin, safe_gap),
            caption: format!("Margin={margin_mm}mm  Safe={safe_gap_mm}mm"),
        }
    }
}

fn ruler(length_mm: f64) -> Vec<RulerTick> {
    if length_mm.is_nan() || length_mm < 0.0 {
        return Vec::new();
    }
    let whole_mm = length_mm.floor() as u32;
    (0..=whole_mm)
        .step_by(CALIBRATION_TICK_STEP_MM as usize)
        .map(|mm| RulerTick {
            position_mm: f64::from(mm),
            major: mm % CALIBRATION_MAJOR_EVERY_MM == 0,
        })
        .collect()
}
