//! Layout calculation modules for half-sheet printing
//!
//! This module handles all the geometric calculations for placing a source page
//! on the upper half of a printable area:
//! - Content placement (margins, safe gap, bounded auto-shrink)
//! - Render budget (raster resolution under a pixel ceiling)
//! - Calibration sheet guides

mod budget;
mod calibration;
mod placement;

pub use budget::*;
pub use calibration::*;
pub use placement::*;
