//! Spool printer: writes each printed sheet to a PNG instead of a driver.
//!
//! Printer names and printable areas come from the profiles in settings.
//! Every sheet is composed onto a white A4 canvas at the placement's offsets.

use chrono::Local;
use halfsheet_layout::constants::{A4_MM, mm_to_px};
use halfsheet_layout::{CalibrationSheet, MmRect, PrintableArea};
use halfsheet_runtime::{
    CollaboratorError, PrintSink, PrinterCapabilityProvider, Raster, SheetPlacement,
};
use image::{Rgba, imageops};
use std::path::PathBuf;

use crate::settings::PrinterProfile;

/// Spooled sheets are never composed above this resolution
pub const SPOOL_MAX_DPI: u32 = 300;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const GUIDE: Rgba<u8> = Rgba([200, 30, 30, 255]);

/// Printer capabilities backed by settings profiles
#[derive(Debug, Clone)]
pub struct SpoolCapabilities {
    profiles: Vec<PrinterProfile>,
}

impl SpoolCapabilities {
    pub fn new(profiles: Vec<PrinterProfile>) -> Self {
        Self { profiles }
    }
}

impl PrinterCapabilityProvider for SpoolCapabilities {
    fn printable_area(&mut self, printer: &str) -> Result<PrintableArea, CollaboratorError> {
        self.profiles
            .iter()
            .find(|p| p.name == printer)
            .map(|p| p.printable_area)
            .ok_or_else(|| CollaboratorError::PrinterUnavailable(printer.to_string()))
    }

    fn printers(&mut self) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.profiles.iter().map(|p| p.name.clone()).collect())
    }
}

/// Writes one PNG per sheet into a directory
#[derive(Debug)]
pub struct SpoolSink {
    out_dir: PathBuf,
    sequence: u32,
}

impl SpoolSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            sequence: 0,
        }
    }

    fn next_path(&mut self, printer: &str) -> PathBuf {
        self.sequence += 1;
        let safe_name: String = printer
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.out_dir.join(format!(
            "{safe_name}-{}-{:03}.png",
            Local::now().format("%Y%m%d-%H%M%S"),
            self.sequence
        ))
    }
}

impl PrintSink for SpoolSink {
    fn send(
        &mut self,
        raster: &Raster,
        placement: &SheetPlacement,
        printer: &str,
    ) -> Result<(), CollaboratorError> {
        let sheet = compose_sheet(raster, placement);
        std::fs::create_dir_all(&self.out_dir)
            .map_err(|e| CollaboratorError::Print(format!("{}: {e}", self.out_dir.display())))?;
        let path = self.next_path(printer);
        sheet
            .save(&path)
            .map_err(|e| CollaboratorError::Print(format!("{}: {e}", path.display())))?;
        log::info!("Spooled sheet for '{printer}' to {}", path.display());
        Ok(())
    }
}

/// White A4 sheet with the raster scaled into the placement's rectangle
pub fn compose_sheet(raster: &Raster, placement: &SheetPlacement) -> Raster {
    let dpi = f64::from(placement.dpi.min(SPOOL_MAX_DPI));
    let px = |mm: f64| mm_to_px(mm, dpi).round().max(0.0);

    let (sheet_w, sheet_h) = A4_MM;
    let mut sheet = Raster::from_pixel(px(sheet_w).max(1.0) as u32, px(sheet_h).max(1.0) as u32, WHITE);

    let width = px(placement.content_width_mm).max(1.0) as u32;
    let height = px(placement.content_height_mm).max(1.0) as u32;
    let content = if raster.dimensions() == (width, height) {
        raster.clone()
    } else {
        imageops::resize(raster, width, height, imageops::FilterType::Triangle)
    };
    imageops::overlay(
        &mut sheet,
        &content,
        px(placement.offset_left_mm) as i64,
        px(placement.offset_top_mm) as i64,
    );
    sheet
}

/// Draw a calibration sheet covering the printable area at `dpi`.
///
/// The caption is not rasterized; callers print it alongside.
pub fn paint_calibration(sheet: &CalibrationSheet, dpi: u32) -> Raster {
    let dpi = f64::from(dpi);
    let px = |mm: f64| mm_to_px(mm, dpi).round().max(0.0) as u32;

    let width = px(sheet.bounds.width).max(1);
    let height = px(sheet.bounds.height).max(1);
    let mut canvas = Raster::from_pixel(width, height, WHITE);

    outline(&mut canvas, &sheet.bounds, px, INK);
    outline(&mut canvas, &sheet.content_box, px, GUIDE);

    let major_len = px(4.0);
    let minor_len = px(2.0);
    for tick in &sheet.top_ruler {
        let len = if tick.major { major_len } else { minor_len };
        vline(&mut canvas, px(tick.position_mm), 0, len, INK);
    }
    for tick in &sheet.left_ruler {
        let len = if tick.major { major_len } else { minor_len };
        hline(&mut canvas, 0, len, px(tick.position_mm), INK);
    }

    hline(&mut canvas, 0, width, px(sheet.midline_mm), INK);
    // 2mm dashes
    let dash = px(2.0).max(1);
    let safe_y = px(sheet.safe_line_mm);
    let mut x = 0;
    while x < width {
        hline(&mut canvas, x, (x + dash).min(width), safe_y, GUIDE);
        x += dash * 2;
    }
    canvas
}

fn outline(canvas: &mut Raster, rect: &MmRect, px: impl Fn(f64) -> u32, color: Rgba<u8>) {
    let (left, top) = (px(rect.left), px(rect.top));
    let (right, bottom) = (px(rect.right()), px(rect.bottom()));
    hline(canvas, left, right, top, color);
    hline(canvas, left, right, bottom.saturating_sub(1), color);
    vline(canvas, left, top, bottom, color);
    vline(canvas, right.saturating_sub(1), top, bottom, color);
}

fn hline(canvas: &mut Raster, x0: u32, x1: u32, y: u32, color: Rgba<u8>) {
    if y >= canvas.height() {
        return;
    }
    for x in x0..x1.min(canvas.width()) {
        canvas.put_pixel(x, y, color);
    }
}

fn vline(canvas: &mut Raster, x: u32, y0: u32, y1: u32, color: Rgba<u8>) {
    if x >= canvas.width() {
        return;
    }
    for y in y0..y1.min(canvas.height()) {
        canvas.put_pixel(x, y, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    /// Spool files in `dir`, oldest first
    fn spooled_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn placement(dpi: u32) -> SheetPlacement {
        SheetPlacement {
            offset_left_mm: 25.4,
            offset_top_mm: 50.8,
            content_width_mm: 25.4,
            content_height_mm: 25.4,
            dpi,
        }
    }

    #[test]
    fn test_compose_places_raster_at_offset() {
        let raster = Raster::from_pixel(150, 150, INK);
        let sheet = compose_sheet(&raster, &placement(150));

        assert_eq!(sheet.dimensions(), (1240, 1754));
        assert_eq!(*sheet.get_pixel(150, 300), INK);
        assert_eq!(*sheet.get_pixel(299, 449), INK);
        assert_eq!(*sheet.get_pixel(149, 300), WHITE);
        assert_eq!(*sheet.get_pixel(300, 450), WHITE);
    }

    #[test]
    fn test_compose_caps_resolution() {
        let raster = Raster::from_pixel(600, 600, INK);
        let sheet = compose_sheet(&raster, &placement(600));
        assert_eq!(sheet.dimensions(), (2480, 3508));
    }

    #[test]
    fn test_unknown_printer_is_unavailable() {
        let mut caps = SpoolCapabilities::new(vec![PrinterProfile::spool()]);
        assert!(caps.printable_area("spool").is_ok());
        assert_eq!(
            caps.printable_area("lab"),
            Err(CollaboratorError::PrinterUnavailable("lab".to_string()))
        );
        assert_eq!(caps.printers().unwrap(), vec!["spool".to_string()]);
    }

    #[test]
    fn test_sink_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SpoolSink::new(dir.path().join("out"));
        sink.send(&Raster::new(10, 10), &placement(150), "Office 1")
            .unwrap();

        let files = spooled_files(&dir.path().join("out")).unwrap();
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("Office_1-"));
        assert!(name.ends_with("-001.png"));
    }

    #[test]
    fn test_calibration_draws_midline() {
        let area = PrintableArea::new(50.8, 50.8, 0.0, 0.0);
        let sheet = CalibrationSheet::new(&area, 3, 5);
        let canvas = paint_calibration(&sheet, 100);

        assert_eq!(canvas.dimensions(), (200, 200));
        // Midline at 25.4mm = 100px, away from ruler ticks and box edges
        assert_eq!(*canvas.get_pixel(120, 100), INK);
        assert_eq!(*canvas.get_pixel(120, 90), WHITE);
    }
}
