//! Page rendering via Google PDFium.
//!
//! `PdfiumRenderer` is `Send + Sync` and holds no library handle: the
//! upstream `Pdfium` type is `!Send`, so each call binds the library again.
//! The OS caches the `dlopen`, so repeat binds are near-free.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageOutputFormat;
use pdfium_render::prelude::*;

use super::{ExtractionError, PageRenderer};

/// Upper bound on either side of a rendered page.
const MAX_DIMENSION_PX: u32 = 4096;

const POINTS_PER_INCH: f32 = 72.0;

/// Renders PDF pages to PNG files with PDFium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    dpi: u32,
}

impl PdfiumRenderer {
    /// Create a renderer, failing fast if the PDFium library cannot be bound.
    ///
    /// Discovery order:
    /// 1. `PDFIUM_DYNAMIC_LIB_PATH` (explicit path to the library file)
    /// 2. Alongside the running executable, or its `lib/` sibling
    /// 3. System library search paths
    pub fn new(dpi: u32) -> Result<Self, ExtractionError> {
        let _ = load_pdfium()?;
        Ok(Self { dpi })
    }
}

fn load_pdfium() -> Result<Pdfium, ExtractionError> {
    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        tracing::debug!(path = %path, "Loading PDFium from env var");
        let bindings =
            Pdfium::bind_to_library(&path).map_err(|e| ExtractionError::PdfRendering {
                page: 0,
                reason: format!("Failed to load PDFium from {path}: {e}"),
            })?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let candidates = [
                exe_dir.to_path_buf(),
                exe_dir.join("lib"),
                exe_dir.join("..").join("lib"),
            ];
            for dir in &candidates {
                let lib_path =
                    Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
                if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                    tracing::debug!(dir = %dir.display(), "Loaded PDFium next to executable");
                    return Ok(Pdfium::new(bindings));
                }
            }
        }
    }

    let bindings =
        Pdfium::bind_to_system_library().map_err(|e| ExtractionError::PdfRendering {
            page: 0,
            reason: format!(
                "PDFium library not found. Set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}"
            ),
        })?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(e: PdfiumError) -> ExtractionError {
    let msg = e.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfRendering {
            page: 0,
            reason: format!("Failed to load PDF: {msg}"),
        }
    }
}

/// Pixel size for a page at `dpi`, both sides clamped to
/// `[1, MAX_DIMENSION_PX]` with the aspect ratio kept.
fn compute_render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let max_dim = raw_w.max(raw_h);
    if max_dim > MAX_DIMENSION_PX as f32 {
        let ratio = MAX_DIMENSION_PX as f32 / max_dim;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

fn encode_png(bitmap: &PdfBitmap, page: usize) -> Result<Vec<u8>, ExtractionError> {
    let mut cursor = Cursor::new(Vec::new());
    bitmap
        .as_image()
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| {
            ExtractionError::ImageProcessing(format!("PNG encoding of page {page} failed: {e}"))
        })?;
    Ok(cursor.into_inner())
}

impl PageRenderer for PdfiumRenderer {
    fn render_pages(
        &self,
        pdf: &Path,
        out_dir: &Path,
        max_pages: usize,
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        std::fs::create_dir_all(out_dir)?;
        let bytes = std::fs::read(pdf)?;

        let pdfium = load_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&bytes, None)
            .map_err(map_load_error)?;

        let mut images = Vec::new();
        for (index, page) in document.pages().iter().take(max_pages).enumerate() {
            let number = index + 1;
            let (width, height) =
                compute_render_dimensions(page.width().value, page.height().value, self.dpi);
            let config = PdfRenderConfig::new()
                .set_target_width(width as i32)
                .set_maximum_height(height as i32);

            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| ExtractionError::PdfRendering {
                    page: number,
                    reason: e.to_string(),
                })?;

            let path = out_dir.join(format!("page-{number}.png"));
            std::fs::write(&path, encode_png(&bitmap, number)?)?;
            images.push(path);
        }

        if images.is_empty() {
            return Err(ExtractionError::PdfParsing(format!(
                "no pages rendered from {}",
                pdf.display()
            )));
        }
        tracing::debug!(
            pdf = %pdf.display(),
            pages = images.len(),
            dpi = self.dpi,
            "Pages rendered"
        );
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_at_300dpi() {
        let (w, h) = compute_render_dimensions(595.0, 842.0, 300);
        assert!(w > 2400 && w < 2550, "A4 width at 300dpi: got {w}");
        assert!(h > 3450 && h < 3600, "A4 height at 300dpi: got {h}");
    }

    #[test]
    fn legal_at_200dpi() {
        // US Legal = 612 x 1008 points
        let (w, h) = compute_render_dimensions(612.0, 1008.0, 200);
        assert!(w > 1650 && w < 1750, "Legal width at 200dpi: got {w}");
        assert!(h > 2750 && h < 2850, "Legal height at 200dpi: got {h}");
    }

    #[test]
    fn oversized_page_capped_with_aspect_ratio() {
        let (w, h) = compute_render_dimensions(5000.0, 10000.0, 300);
        assert!(w <= MAX_DIMENSION_PX && h <= MAX_DIMENSION_PX);
        let ratio = h as f32 / w as f32;
        assert!((ratio - 2.0).abs() < 0.15, "Aspect ratio should be ~2:1, got {ratio}");
    }

    #[test]
    fn zero_points_clamped_to_one() {
        assert_eq!(compute_render_dimensions(0.0, 0.0, 300), (1, 1));
    }
}
