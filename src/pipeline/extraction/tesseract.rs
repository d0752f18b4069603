use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use super::{run_tool, ExtractionError, PageRenderer, TextExtractor};

/// Tesseract CLI over pages rasterised by a [`PageRenderer`].
pub struct TesseractOcr {
    renderer: Arc<dyn PageRenderer>,
    lang: String,
    oem: u8,
    psm: u8,
    max_pages: usize,
}

impl TesseractOcr {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        lang: &str,
        oem: u8,
        psm: u8,
        max_pages: usize,
    ) -> Self {
        Self {
            renderer,
            lang: lang.to_string(),
            oem,
            psm,
            max_pages,
        }
    }

    fn ocr_image(&self, image: &Path) -> Result<String, ExtractionError> {
        let stdout = run_tool(
            "tesseract",
            Command::new("tesseract")
                .arg(image)
                .arg("stdout")
                .args(["-l", self.lang.as_str()])
                .args(["--oem", self.oem.to_string().as_str()])
                .args(["--psm", self.psm.to_string().as_str()]),
        )?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}

impl TextExtractor for TesseractOcr {
    fn extract_text(&self, pdf: &Path) -> Result<String, ExtractionError> {
        let scratch = tempfile::tempdir()?;
        let pages = self
            .renderer
            .render_pages(pdf, scratch.path(), self.max_pages)?;

        let mut text = Vec::with_capacity(pages.len());
        for (index, page) in pages.iter().enumerate() {
            match self.ocr_image(page) {
                Ok(t) if !t.trim().is_empty() => text.push(t),
                Ok(_) => tracing::debug!(page = index + 1, "No text on page"),
                Err(e @ ExtractionError::ToolMissing(_)) => return Err(e),
                Err(e) => tracing::warn!(page = index + 1, error = %e, "Page OCR failed"),
            }
        }

        if text.is_empty() {
            return Err(ExtractionError::OcrProcessing(format!(
                "no text recognised in {} page(s)",
                pages.len()
            )));
        }
        Ok(text.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct NoPages;

    impl PageRenderer for NoPages {
        fn render_pages(
            &self,
            pdf: &Path,
            _out_dir: &Path,
            _max_pages: usize,
        ) -> Result<Vec<PathBuf>, ExtractionError> {
            Err(ExtractionError::PdfParsing(format!("{} is not a PDF", pdf.display())))
        }
    }

    #[test]
    fn render_failure_propagates() {
        let ocr = TesseractOcr::new(Arc::new(NoPages), "eng+kan", 1, 4, 25);
        let err = ocr.extract_text(Path::new("/tmp/broken.pdf")).unwrap_err();
        assert!(matches!(err, ExtractionError::PdfParsing(_)));
    }
}
