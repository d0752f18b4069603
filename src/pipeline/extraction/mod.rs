//! Text acquisition from scanned deeds.
//!
//! Three capabilities, each behind a trait so stages can be tested with mocks:
//! - [`TextExtractor`]: whole-document OCR text
//! - [`PageTextSource`]: embedded text layer, one string per page
//! - [`PageRenderer`]: rasterise pages to image files

pub mod fee;
pub mod pdf;
pub mod pdfium;
pub mod tesseract;

pub use fee::*;
pub use pdf::*;
pub use pdfium::*;
pub use tesseract::*;

use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("External tool not found: {0}")]
    ToolMissing(String),

    #[error("{tool} exited with status {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: i32,
        stderr: String,
    },

    #[error("PDF parsing failed: {0}")]
    PdfParsing(String),

    #[error("PDF is password-protected")]
    PdfEncrypted,

    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("Image processing failed: {0}")]
    ImageProcessing(String),

    #[error("OCR processing failed: {0}")]
    OcrProcessing(String),
}

/// Where stage 1 takes the document text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrEngine {
    /// Render with PDFium, recognise with Tesseract.
    Tesseract,
    /// Embedded text layer only, for PDFs that were already OCRed.
    TextLayer,
}

impl OcrEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tesseract => "tesseract",
            Self::TextLayer => "text_layer",
        }
    }
}

impl std::fmt::Display for OcrEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tesseract" => Ok(Self::Tesseract),
            "text_layer" | "text-layer" | "textlayer" => Ok(Self::TextLayer),
            other => Err(format!("unknown OCR engine: {other}")),
        }
    }
}

/// Full OCR text of a document.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, pdf: &Path) -> Result<String, ExtractionError>;
}

/// Embedded text layer of a PDF.
pub trait PageTextSource: Send + Sync {
    /// Text of every page in page order, each in top-to-bottom reading order.
    fn page_texts(&self, pdf: &Path) -> Result<Vec<String>, ExtractionError>;
}

/// Rasterises PDF pages into image files.
pub trait PageRenderer: Send + Sync {
    /// Render up to `max_pages` pages into `out_dir`, returning the image
    /// paths in page order.
    fn render_pages(
        &self,
        pdf: &Path,
        out_dir: &Path,
        max_pages: usize,
    ) -> Result<Vec<PathBuf>, ExtractionError>;
}

/// Run an external tool, returning its stdout.
pub(crate) fn run_tool(tool: &str, command: &mut Command) -> Result<Vec<u8>, ExtractionError> {
    let output = command.output().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExtractionError::ToolMissing(tool.to_string())
        } else {
            ExtractionError::Io(e)
        }
    })?;

    if !output.status.success() {
        return Err(ExtractionError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Mock OCR for unit testing without Tesseract: every document reads as `text`.
pub struct MockTextExtractor {
    pub text: String,
}

impl MockTextExtractor {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
        }
    }
}

impl TextExtractor for MockTextExtractor {
    fn extract_text(&self, _pdf: &Path) -> Result<String, ExtractionError> {
        Ok(self.text.clone())
    }
}

/// Mock text layer and renderer: the same pages for every document.
pub struct MockPages {
    pub pages: Vec<String>,
}

impl MockPages {
    pub fn new(pages: &[&str]) -> Self {
        Self {
            pages: pages.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl PageTextSource for MockPages {
    fn page_texts(&self, _pdf: &Path) -> Result<Vec<String>, ExtractionError> {
        Ok(self.pages.clone())
    }
}

impl PageRenderer for MockPages {
    fn render_pages(
        &self,
        _pdf: &Path,
        out_dir: &Path,
        max_pages: usize,
    ) -> Result<Vec<PathBuf>, ExtractionError> {
        let mut images = Vec::new();
        for (index, text) in self.pages.iter().take(max_pages).enumerate() {
            let path = out_dir.join(format!("page-{}.png", index + 1));
            std::fs::write(&path, text)?;
            images.push(path);
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_reported_by_name() {
        let err = run_tool(
            "definitely-not-installed",
            &mut Command::new("definitely-not-installed-deedflow-tool"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExtractionError::ToolMissing(ref t) if t == "definitely-not-installed"
        ));
    }

    #[test]
    fn ocr_engine_parses_aliases() {
        assert_eq!("Tesseract".parse::<OcrEngine>().unwrap(), OcrEngine::Tesseract);
        assert_eq!("text-layer".parse::<OcrEngine>().unwrap(), OcrEngine::TextLayer);
        assert_eq!(OcrEngine::TextLayer.to_string(), "text_layer");
        assert!("pdftotext".parse::<OcrEngine>().is_err());
    }
}
