use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use super::{ExtractionError, PageTextSource, TextExtractor};

/// Embedded text layer read with the pdf-extract crate.
///
/// Serves the fee heuristic, and doubles as the OCR engine for PDFs that
/// were already run through OCR before intake.
#[derive(Debug, Clone)]
pub struct PdfTextLayer {
    max_pages: usize,
}

impl PdfTextLayer {
    pub fn new(max_pages: usize) -> Self {
        Self { max_pages }
    }

    /// Text of every page of an in-memory PDF.
    pub fn pages_from_bytes(pdf_bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
        // pdf-extract panics on some malformed font tables.
        panic::catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(pdf_bytes)
        }))
        .map_err(|_| ExtractionError::PdfParsing("text layer decoder panicked".into()))?
        .map_err(|e| map_output_error(e.to_string()))
    }
}

impl Default for PdfTextLayer {
    fn default() -> Self {
        Self::new(25)
    }
}

fn map_output_error(msg: String) -> ExtractionError {
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        ExtractionError::PdfEncrypted
    } else {
        ExtractionError::PdfParsing(msg)
    }
}

impl PageTextSource for PdfTextLayer {
    fn page_texts(&self, pdf: &Path) -> Result<Vec<String>, ExtractionError> {
        let bytes = std::fs::read(pdf)?;
        Self::pages_from_bytes(&bytes)
    }
}

impl TextExtractor for PdfTextLayer {
    fn extract_text(&self, pdf: &Path) -> Result<String, ExtractionError> {
        let pages = self.page_texts(pdf)?;
        let total = pages.len();
        let text: Vec<String> = pages
            .into_iter()
            .take(self.max_pages)
            .filter(|page| !page.trim().is_empty())
            .collect();

        tracing::debug!(
            pdf = %pdf.display(),
            pages = total,
            with_text = text.len(),
            "Text layer read"
        );
        Ok(text.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A PDF with one Helvetica text line per page, built with lopdf
    /// (the parser pdf-extract itself uses).
    fn make_test_pdf(lines: &[&str]) -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut kids: Vec<Object> = Vec::new();
        for line in lines {
            let content = format!("BT /F1 12 Tf 100 700 Td ({line}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
                "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn write_pdf(dir: &Path, lines: &[&str]) -> std::path::PathBuf {
        let path = dir.join("deed.pdf");
        std::fs::write(&path, make_test_pdf(lines)).unwrap();
        path
    }

    #[test]
    fn one_string_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_pdf(dir.path(), &["Cover", "Parties", "Registration Fee 20400.00"]);

        let pages = PdfTextLayer::default().page_texts(&pdf).unwrap();
        assert_eq!(pages.len(), 3);
        assert!(pages[2].contains("20400.00"), "page 3 was: {:?}", pages[2]);
    }

    #[test]
    fn extract_text_stops_at_page_limit() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = write_pdf(dir.path(), &["Vendor Ravi", "Purchaser Asha", "Schedule C"]);

        let text = PdfTextLayer::new(2).extract_text(&pdf).unwrap();
        assert!(text.contains("Vendor"));
        assert!(text.contains("Purchaser"));
        assert!(!text.contains("Schedule"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            PdfTextLayer::pages_from_bytes(b"not a pdf"),
            Err(ExtractionError::PdfParsing(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = PdfTextLayer::default()
            .page_texts(Path::new("/nonexistent/deed.pdf"))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Io(_)));
    }

    #[test]
    fn encryption_errors_are_recognised() {
        assert!(matches!(
            map_output_error("document is encrypted".into()),
            ExtractionError::PdfEncrypted
        ));
        assert!(matches!(
            map_output_error("bad xref".into()),
            ExtractionError::PdfParsing(_)
        ));
    }
}
