use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use super::{RegionDetector, VisionError};
use crate::pipeline::extraction::{run_tool, ExtractionError, PageRenderer};

/// Detector run as an external executable:
/// `<program> <image> <output> <confidence>`.
///
/// Exit status 0 with `output` written means a table was found; exit 0
/// without it means none cleared the threshold.
#[derive(Debug, Clone)]
pub struct CommandRegionDetector {
    program: PathBuf,
    confidence: f32,
}

impl CommandRegionDetector {
    pub fn new(program: impl Into<PathBuf>, confidence: f32) -> Self {
        Self {
            program: program.into(),
            confidence,
        }
    }
}

/// Delete a crop left over from an earlier run so it cannot pass as a detection.
fn remove_stale(output: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(output) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl RegionDetector for CommandRegionDetector {
    fn detect_and_crop(&self, image: &Path, output: &Path) -> Result<bool, VisionError> {
        remove_stale(output)?;
        let tool = self.program.display().to_string();
        let result = run_tool(
            &tool,
            Command::new(&self.program)
                .arg(image)
                .arg(output)
                .arg(format!("{:.2}", self.confidence)),
        );
        match result {
            Ok(_) => Ok(output.is_file()),
            Err(ExtractionError::ToolFailed { status, stderr, .. }) => Err(VisionError::Detector(
                format!("{tool} exited with status {status}: {stderr}"),
            )),
            Err(e) => Err(e.into()),
        }
    }
}

/// Renders a deed and crops the fee table from the first page that has one.
pub struct TableLocator {
    renderer: Arc<dyn PageRenderer>,
    detector: Arc<dyn RegionDetector>,
    max_pages: usize,
}

impl TableLocator {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        detector: Arc<dyn RegionDetector>,
        max_pages: usize,
    ) -> Self {
        Self {
            renderer,
            detector,
            max_pages,
        }
    }

    /// Write `<document_id>_table.png` into `out_dir` if any page holds a
    /// fee table. Detector errors on one page are logged and the next page tried.
    pub fn locate(
        &self,
        pdf: &Path,
        document_id: &str,
        out_dir: &Path,
    ) -> Result<Option<PathBuf>, VisionError> {
        std::fs::create_dir_all(out_dir)?;
        let scratch = tempfile::tempdir()?;
        let pages = self
            .renderer
            .render_pages(pdf, scratch.path(), self.max_pages)?;
        let output = out_dir.join(format!("{document_id}_table.png"));
        remove_stale(&output)?;

        for (index, page) in pages.iter().enumerate() {
            match self.detector.detect_and_crop(page, &output) {
                Ok(true) => {
                    tracing::info!(
                        document_id,
                        page = index + 1,
                        output = %output.display(),
                        "Fee table located"
                    );
                    return Ok(Some(output));
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    document_id,
                    page = index + 1,
                    error = %e,
                    "Table detection failed on page"
                ),
            }
        }

        tracing::info!(document_id, pages = pages.len(), "No fee table detected");
        Ok(None)
    }
}
