// OCR engine: pages rasterised with pdftoppm, then read back by tesseract
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info};

use super::process::run_tool;
use super::{locate_tool, TableExtractor};
use crate::pdf_extraction::decrypt::DocumentHandle;
use crate::pdf_extraction::grid::{grid_from_text, CandidateGrid};
use crate::types::EngineError;

pub struct OcrTextExtractor {
    pdftoppm: PathBuf,
    tesseract: PathBuf,
    dpi: u32,
    timeout: Duration,
}

impl OcrTextExtractor {
    pub fn new(pdftoppm: PathBuf, tesseract: PathBuf, dpi: u32, timeout: Duration) -> Self {
        Self {
            pdftoppm,
            tesseract,
            dpi,
            timeout,
        }
    }
}

/// Page number pdftoppm appended to an image name (`page-7.png`, `page-07.png`).
fn page_number(image: &Path) -> Option<usize> {
    image.file_stem()?.to_str()?.rsplit('-').next()?.parse().ok()
}

/// Rendered page images in page order.
fn rendered_pages(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
        .collect();
    images.sort_by_key(|path| page_number(path).unwrap_or(usize::MAX));
    Ok(images)
}

#[async_trait]
impl TableExtractor for OcrTextExtractor {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn probe(&self) -> Result<(), EngineError> {
        locate_tool(&self.pdftoppm)?;
        locate_tool(&self.tesseract)?;
        Ok(())
    }

    async fn extract(&self, document: &DocumentHandle) -> Result<Vec<CandidateGrid>, EngineError> {
        let pdftoppm = locate_tool(&self.pdftoppm)?;
        let tesseract = locate_tool(&self.tesseract)?;
        let started = Instant::now();

        let file = document.materialize()?;
        let dir = tempfile::tempdir()?;
        let prefix = dir.path().join("page");
        let dpi = self.dpi.to_string();
        run_tool(
            &pdftoppm,
            &[
                "-r",
                &dpi,
                "-png",
                &file.path().to_string_lossy(),
                &prefix.to_string_lossy(),
            ],
            self.timeout,
        )
        .await?;

        let images = rendered_pages(dir.path())?;
        info!(pages = images.len(), dpi = self.dpi, "running OCR on rendered pages");

        let mut grids = Vec::with_capacity(images.len());
        for (page, image) in images.iter().enumerate() {
            // One budget covers rendering and every page.
            let remaining = self.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(EngineError::TimedOut(self.timeout));
            }
            let stdout = run_tool(
                &tesseract,
                &[
                    &image.to_string_lossy(),
                    "stdout",
                    "--psm",
                    "6",
                    "-c",
                    "preserve_interword_spaces=1",
                ],
                remaining,
            )
            .await?;
            let grid = grid_from_text(self.name(), page, &String::from_utf8_lossy(&stdout));
            debug!(page, rows = grid.rows.len(), "ocr page read");
            grids.push(grid);
        }
        Ok(grids)
    }
}
