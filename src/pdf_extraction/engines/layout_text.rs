// Layout-text engine: poppler's pdftotext in -layout mode, columns split on aligned whitespace
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::process::run_tool;
use super::{locate_tool, TableExtractor};
use crate::pdf_extraction::decrypt::DocumentHandle;
use crate::pdf_extraction::grid::{grid_from_text, CandidateGrid};
use crate::types::EngineError;

pub struct LayoutTextExtractor {
    program: PathBuf,
    timeout: Duration,
}

impl LayoutTextExtractor {
    pub fn new(program: PathBuf, timeout: Duration) -> Self {
        Self { program, timeout }
    }
}

/// pdftotext separates pages with form feeds.
fn pages_to_grids(engine: &'static str, text: &str) -> Vec<CandidateGrid> {
    text.split('\x0c')
        .enumerate()
        .map(|(page, page_text)| grid_from_text(engine, page, page_text))
        .filter(|grid| !grid.is_empty())
        .collect()
}

#[async_trait]
impl TableExtractor for LayoutTextExtractor {
    fn name(&self) -> &'static str {
        "layout_text"
    }

    fn probe(&self) -> Result<(), EngineError> {
        locate_tool(&self.program).map(|_| ())
    }

    async fn extract(&self, document: &DocumentHandle) -> Result<Vec<CandidateGrid>, EngineError> {
        let program = locate_tool(&self.program)?;
        let file = document.materialize()?;
        let path = file.path().to_string_lossy().into_owned();

        let stdout = run_tool(&program, &["-layout", "-enc", "UTF-8", &path, "-"], self.timeout).await?;
        let text = String::from_utf8_lossy(&stdout);
        let grids = pages_to_grids(self.name(), &text);
        debug!(pages = grids.len(), bytes = stdout.len(), "pdftotext layout output");
        Ok(grids)
    }
}
