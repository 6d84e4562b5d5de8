// Positional engine: columns recovered from the gaps between positioned text runs
use async_trait::async_trait;
use lopdf::Document;
use tracing::debug;

use super::TableExtractor;
use crate::pdf_extraction::decrypt::DocumentHandle;
use crate::pdf_extraction::grid::{split_aligned_line, CandidateGrid};
use crate::pdf_extraction::lopdf_helper;
use crate::pdf_extraction::page_layout::{group_lines, page_layout, TextRun};
use crate::types::EngineError;

/// A horizontal gap wider than this many ems starts a new column.
const COLUMN_GAP_EMS: f32 = 1.0;

/// Gaps narrower than this many ems join glyph runs without a space.
const WORD_GAP_EMS: f32 = 0.15;

pub struct PositionalTextExtractor;

impl PositionalTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PositionalTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Split one baseline-grouped line into cells at wide horizontal gaps.
pub(crate) fn line_cells(line: &[TextRun]) -> Vec<String> {
    let mut cells: Vec<String> = Vec::new();
    let mut last_end: Option<f32> = None;

    for run in line {
        let gap = last_end.map(|end| run.x - end);
        let pieces = split_aligned_line(&run.text);
        for (i, piece) in pieces.into_iter().enumerate() {
            let joins = i == 0 && gap.is_some_and(|gap| gap <= run.size * COLUMN_GAP_EMS);
            match cells.last_mut() {
                Some(cell) if joins => {
                    if gap.is_some_and(|gap| gap > run.size * WORD_GAP_EMS) {
                        cell.push(' ');
                    }
                    cell.push_str(&piece);
                }
                _ => cells.push(piece),
            }
        }
        last_end = Some(last_end.map_or(run.x_end, |end| end.max(run.x_end)));
    }
    cells
}

#[async_trait]
impl TableExtractor for PositionalTextExtractor {
    fn name(&self) -> &'static str {
        "positional"
    }

    async fn extract(&self, document: &DocumentHandle) -> Result<Vec<CandidateGrid>, EngineError> {
        let doc = document.shared();
        let name = self.name();
        tokio::task::spawn_blocking(move || page_rows(name, &doc))
            .await
            .map_err(|err| EngineError::Failed(format!("{name} worker: {err}")))?
    }
}

fn page_rows(engine: &'static str, doc: &Document) -> Result<Vec<CandidateGrid>, EngineError> {
    let mut grids = Vec::new();
    for (page, page_id) in lopdf_helper::pages(doc) {
        let layout = page_layout(doc, page_id)?;
        let rows: Vec<Vec<String>> = group_lines(&layout.runs)
            .iter()
            .map(|line| line_cells(line))
            .filter(|cells| !cells.is_empty())
            .collect();
        debug!(page, rows = rows.len(), "positional rows");
        grids.push(CandidateGrid::new(engine, page, rows));
    }
    Ok(grids)
}
