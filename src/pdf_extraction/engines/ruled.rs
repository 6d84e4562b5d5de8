// Ruled-table engine: cells bounded by the grid lines drawn around the holdings table
use async_trait::async_trait;
use lopdf::Document;
use tracing::debug;

use super::positional::line_cells;
use super::TableExtractor;
use crate::pdf_extraction::decrypt::DocumentHandle;
use crate::pdf_extraction::grid::CandidateGrid;
use crate::pdf_extraction::lopdf_helper;
use crate::pdf_extraction::page_layout::{group_lines, page_layout, PageLayout, Rule, TextRun};
use crate::types::EngineError;

/// Rules closer than this (points) are the same rule.
const SNAP: f32 = 2.0;

pub struct RuledTableExtractor;

impl RuledTableExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RuledTableExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Column boundaries (left to right) and row boundaries (top to bottom).
#[derive(Debug, PartialEq)]
struct RuledTable {
    xs: Vec<f32>,
    ys: Vec<f32>,
}

impl RuledTable {
    fn column_of(&self, run: &TextRun) -> Option<usize> {
        let anchor = run.x + 0.5;
        self.xs.windows(2).position(|edge| anchor >= edge[0] && anchor < edge[1])
    }

    fn cells(&self, runs: &[TextRun]) -> Vec<String> {
        let mut cells = vec![String::new(); self.xs.len() - 1];
        for run in runs {
            if let Some(column) = self.column_of(run) {
                let cell = &mut cells[column];
                if !cell.is_empty() {
                    cell.push(' ');
                }
                cell.push_str(run.text.trim());
            }
        }
        cells
    }

    /// Rows of the table, consuming the runs that fall inside it.
    fn rows(&self, runs: &[TextRun], used: &mut [bool]) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        for band in self.ys.windows(2) {
            let (top, bottom) = (band[0], band[1]);
            let mut members = Vec::new();
            for (i, run) in runs.iter().enumerate() {
                // Baseline plus a third of the glyph height sits inside the cell box.
                let middle = run.y + run.size * 0.3;
                if !used[i] && middle <= top && middle > bottom && self.column_of(run).is_some() {
                    used[i] = true;
                    members.push(run.clone());
                }
            }
            if members.is_empty() {
                continue;
            }

            // A band holding several full text lines is a table drawn without
            // row separators; a single wrapped cell is not.
            let lines = group_lines(&members);
            let stacked_columns = (0..self.xs.len() - 1)
                .filter(|column| {
                    lines
                        .iter()
                        .filter(|line| line.iter().any(|run| self.column_of(run) == Some(*column)))
                        .count()
                        > 1
                })
                .count();
            if lines.len() > 1 && stacked_columns >= 2 {
                rows.extend(lines.iter().map(|line| self.cells(line)));
            } else {
                rows.push(self.cells(&lines.concat()));
            }
        }
        rows.retain(|row| row.iter().any(|cell| !cell.is_empty()));
        rows
    }
}

/// Average values lying within `SNAP` of each other, ascending.
fn cluster(mut values: Vec<f32>) -> Vec<f32> {
    values.sort_by(f32::total_cmp);
    let mut groups: Vec<Vec<f32>> = Vec::new();
    for value in values {
        match groups.last_mut() {
            Some(group) if value - group[group.len() - 1] <= SNAP => group.push(value),
            _ => groups.push(vec![value]),
        }
    }
    groups
        .iter()
        .map(|group| group.iter().sum::<f32>() / group.len() as f32)
        .collect()
}

/// Merge the vertical extents of vertical rules; each merged span is one table.
fn vertical_spans(verticals: &[Rule]) -> Vec<(f32, f32)> {
    let mut spans: Vec<(f32, f32)> = verticals.iter().map(|rule| (rule.y0, rule.y1)).collect();
    spans.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut merged: Vec<(f32, f32)> = Vec::new();
    for (low, high) in spans {
        match merged.last_mut() {
            Some(last) if low <= last.1 + SNAP => last.1 = last.1.max(high),
            _ => merged.push((low, high)),
        }
    }
    merged
}

fn ruled_tables(layout: &PageLayout) -> Vec<RuledTable> {
    let verticals: Vec<Rule> = layout.rules.iter().filter(|r| r.is_vertical()).copied().collect();
    let horizontals: Vec<Rule> = layout.rules.iter().filter(|r| r.is_horizontal()).copied().collect();

    let mut tables: Vec<RuledTable> = vertical_spans(&verticals)
        .into_iter()
        .filter_map(|(bottom, top)| {
            let xs = cluster(
                verticals
                    .iter()
                    .filter(|r| r.y0 >= bottom - SNAP && r.y1 <= top + SNAP)
                    .map(|r| r.x0)
                    .collect(),
            );
            if xs.len() < 3 {
                return None;
            }
            let (left, right) = (xs[0], xs[xs.len() - 1]);
            let mut ys: Vec<f32> = horizontals
                .iter()
                .filter(|r| r.y0 >= bottom - SNAP && r.y0 <= top + SNAP && r.x0 <= right && r.x1 >= left)
                .map(|r| r.y0)
                .chain([bottom, top])
                .collect();
            ys = cluster(ys);
            ys.reverse();
            (ys.len() >= 2).then_some(RuledTable { xs, ys })
        })
        .collect();
    tables.sort_by(|a, b| b.ys[0].total_cmp(&a.ys[0]));
    tables
}

/// Grids for one page: the page's loose text first, one row per line,
/// then every ruled table top to bottom.
fn page_grids(engine: &'static str, page: usize, layout: &PageLayout) -> Vec<CandidateGrid> {
    let tables = ruled_tables(layout);
    let mut used = vec![false; layout.runs.len()];
    let table_rows: Vec<Vec<Vec<String>>> = tables
        .iter()
        .map(|table| table.rows(&layout.runs, &mut used))
        .collect();

    let loose: Vec<TextRun> = layout
        .runs
        .iter()
        .zip(&used)
        .filter(|(_, used)| !**used)
        .map(|(run, _)| run.clone())
        .collect();
    let loose_rows: Vec<Vec<String>> = group_lines(&loose)
        .iter()
        .map(|line| vec![line_cells(line).join(" ")])
        .filter(|row| !row[0].is_empty())
        .collect();

    let mut grids = Vec::new();
    if !loose_rows.is_empty() {
        grids.push(CandidateGrid::new(engine, page, loose_rows));
    }
    grids.extend(
        table_rows
            .into_iter()
            .filter(|rows| !rows.is_empty())
            .map(|rows| CandidateGrid::new(engine, page, rows)),
    );
    grids
}

#[async_trait]
impl TableExtractor for RuledTableExtractor {
    fn name(&self) -> &'static str {
        "ruled"
    }

    async fn extract(&self, document: &DocumentHandle) -> Result<Vec<CandidateGrid>, EngineError> {
        let doc = document.shared();
        let name = self.name();
        tokio::task::spawn_blocking(move || document_grids(name, &doc))
            .await
            .map_err(|err| EngineError::Failed(format!("{name} worker: {err}")))?
    }
}

fn document_grids(engine: &'static str, doc: &Document) -> Result<Vec<CandidateGrid>, EngineError> {
    let mut grids = Vec::new();
    for (page, page_id) in lopdf_helper::pages(doc) {
        let layout = page_layout(doc, page_id)?;
        let found = page_grids(engine, page, &layout);
        debug!(page, rules = layout.rules.len(), grids = found.len(), "ruled grids");
        grids.extend(found);
    }
    Ok(grids)
}
