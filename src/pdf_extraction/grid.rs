// Candidate grids: what every extraction engine hands to the classifier

/// Rows of text cells recovered from one page region by one engine.
/// Rows may have different widths.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidateGrid {
    pub engine: &'static str,
    /// 0-based page index
    pub page: usize,
    pub rows: Vec<Vec<String>>,
}

impl CandidateGrid {
    pub fn new(engine: &'static str, page: usize, rows: Vec<Vec<String>>) -> Self {
        Self { engine, page, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.iter().all(|cell| cell.trim().is_empty()))
    }
}

/// Split a whitespace-aligned text line into cells.
///
/// Columns are separated by runs of two or more spaces, tabs or box-drawing
/// bars. Single spaces stay inside a cell.
pub fn split_aligned_line(line: &str) -> Vec<String> {
    static SEPARATOR: once_cell::sync::Lazy<regex::Regex> =
        once_cell::sync::Lazy::new(|| regex::Regex::new(r"\s{2,}|\t|│|┃|\|").expect("separator regex"));

    SEPARATOR
        .split(line.trim())
        .map(str::trim)
        .filter(|cell| !cell.is_empty())
        .map(str::to_string)
        .collect()
}

/// Turn a page worth of aligned text into a grid, one row per non-blank line.
pub fn grid_from_text(engine: &'static str, page: usize, text: &str) -> CandidateGrid {
    let rows = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(split_aligned_line)
        .collect();
    CandidateGrid::new(engine, page, rows)
}
