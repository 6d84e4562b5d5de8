// Table extraction backends, most structurally reliable first
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::decrypt::DocumentHandle;
use super::grid::CandidateGrid;
use crate::config::ExtractorConfig;
use crate::types::EngineError;

pub mod layout_text;
pub mod ocr;
pub mod positional;
pub mod process;
pub mod ruled;

pub use layout_text::LayoutTextExtractor;
pub use ocr::OcrTextExtractor;
pub use positional::PositionalTextExtractor;
pub use ruled::RuledTableExtractor;

/// A backend that turns document pages into candidate grids.
#[async_trait]
pub trait TableExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check the backend's runtime dependencies. Called once when the chain
    /// is built; an error marks the engine unavailable for the chain's life.
    fn probe(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn extract(&self, document: &DocumentHandle) -> Result<Vec<CandidateGrid>, EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Ruled,
    Positional,
    LayoutText,
    Ocr,
}

impl EngineKind {
    pub const DEFAULT_ORDER: [EngineKind; 4] = [
        EngineKind::Ruled,
        EngineKind::Positional,
        EngineKind::LayoutText,
        EngineKind::Ocr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Ruled => "ruled",
            EngineKind::Positional => "positional",
            EngineKind::LayoutText => "layout_text",
            EngineKind::Ocr => "ocr",
        }
    }

    pub fn parse(name: &str) -> Option<EngineKind> {
        Self::DEFAULT_ORDER
            .into_iter()
            .find(|kind| kind.as_str() == name.trim().to_lowercase().replace('-', "_"))
    }

    pub fn build(self, config: &ExtractorConfig) -> Box<dyn TableExtractor> {
        let timeout = config.engine_timeout();
        match self {
            EngineKind::Ruled => Box::new(RuledTableExtractor::new()),
            EngineKind::Positional => Box::new(PositionalTextExtractor::new()),
            EngineKind::LayoutText => Box::new(LayoutTextExtractor::new(config.tools.pdftotext.clone(), timeout)),
            EngineKind::Ocr => Box::new(OcrTextExtractor::new(
                config.tools.pdftoppm.clone(),
                config.tools.tesseract.clone(),
                config.ocr_dpi,
                timeout,
            )),
        }
    }
}

/// Resolve an external tool, honouring absolute or relative paths as given.
pub(crate) fn locate_tool(tool: &Path) -> Result<PathBuf, EngineError> {
    which::which(tool).map_err(|err| EngineError::Unavailable(format!("{} not found: {err}", tool.display())))
}
