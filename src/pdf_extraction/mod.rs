// PDF extraction module
pub mod decrypt;
pub mod engines;
pub mod extraction_router;
pub mod fonts;
pub mod grid;
pub mod lopdf_helper;
pub mod page_layout;
pub mod security;

pub use decrypt::{open, DocumentHandle};
pub use engines::{EngineKind, TableExtractor};
pub use extraction_router::{AttemptOutcome, EngineAttempt, ExtractionResult, ExtractionRouter};
pub use grid::CandidateGrid;
