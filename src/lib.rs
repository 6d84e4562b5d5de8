// camsfolio: CAMS consolidated account statements to holdings JSON
pub mod aggregate;
pub mod classify;
pub mod config;
pub mod fetch;
pub mod model;
pub mod normalize;
pub mod pdf_extraction;
pub mod pipeline;
pub mod types;

pub use config::ExtractorConfig;
pub use model::{Field, Holding, ParseResult, PortfolioSummary};
pub use pipeline::{ParseRequest, Pipeline, Stage};
pub use types::{CamsError, Result};
