// Request orchestration: decrypt, extract with fallback, classify, normalize, aggregate
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span, Instrument};

use crate::aggregate::{build_result, reconcile};
use crate::classify::{assemble, Extracted, SynonymTable};
use crate::config::ExtractorConfig;
use crate::fetch::{fetch_document, parse_url};
use crate::model::{Holding, ParseResult};
use crate::normalize::normalize;
use crate::pdf_extraction::decrypt;
use crate::pdf_extraction::extraction_router::ExtractionRouter;
use crate::types::{CamsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Decrypting,
    Extracting,
    Classifying,
    Normalizing,
    Aggregating,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
enum Source {
    File(Vec<u8>),
    Url(reqwest::Url),
}

/// A validated parse request: exactly one document source plus an optional password.
#[derive(Debug, Clone)]
pub struct ParseRequest {
    source: Source,
    password: Option<String>,
}

impl ParseRequest {
    pub fn new(file: Option<Vec<u8>>, url: Option<String>, password: Option<String>) -> Result<Self> {
        let source = match (file, url) {
            (Some(bytes), None) => Source::File(bytes),
            (None, Some(url)) => Source::Url(parse_url(&url)?),
            (None, None) => return Err(CamsError::InvalidRequest("either a file or a url is required".into())),
            (Some(_), Some(_)) => {
                return Err(CamsError::InvalidRequest("a file and a url were both supplied".into()))
            }
        };
        Ok(Self { source, password })
    }

    pub fn from_file(bytes: Vec<u8>, password: Option<String>) -> Self {
        Self {
            source: Source::File(bytes),
            password,
        }
    }
}

/// Stages entered by one request, in order.
#[derive(Debug, Default)]
struct StageTrace(Vec<Stage>);

impl StageTrace {
    fn enter(&mut self, stage: Stage) {
        if self.0.last().map_or(true, |last| stage > *last) {
            debug!(?stage, "pipeline stage");
            self.0.push(stage);
        }
    }
}

/// Holdings accepted from one engine's grids.
struct Accepted {
    holdings: Vec<Holding>,
    extracted: Extracted,
}

pub struct Pipeline {
    config: Arc<ExtractorConfig>,
    router: ExtractionRouter,
    synonyms: SynonymTable,
    client: reqwest::Client,
}

impl Pipeline {
    /// Build the engine chain the configuration names, probing each engine once.
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let router = ExtractionRouter::from_config(&config);
        Self::with_router(config, router)
    }

    pub fn with_router(config: ExtractorConfig, router: ExtractionRouter) -> Result<Self> {
        let synonyms = config.synonym_table()?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("camsfolio/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| CamsError::Config(format!("http client: {err}")))?;
        Ok(Self {
            config: Arc::new(config),
            router,
            synonyms,
            client,
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn router(&self) -> &ExtractionRouter {
        &self.router
    }

    pub async fn run(&self, request: ParseRequest) -> Result<ParseResult> {
        self.run_with_trace(request).await.0
    }

    /// Run a request and report the stages it went through.
    pub async fn run_with_trace(&self, request: ParseRequest) -> (Result<ParseResult>, Vec<Stage>) {
        let mut trace = StageTrace::default();
        trace.enter(Stage::Received);
        let result = self.execute(request, &mut trace).instrument(info_span!("parse")).await;
        match &result {
            Ok(_) => trace.enter(Stage::Done),
            Err(err) => {
                info!(reason = err.reason(), %err, "parse failed");
                trace.0.push(Stage::Failed);
            }
        }
        (result, trace.0)
    }

    /// Parse an in-memory statement.
    pub async fn parse_bytes(&self, bytes: &[u8], password: Option<&str>) -> Result<ParseResult> {
        let mut trace = StageTrace::default();
        self.parse_document(bytes, password, &mut trace).await
    }

    async fn execute(&self, request: ParseRequest, trace: &mut StageTrace) -> Result<ParseResult> {
        let ParseRequest { source, password } = request;
        let bytes = match source {
            Source::File(bytes) => bytes,
            Source::Url(url) => fetch_document(&self.client, &url, self.download_timeout()).await?,
        };
        self.parse_document(&bytes, password.as_deref(), trace).await
    }

    fn download_timeout(&self) -> Duration {
        self.config.download_timeout()
    }

    async fn parse_document(&self, bytes: &[u8], password: Option<&str>, trace: &mut StageTrace) -> Result<ParseResult> {
        trace.enter(Stage::Decrypting);
        let document = decrypt::open(bytes, password)?;
        info!(
            pages = document.page_count(),
            encrypted = document.was_encrypted(),
            "document opened"
        );

        trace.enter(Stage::Extracting);
        let synonyms = &self.synonyms;
        let outcome = self
            .router
            .extract_with_fallback(&document, |engine, grids| {
                trace.enter(Stage::Classifying);
                let extracted = assemble(&grids, synonyms);
                debug!(engine, tables = extracted.tables.len(), rows = extracted.row_count(), "classified grids");

                trace.enter(Stage::Normalizing);
                let holdings = normalize_tables(&extracted);
                (!holdings.is_empty()).then_some(Accepted { holdings, extracted })
            })
            .await?;

        trace.enter(Stage::Aggregating);
        let Accepted { holdings, extracted } = outcome.value;
        info!(
            engine = outcome.engine,
            holdings = holdings.len(),
            elapsed_ms = outcome.extraction_time_ms,
            "holdings extracted"
        );
        let result = build_result(holdings, extracted.date);
        reconcile(&result.portfolio_summary, extracted.printed_total);
        Ok(result)
    }
}

/// Normalize every row, dropping the ones that are not valid holdings.
fn normalize_tables(extracted: &Extracted) -> Vec<Holding> {
    let mut holdings = Vec::new();
    for table in &extracted.tables {
        for row in &table.rows {
            match normalize(row, &table.mapping) {
                Ok(holding) => holdings.push(holding),
                Err(rejection) => debug!(page = row.page, cells = ?row.cells, %rejection, "row dropped"),
            }
        }
    }
    holdings
}
