// Extraction router: the ordered engine chain with fallback
//
// Engines are probed once when the router is built. At extraction time each
// available engine runs under the configured timeout; its grids are handed to
// the caller's acceptance check, and the first engine whose grids are accepted
// wins. Engine failures are recorded and never surface on their own.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn, Instrument};

use super::decrypt::DocumentHandle;
use super::engines::TableExtractor;
use super::grid::CandidateGrid;
use crate::config::ExtractorConfig;
use crate::types::{CamsError, EngineError, Result};

/// What happened when one engine was tried.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Accepted,
    /// The engine ran but its grids held no acceptable holdings.
    NoHoldings,
    Failed(EngineError),
}

#[derive(Debug, Clone)]
pub struct EngineAttempt {
    pub engine: &'static str,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

impl fmt::Display for EngineAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Accepted => write!(f, "{}: accepted", self.engine),
            AttemptOutcome::NoHoldings => write!(f, "{}: no holdings", self.engine),
            AttemptOutcome::Failed(err) => write!(f, "{}: {err}", self.engine),
        }
    }
}

/// The accepted value together with how it was obtained.
#[derive(Debug)]
pub struct ExtractionResult<T> {
    pub value: T,
    pub engine: &'static str,
    pub extraction_time_ms: u64,
    pub attempts: Vec<EngineAttempt>,
}

struct EngineSlot {
    extractor: Box<dyn TableExtractor>,
    availability: std::result::Result<(), EngineError>,
}

pub struct ExtractionRouter {
    slots: Vec<EngineSlot>,
    timeout: Duration,
}

impl ExtractionRouter {
    pub fn from_config(config: &ExtractorConfig) -> Self {
        let extractors = config.engines.iter().map(|kind| kind.build(config)).collect();
        Self::from_extractors(extractors, config.engine_timeout())
    }

    /// Build a chain from arbitrary extractors, probing each once.
    pub fn from_extractors(extractors: Vec<Box<dyn TableExtractor>>, timeout: Duration) -> Self {
        let slots = extractors
            .into_iter()
            .map(|extractor| {
                let availability = extractor.probe();
                match &availability {
                    Ok(()) => debug!(engine = extractor.name(), "engine available"),
                    Err(err) => warn!(engine = extractor.name(), %err, "engine unavailable"),
                }
                EngineSlot { extractor, availability }
            })
            .collect();
        Self { slots, timeout }
    }

    /// Engine names in chain order with their probe results.
    pub fn engines(&self) -> Vec<(&'static str, std::result::Result<(), EngineError>)> {
        self.slots
            .iter()
            .map(|slot| (slot.extractor.name(), slot.availability.clone()))
            .collect()
    }

    /// Run the chain until `accept` takes an engine's grids.
    pub async fn extract_with_fallback<T, F>(&self, document: &DocumentHandle, mut accept: F) -> Result<ExtractionResult<T>>
    where
        F: FnMut(&'static str, Vec<CandidateGrid>) -> Option<T>,
    {
        let mut attempts = Vec::with_capacity(self.slots.len());
        let chain_start = Instant::now();

        for slot in &self.slots {
            let engine = slot.extractor.name();
            if let Err(err) = &slot.availability {
                debug!(engine, "skipping unavailable engine");
                attempts.push(EngineAttempt {
                    engine,
                    outcome: AttemptOutcome::Failed(err.clone()),
                    elapsed_ms: 0,
                });
                continue;
            }

            let started = Instant::now();
            let run = slot
                .extractor
                .extract(document)
                .instrument(info_span!("engine", engine));
            let outcome = match tokio::time::timeout(self.timeout, run).await {
                Ok(Ok(grids)) => {
                    debug!(engine, grids = grids.len(), "engine produced grids");
                    match accept(engine, grids) {
                        Some(value) => {
                            let elapsed_ms = started.elapsed().as_millis() as u64;
                            attempts.push(EngineAttempt {
                                engine,
                                outcome: AttemptOutcome::Accepted,
                                elapsed_ms,
                            });
                            info!(engine, elapsed_ms, "extraction accepted");
                            return Ok(ExtractionResult {
                                value,
                                engine,
                                extraction_time_ms: chain_start.elapsed().as_millis() as u64,
                                attempts,
                            });
                        }
                        None => {
                            info!(engine, "engine yielded no holdings, falling back");
                            AttemptOutcome::NoHoldings
                        }
                    }
                }
                Ok(Err(err)) => {
                    warn!(engine, %err, "engine failed");
                    AttemptOutcome::Failed(err)
                }
                Err(_) => {
                    warn!(engine, timeout = ?self.timeout, "engine timed out");
                    AttemptOutcome::Failed(EngineError::TimedOut(self.timeout))
                }
            };
            attempts.push(EngineAttempt {
                engine,
                outcome,
                elapsed_ms: started.elapsed().as_millis() as u64,
            });
        }

        let summary = if attempts.is_empty() {
            "no engines configured".to_string()
        } else {
            attempts.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
        };
        Err(CamsError::NoHoldingsExtracted(summary))
    }
}
