// Extractor configuration: engine chain, tool locations, timeouts, header synonyms
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classify::SynonymTable;
use crate::pdf_extraction::engines::EngineKind;
use crate::types::{CamsError, Result};

pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_OCR_DPI: u32 = 300;

pub const CONFIG_ENV: &str = "CAMSFOLIO_CONFIG";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Engines tried in order until one yields holdings.
    pub engines: Vec<EngineKind>,
    pub engine_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub ocr_dpi: u32,
    pub tools: ToolPaths,
    /// Extra header patterns per field, e.g. `current_value = ["nav value"]`.
    pub synonyms: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolPaths {
    pub pdftotext: PathBuf,
    pub pdftoppm: PathBuf,
    pub tesseract: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pdftotext: "pdftotext".into(),
            pdftoppm: "pdftoppm".into(),
            tesseract: "tesseract".into(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            engines: EngineKind::DEFAULT_ORDER.to_vec(),
            engine_timeout_secs: DEFAULT_ENGINE_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            ocr_dpi: DEFAULT_OCR_DPI,
            tools: ToolPaths::default(),
            synonyms: BTreeMap::new(),
        }
    }
}

impl ExtractorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|err| CamsError::Config(format!("cannot read {}: {err}", path.display())))?;
        let config: Self =
            toml::from_str(&content).map_err(|err| CamsError::Config(format!("{}: {err}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path, else `$CAMSFOLIO_CONFIG`, else the user config file if
    /// present, else defaults. Tool overrides from the environment apply last.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let candidate = explicit
            .map(Path::to_path_buf)
            .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match candidate {
            Some(path) => Self::load(&path)?,
            None => match user_config_path().filter(|path| path.is_file()) {
                Some(path) => Self::load(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env();
        debug!(?config, "extractor configuration");
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        let overrides = [
            ("CAMSFOLIO_PDFTOTEXT", &mut self.tools.pdftotext),
            ("CAMSFOLIO_PDFTOPPM", &mut self.tools.pdftoppm),
            ("CAMSFOLIO_TESSERACT", &mut self.tools.tesseract),
        ];
        for (var, slot) in overrides {
            if let Some(value) = env::var_os(var).filter(|v| !v.is_empty()) {
                *slot = PathBuf::from(value);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.engines.is_empty() {
            return Err(CamsError::Config("engine chain is empty".into()));
        }
        if self.engine_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(CamsError::Config("timeouts must be positive".into()));
        }
        self.synonym_table().map(|_| ())
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Built-in header synonyms, with the configured extras tried first.
    pub fn synonym_table(&self) -> Result<SynonymTable> {
        SynonymTable::with_extra(&self.synonyms)
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("camsfolio").join("config.toml"))
}
