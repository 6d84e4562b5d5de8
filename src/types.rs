// Core error types for camsfolio
use std::time::Duration;

// Fatal errors: these are the only failures a caller ever sees
#[derive(Debug, thiserror::Error)]
pub enum CamsError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("document is encrypted and no password was supplied")]
    PasswordRequired,

    #[error("the supplied password does not unlock the document")]
    PasswordInvalid,

    #[error("unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    #[error("corrupt or unreadable PDF: {0}")]
    CorruptDocument(String),

    #[error("failed to download statement: {0}")]
    DownloadFailed(String),

    #[error("no holdings could be extracted ({0})")]
    NoHoldingsExtracted(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CamsError {
    /// Stable machine-readable name of the failure, used by transport layers.
    pub fn reason(&self) -> &'static str {
        match self {
            CamsError::InvalidRequest(_) => "InvalidRequest",
            CamsError::PasswordRequired => "PasswordRequired",
            CamsError::PasswordInvalid => "PasswordInvalid",
            CamsError::UnsupportedEncryption(_) => "UnsupportedEncryption",
            CamsError::CorruptDocument(_) => "CorruptDocument",
            CamsError::DownloadFailed(_) => "DownloadFailed",
            CamsError::NoHoldingsExtracted(_) => "NoHoldingsExtracted",
            CamsError::Config(_) => "Config",
            CamsError::Io(_) => "Io",
        }
    }
}

pub type Result<T> = std::result::Result<T, CamsError>;

// Engine-local failures, absorbed by the extraction chain
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine failed: {0}")]
    Failed(String),

    #[error("engine timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<lopdf::Error> for EngineError {
    fn from(err: lopdf::Error) -> Self {
        EngineError::Failed(format!("lopdf: {err}"))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Failed(format!("io: {err}"))
    }
}

// Row-local rejections, absorbed by the normalizer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RowRejection {
    #[error("not a holding row")]
    NotAHolding,

    #[error("field {field} is not numeric: {raw:?}")]
    FieldTypeMismatch { field: &'static str, raw: String },

    #[error("field {field} is negative: {raw:?}")]
    NegativeAmount { field: &'static str, raw: String },
}
