use thiserror::Error;

/// Errors surfaced by the detection pipeline and storage layer.
///
/// The pipeline never downgrades an error to a partial result: a failed run
/// leaves no record behind, so callers can retry `Persistence` failures and
/// must fix their input on `Validation` failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed detection geometry/confidence or an unknown class id.
    #[error("validation error: {0}")]
    Validation(String),

    /// Storage commit failure. Retryable; no partial state is left behind.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A caller-supplied budget was exceeded. The run was abandoned cleanly.
    #[error("timed out after {elapsed_ms}ms (budget {budget_ms}ms) during {stage}")]
    Timeout {
        stage: &'static str,
        elapsed_ms: u64,
        budget_ms: u64,
    },

    /// Query for an identifier that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persistence(format!("metadata encoding: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
