use thiserror::Error;

/// Errors surfaced by the fusion library.
///
/// Expected races (an enrichment result for a pruned track, a transform that
/// is not available yet) are not errors and never show up here.
#[derive(Error, Debug)]
pub enum FusionError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

pub type Result<T> = std::result::Result<T, FusionError>;
