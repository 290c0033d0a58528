use thiserror::Error;

/// Errors that can occur while resolving or streaming from a source
#[derive(Error, Debug)]
pub enum SourceError {
    /// The input is not something this provider recognises. Routing moves on.
    #[error("Unknown or unsupported resource: {0}")]
    Unsupported(String),

    /// The input matched, but its shape is one this provider refuses.
    #[error("Unsupported resource kind: {0}")]
    UnsupportedKind(String),

    #[error("Cannot extract data: {0}")]
    Extraction(String),

    #[error("Track has no URI")]
    MissingUri,

    #[error("Source {0} is not initialized")]
    Uninitialized(&'static str),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// True when another provider should be given a chance at the same input.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, SourceError::Unsupported(_))
    }

    pub(crate) fn extraction(what: impl std::fmt::Display) -> Self {
        SourceError::Extraction(what.to_string())
    }
}

/// Result type for source operations
pub type SourceResult<T> = Result<T, SourceError>;
