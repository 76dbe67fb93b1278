use thiserror::Error;

/// Top-level error type for the melscope-core public API.
#[derive(Debug, Error)]
pub enum SpectroError {
    /// Invalid construction parameters. The instance is unusable.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A per-frame buffer had the wrong length.
    #[error("size mismatch: expected {expected} values, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A per-frame buffer was malformed in some other way.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// A GPU context, texture, thread or backend could not be obtained.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// A call arrived in a state where it cannot be honoured.
    #[error("rejected call: {0}")]
    ConcurrencyMisuse(String),

    /// Recording was requested without a granted capture permission.
    #[error("audio capture permission denied")]
    PermissionDenied,

    /// Failure reported by the audio driver layer.
    #[error("audio backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

impl SpectroError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SpectroError::Configuration(msg.into())
    }

    pub(crate) fn misuse(msg: impl Into<String>) -> Self {
        SpectroError::ConcurrencyMisuse(msg.into())
    }

    /// Whether the error is local to one call and leaves the instance usable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SpectroError::Configuration(_))
    }
}

/// Convenience alias so callers can write `Result<T>` instead of `Result<T, SpectroError>`.
pub type Result<T> = std::result::Result<T, SpectroError>;
