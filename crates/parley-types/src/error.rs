use thiserror::Error;

/// Result type for bus stages and collaborators.
pub type BusResult<T> = Result<T, BusError>;

/// Failure taxonomy shared by every stage of the command bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("missing grant '{grant}'")]
    Authorization { grant: String },
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
    #[error("unsupported mime type '{0}'")]
    UnsupportedType(String),
    #[error("transient i/o failure: {0}")]
    TransientIo(String),
    #[error("command bus is closed")]
    Closed,
    #[error("startup failed: {0}")]
    Startup(String),
}

impl BusError {
    /// Builds a validation error from any displayable reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Builds a not-found error for a named item kind.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable reason code used in logs and replies.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Authorization { .. } => "authorization",
            Self::NotFound { .. } => "not_found",
            Self::UnsupportedType(_) => "unsupported_type",
            Self::TransientIo(_) => "transient_io",
            Self::Closed => "closed",
            Self::Startup(_) => "startup",
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(error: serde_json::Error) -> Self {
        Self::Validation(error.to_string())
    }
}
