use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

/// The error taxonomy admission and accounting surface, per spec §7.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Upstream request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing, invalid, or inactive API key.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// One or more requested tag names are unknown to this tenant.
    #[error("Tags not found for this tenant: {0}")]
    TagValidationError(String),

    /// The tenant-keyed sliding window has been exhausted.
    #[error("Rate limit exceeded")]
    RateLimited,

    /// A tenant-period budget has been exhausted.
    #[error("Budget exceeded for period {period}")]
    BudgetExceeded { period: String },

    /// A tag-period budget has been exhausted.
    #[error("Budget exceeded for tag '{tag}' period {period}")]
    TagBudgetExceeded { tag: String, period: String },

    /// The session's effective budget has been exhausted.
    #[error("Session budget exceeded")]
    SessionBudgetExceeded,

    /// The external policy engine returned `allow = false`.
    #[error("Request denied by policy")]
    PolicyDenied,

    /// No provider is registered for the requested model.
    #[error("No provider configured for model '{0}'")]
    NoProviderForModel(String),

    /// The upstream provider returned a non-2xx status or error body; mirrored verbatim.
    #[error("Provider error: {status}: {body}")]
    ProviderError { status: u16, body: String },

    /// A dependency required for a fail-closed decision (the DB) is unreachable.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GatewayError::Config(msg.into())
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        GatewayError::Validation(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        GatewayError::Internal(msg.into())
    }

    /// The HTTP status code this error maps to on the `/v1/*` surface.
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthenticated => 401,
            GatewayError::TagValidationError(_) => 400,
            GatewayError::RateLimited => 429,
            GatewayError::BudgetExceeded { .. }
            | GatewayError::TagBudgetExceeded { .. }
            | GatewayError::SessionBudgetExceeded => 402,
            GatewayError::PolicyDenied => 403,
            GatewayError::NoProviderForModel(_) => 400,
            GatewayError::ProviderError { status, .. } => *status,
            GatewayError::ServiceUnavailable(_) => 503,
            GatewayError::Validation(_) => 400,
            _ => 500,
        }
    }
}
