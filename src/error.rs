use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("{provider} rejected the request with status {status}: {body}")]
    UpstreamRejected {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} is unavailable: {detail}")]
    UpstreamUnavailable {
        provider: &'static str,
        detail: String,
    },
    #[error("{provider} returned an unmapped status '{status}'")]
    UnmappedStatus {
        provider: &'static str,
        status: String,
    },
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Image generation failed: {0}")]
    GenerationFailed(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Not enough credits: balance {balance}, cost {cost}")]
    InsufficientCredits { balance: i64, cost: i64 },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Network failures and polling exhaustion may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::UpstreamUnavailable { .. } | AppError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.into())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.into())
    }
}
