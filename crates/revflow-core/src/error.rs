use thiserror::Error;

/// Typed error taxonomy for the core. Call sites branch on the kind rather
/// than string-matching a message; the message itself stays human-readable
/// for logs.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("persistence error: {0}")]
    Persistence(#[from] tokio_postgres::Error),

    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

impl CoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        CoreError::Provider(msg.into())
    }

    pub fn agent(msg: impl Into<String>) -> Self {
        CoreError::Agent(msg.into())
    }

    pub fn state_conflict(msg: impl Into<String>) -> Self {
        CoreError::StateConflict(msg.into())
    }

    /// True for kinds where a caller retrying the same operation shortly
    /// after might reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Provider(_) | CoreError::Timeout(_))
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
