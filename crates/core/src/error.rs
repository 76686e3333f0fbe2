/// Domain errors shared by the bus, the registry and both transports.
///
/// Each variant maps to a wire-level failure category (see [`category`](CoreError::category))
/// so WebSocket `error` frames and HTTP error bodies identify the same failure
/// the same way.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Event bus unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Slow consumer: {0}")]
    SlowConsumer(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Failure category reported to clients.
    pub fn category(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation_error",
            CoreError::Unauthorized(_) => "authentication_error",
            CoreError::Forbidden(_) => "authorization_error",
            CoreError::BackendUnavailable(_) => "backend_unavailable",
            CoreError::SlowConsumer(_) => "slow_consumer",
            CoreError::Internal(_) => "internal_error",
        }
    }

    /// The human-readable message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            CoreError::Validation(msg)
            | CoreError::Unauthorized(msg)
            | CoreError::Forbidden(msg)
            | CoreError::BackendUnavailable(msg)
            | CoreError::SlowConsumer(msg)
            | CoreError::Internal(msg) => msg,
        }
    }
}
