use thiserror::Error;

/// Core error type for the Charter orchestration engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Company or stage record absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// A stage precondition is not met; names the required predecessor state
    #[error("Invalid state for {subject}: requires '{required}', currently '{actual}'")]
    InvalidState {
        /// What was being attempted
        subject: String,
        /// The state the entity must be in
        required: String,
        /// The state the entity is actually in
        actual: String,
    },

    /// Outbound provider call failure
    #[error("Provider error ({}): {message}", if *.transient { "transient" } else { "permanent" })]
    ProviderError {
        /// Human-readable failure description
        message: String,
        /// Transient failures are safe to retry; permanent ones are not
        transient: bool,
    },

    /// Webhook rejected before any state mutation
    #[error("Signature verification failed: {0}")]
    SignatureVerification(String),

    /// Unregistered provider or missing credentials; fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Repository failure
    #[error("State store error: {0}")]
    StateStore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stage transition that would move backwards through the state machine
    #[error("Illegal stage transition: {0}")]
    IllegalTransition(String),

    /// Notification delivery failure
    #[error("Notification error: {0}")]
    Notification(String),
}

impl CoreError {
    /// Shorthand for a transient provider error
    pub fn provider_transient(message: impl Into<String>) -> Self {
        CoreError::ProviderError {
            message: message.into(),
            transient: true,
        }
    }

    /// Shorthand for a permanent provider error
    pub fn provider_permanent(message: impl Into<String>) -> Self {
        CoreError::ProviderError {
            message: message.into(),
            transient: false,
        }
    }

    /// Whether this error is safe to retry
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::ProviderError { transient: true, .. })
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}
