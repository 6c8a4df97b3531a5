//! Error types for courier.

use uuid::Uuid;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Rejections raised while turning a raw payload into a canonical message.
///
/// Every variant maps to a client error at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid webhook format: missing required fields")]
    UnrecognizedFormat,

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid provider_type: {0:?}. Must be 'sms' or 'mms'")]
    InvalidProviderType(String),

    #[error("Invalid {field} format: {value}")]
    InvalidAddressFormat { field: String, value: String },

    #[error("Invalid timestamp format: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Errors returned by outbound provider calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} returned HTTP {status_code}: {body}")]
    Status {
        provider: String,
        status_code: u16,
        body: String,
    },

    #[error("Provider {provider} transport failure: {reason}")]
    Transport { provider: String, reason: String },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            Self::Status { provider, .. } | Self::Transport { provider, .. } => provider,
        }
    }

    /// HTTP status code, if the provider answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status_code, .. } => Some(*status_code),
            Self::Transport { .. } => None,
        }
    }

    /// 429 Too Many Requests.
    pub fn is_rate_limited(&self) -> bool {
        self.status_code() == Some(429)
    }

    /// Any 5xx answer.
    pub fn is_server_error(&self) -> bool {
        matches!(self.status_code(), Some(code) if code >= 500)
    }

    /// Rate limits and server errors may be retried; other 4xx never are.
    pub fn is_retryable(&self) -> bool {
        self.is_rate_limited() || self.is_server_error()
    }
}

/// Errors from the raw HTTP transport capability.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Bounded cache errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("Key not found: {0}")]
    NotFound(String),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] DatabaseError),

    #[error("Conversation {0} not found")]
    ConversationNotFound(Uuid),

    #[error("Message {0} not found")]
    MessageNotFound(String),
}

impl PipelineError {
    /// Whether the failure was caused by the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Whether the failure means a referenced entity does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConversationNotFound(_)
                | Self::MessageNotFound(_)
                | Self::Storage(DatabaseError::NotFound { .. })
        )
    }
}
