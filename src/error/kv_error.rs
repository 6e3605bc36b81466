use thiserror::Error;

use crate::config::error::ConfigError;

/// Every failure a cache, session or store operation can surface to its caller.
///
/// The variants are deliberately coarse: callers branch on the kind (is the
/// cache down, did the caller pass garbage, was the payload tampered with),
/// while the message carries the backend-specific detail.
#[derive(Error, Debug)]
pub enum KvError {
    /// Invalid or missing setting. Always raised while constructing a backend,
    /// never deferred to the first operation.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The underlying store could not be reached or timed out.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed TTL, key or value supplied by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A stored payload could not be decoded for its declared encoding.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A wrapper transform failed, e.g. ciphertext that does not authenticate.
    #[error("Wrapper '{wrapper}' failed: {message}")]
    Wrapper { wrapper: String, message: String },

    /// The stored value does not satisfy the operation's precondition
    /// (`incr` on an absent key or a non-integer value).
    #[error("Invalid value: {0}")]
    Value(String),

    /// The store rejected a single operation without being unavailable.
    #[error("Store operation failed: {0}")]
    Operation(String),
}

impl KvError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn wrapper(wrapper: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Wrapper {
            wrapper: wrapper.into(),
            message: message.into(),
        }
    }

    /// Short, stable name of the error kind, used as a metrics/trace attribute.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Deserialization(_) => ErrorKind::Deserialization,
            Self::Wrapper { .. } => ErrorKind::Wrapper,
            Self::Value(_) => ErrorKind::Value,
            Self::Operation(_) => ErrorKind::Operation,
        }
    }

    /// Whether this error must abort a whole batch instead of being recorded
    /// against a single key.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

/// Discriminant of [`KvError`] without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    StoreUnavailable,
    InvalidArgument,
    Deserialization,
    Wrapper,
    Value,
    Operation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::StoreUnavailable => "store_unavailable",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Deserialization => "deserialization",
            ErrorKind::Wrapper => "wrapper",
            ErrorKind::Value => "value",
            ErrorKind::Operation => "operation",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ConfigError> for KvError {
    fn from(error: ConfigError) -> Self {
        KvError::Configuration(error.to_string())
    }
}

/// Type alias for Result with KvError to simplify function signatures
pub type KvResult<T> = Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailability_aborts_batches() {
        assert!(KvError::unavailable("down").aborts_batch());
        assert!(!KvError::Operation("wrongtype".into()).aborts_batch());
        assert!(!KvError::wrapper("encryption", "bad tag").aborts_batch());
    }

    #[test]
    fn test_wrapper_and_deserialization_are_distinct_kinds() {
        let wrapper = KvError::wrapper("encryption", "tampered");
        let decode = KvError::Deserialization("truncated".into());
        assert_ne!(wrapper.kind(), decode.kind());
        assert_eq!(wrapper.kind().as_str(), "wrapper");
    }

    #[test]
    fn test_config_error_converts_to_configuration() {
        let err: KvError = ConfigError::validation("caches.default.collection", "empty").into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("caches.default.collection"));
    }
}
