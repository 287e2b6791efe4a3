use thiserror::Error;

/// Errors raised while serving resources or routing calls across the bridge.
///
/// Payloads are plain strings so the error can be cloned into host events
/// and posted across threads.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("resource not found: {path}")]
    ResourceNotFound { path: String },
    #[error("unknown operation `{operation}` on object `{object}`")]
    UnknownOperation { object: String, operation: String },
    #[error("unknown object: {0}")]
    UnknownObject(String),
    #[error("argument {index} of `{operation}` could not be decoded: {reason}")]
    ArgumentDecode {
        operation: String,
        index: usize,
        reason: String,
    },
    #[error("script evaluation failed: {0}")]
    ScriptEvaluation(String),
    #[error("`{name}` is already registered in this window")]
    DuplicateRegistration { name: String },
    #[error("`{0}` is not a valid script identifier")]
    InvalidName(String),
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("content source cannot change after the first completed load")]
    ContentSourceLocked,
    #[error("unsupported url scheme: {0}")]
    UnsupportedScheme(String),
    #[error("native call failed: {0}")]
    Native(String),
    #[error("native call did not complete within {millis}ms")]
    CallTimeout { millis: u64 },
    #[error("bridge peer disconnected")]
    Disconnected,
    #[error("script host error: {0}")]
    Host(String),
}

impl BridgeError {
    /// Whether the error originates from the resource table lookup.
    pub fn is_resource_miss(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
