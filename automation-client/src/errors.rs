use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutomationError {
    #[error("Invalid tree scope: {0}")]
    InvalidScope(String),

    #[error("Required argument is missing: {0}")]
    NullArgument(String),

    #[error("Argument type mismatch: {0}")]
    ArgumentTypeMismatch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A cache request was mutated while active, or popped out of order.
    #[error("Operation not valid in the current state: {0}")]
    InStateViolation(String),

    /// The value was not part of the cache request that produced the element.
    #[error("Not in cache: {0}")]
    NotInCache(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Pattern not supported: {0}")]
    PatternNotSupported(String),

    #[error("Element not available: {0}")]
    ElementNotAvailable(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
