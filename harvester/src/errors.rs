use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Element is detached from DOM: {0}")]
    ElementDetached(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Platform-specific error: {0}")]
    PlatformError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Browser extension is not connected: {0}")]
    NotConnected(String),

    #[error("Every locator strategy failed: {0}")]
    StrategiesExhausted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HarvestError {
    /// Session-level failures are the ones worth a failure snapshot; element-level
    /// misses are part of normal operation.
    pub fn is_session_level(&self) -> bool {
        matches!(
            self,
            HarvestError::NotConnected(_)
                | HarvestError::StrategiesExhausted(_)
                | HarvestError::PlatformError(_)
                | HarvestError::Timeout(_)
        )
    }
}
