use thiserror::Error;

/// Result type for neighbor aggregation
pub type Result<T> = std::result::Result<T, NeighborError>;

/// Errors raised by collaborators and providers.
///
/// None of these reach the caller of the aggregator; they are logged and mapped
/// to partial or empty results.
#[derive(Error, Debug)]
pub enum NeighborError {
    /// IO error occurred
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// URI could not be parsed or is not a file URI
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// File is larger than the reader accepts
    #[error("File too large: {uri} ({size} bytes, limit {limit})")]
    FileTooLarge { uri: String, size: u64, limit: u64 },

    /// A related-files provider failed
    #[error("Provider {owner} failed: {message}")]
    ProviderFailed { owner: String, message: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// TOML configuration could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl NeighborError {
    /// Create an invalid URI error
    pub fn invalid_uri(uri: impl Into<String>) -> Self {
        Self::InvalidUri(uri.into())
    }

    /// Create a provider failure
    pub fn provider(owner: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderFailed {
            owner: owner.into(),
            message: message.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
