use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid regex '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    RemoteStatus { status: u16, url: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Downstream consumer error: {0}")]
    Consumer(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Network error: {0}")]
    Network(String),
}

/// Result type alias for processor operations
pub type Result<T> = std::result::Result<T, ProcessorError>;

impl ProcessorError {
    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new regex error for the given pattern
    pub fn invalid_regex<S: Into<String>>(pattern: S, source: regex::Error) -> Self {
        Self::InvalidRegex {
            pattern: pattern.into(),
            source,
        }
    }

    /// Creates a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Creates a new downstream consumer error
    pub fn consumer<S: Into<String>>(msg: S) -> Self {
        Self::Consumer(msg.into())
    }

    /// Creates a new network error
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }

    /// Returns true if a later attempt may succeed without operator action
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RemoteStatus { .. } | Self::Decode(_) | Self::Network(_) => true,
            Self::Consumer(_) => true,
            _ => false,
        }
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::InvalidRegex { .. } => "config",
            Self::Http(_) | Self::RemoteStatus { .. } | Self::Network(_) => "network",
            Self::Decode(_) => "serialization",
            Self::Consumer(_) => "consumer",
            Self::Metrics(_) => "metrics",
            Self::Io(_) => "io",
            Self::Join(_) => "async",
        }
    }
}
