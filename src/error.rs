use thiserror::Error;

pub type Result<T> = std::result::Result<T, GrabError>;

#[derive(Error, Debug)]
pub enum GrabError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("Could not connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout occurred during {operation}")]
    Timeout { operation: String },

    #[error("TLS error: {0}")]
    Tls(#[from] openssl::ssl::Error),

    #[error("TLS setup error: {0}")]
    TlsSetup(#[from] openssl::error::ErrorStack),

    #[error("{protocol} protocol error: {details}")]
    Protocol { protocol: String, details: String },

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid target format: {0}")]
    InvalidTarget(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl GrabError {
    pub fn protocol(protocol: &str, details: impl Into<String>) -> Self {
        GrabError::Protocol {
            protocol: protocol.to_string(),
            details: details.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        GrabError::Timeout {
            operation: operation.into(),
        }
    }

    /// True when the error came from the connection deadline rather than the peer.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GrabError::Timeout { .. })
    }
}
