//! WolfRaft Error Types

use thiserror::Error;

/// Result type alias for WolfRaft operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfRaft error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Local bind address '{0}' is not advertisable")]
    NotAdvertisable(String),

    // Membership errors
    #[error("Member '{member}' has role '{role}' whereas expected role '{expected}'")]
    RoleMismatch {
        member: String,
        role: String,
        expected: String,
    },

    #[error("Member '{member}' has invalid tags: {reason}")]
    MemberTags { member: String, reason: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("TLS error: {0}")]
    Tls(String),

    // Health checking
    #[error("Peer does not implement health checking")]
    HealthUnimplemented,

    // Serialization
    #[error("Message serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // Snapshot errors
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Snapshot metadata error: {0}")]
    SnapshotMeta(#[from] serde_json::Error),

    #[error("Cipher error: {0}")]
    Cipher(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_) | Error::ConnectionFailed { .. } | Error::Network(_)
        )
    }
}
