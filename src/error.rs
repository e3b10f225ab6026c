//! Error types for the offline-cache library.

use thiserror::Error;

/// Errors that can occur while installing the agent or serving requests.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level failure from the HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during cache storage operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pre-cached asset answered with a non-success status.
    #[error("Request for {url} failed with status {status}")]
    BadStatus {
        /// URL of the asset that failed.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },

    /// A URL could not be parsed or resolved against the origin.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The asset list names the same request twice.
    #[error("Duplicate asset in pre-cache list: {0}")]
    DuplicateAsset(String),

    /// A lifecycle transition was requested from the wrong state.
    #[error("Invalid agent state: {0}")]
    InvalidState(String),

    /// The named bucket does not exist.
    #[error("Cache bucket not found: {0}")]
    BucketNotFound(String),

    /// A stored entry could not be decoded.
    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    /// Configuration file could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration or cache entry could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// A specialized `Result` type for offline-cache operations.
pub type Result<T> = std::result::Result<T, Error>;
