//! # Error Types
//!
//! A single error enum for the fallible parts of the library: configuration,
//! URL handling, HTTP and WebSocket plumbing, and payload decoding.
//!
//! The transports themselves never hand these errors to a consumer. A failed
//! connect or fetch only ever surfaces as `connected = false`, and a payload
//! that fails to decode is logged and dropped. `SyncError` is what the
//! building blocks (config loading, `ApiClient`, the decoders) return so the
//! transport loops can decide what to do with the failure.

use thiserror::Error;

/// Everything that can go wrong below the unified contract.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The configured base URL, or a path joined onto it, is not a valid URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A configuration value is present but unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The HTTP request could not be built or sent, or its body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The WebSocket handshake or a frame-level operation failed.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A payload was not valid JSON or did not match the expected shape.
    #[error("Decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    /// Reading a config file failed.
    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),
}
