//! Error types for the transport seam and the decode pipeline.

use thiserror::Error;

/// Errors reported by a [`MoqTransport`](crate::transport::MoqTransport)
/// implementation or delivered through its event channels.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Origin context could not be created.
    #[error("origin setup failed: {0}")]
    Origin(String),
    /// Session handshake with the relay failed.
    #[error("session connect failed: {0}")]
    Connect(String),
    /// The relay reported a session-level failure after connecting.
    #[error("session error: {0}")]
    Session(String),
    /// The named broadcast could not be consumed.
    #[error("broadcast consume failed: {0}")]
    Consume(String),
    /// Catalog fetch or parse error.
    #[error("catalog error: {0}")]
    Catalog(String),
    /// Track subscription failed.
    #[error("track subscription failed: {0}")]
    Subscription(String),
    /// The stream or a subscription closed unexpectedly.
    #[error("stream closed: {0}")]
    StreamClosed(String),
}

/// Errors from decoder construction or frame decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Decoder or converter could not be built.
    #[error("decoder initialization failed: {0}")]
    Init(String),
    /// The codec rejected or failed to decode a frame.
    #[error("decode failed: {0}")]
    Codec(String),
    /// A decoded picture had a layout the pipeline cannot convert.
    #[error("unsupported picture format: {0}")]
    Format(String),
}
