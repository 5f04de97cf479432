//! Error types for the protocol layer.

/// Errors raised while turning frames into bytes and back.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes were not a valid frame: malformed JSON, an unknown
    /// message type, or missing fields.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but is not acceptable in this direction, such as
    /// a server-only message sent by a client.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
