//! Unified error type for the roomkeep server.

use std::path::PathBuf;

use roomkeep_protocol::ProtocolError;
use roomkeep_session::SessionError;
use roomkeep_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RoomkeepError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The configuration file could not be read or parsed.
    #[error("invalid config file {path:?}: {message}")]
    Config { path: PathBuf, message: String },
}
