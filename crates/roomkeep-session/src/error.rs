//! Error types for the session layer.

use roomkeep_protocol::{RoomId, UserId};

/// Expected, recoverable failures of session operations.
///
/// None of these ever unwinds a connection handler or the maintenance
/// loop; the handler turns them into `{success: false}` style replies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No identity with this id exists (never did, or was evicted).
    #[error("no session for user {0}")]
    InvalidSession(UserId),

    /// Another registered user already holds this name.
    #[error("username {0:?} is taken")]
    NameTaken(String),

    #[error("room {0} is full")]
    RoomFull(RoomId),

    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    /// The room's `should_allow_user` hook declined the user.
    #[error("room {0} rejected the user")]
    RejectedByPolicy(RoomId),

    /// The lobby lives as long as the manager and cannot be closed.
    #[error("the lobby cannot be closed")]
    LobbyIsPermanent,
}

impl SessionError {
    /// HTTP-style status code used in `error` frames.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidSession(_) => 401,
            Self::RejectedByPolicy(_) | Self::LobbyIsPermanent => 403,
            Self::RoomNotFound(_) => 404,
            Self::NameTaken(_) | Self::RoomFull(_) => 409,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_maps_each_variant() {
        let uid = UserId::new_v4();
        let rid = RoomId::new_v4();
        assert_eq!(SessionError::InvalidSession(uid).code(), 401);
        assert_eq!(SessionError::NameTaken("a".into()).code(), 409);
        assert_eq!(SessionError::RoomFull(rid).code(), 409);
        assert_eq!(SessionError::RoomNotFound(rid).code(), 404);
        assert_eq!(SessionError::RejectedByPolicy(rid).code(), 403);
        assert_eq!(SessionError::LobbyIsPermanent.code(), 403);
    }

    #[test]
    fn test_display_names_the_room() {
        let rid = RoomId::new_v4();
        assert_eq!(
            SessionError::RoomFull(rid).to_string(),
            format!("room {rid} is full")
        );
    }
}
