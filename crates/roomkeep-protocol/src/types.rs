//! Core protocol types for roomkeep's wire format.
//!
//! Every frame on the wire is an [`Envelope`]. Its [`Payload`] lives in one
//! of two namespaces:
//!
//! - `session`: the lobby/room protocol the server itself speaks
//!   ([`SessionMessage`]).
//! - `app`: named messages defined by the application ([`AppMessage`]).
//!
//! Keeping the namespaces apart means an application can call one of its
//! messages `joinedRoom` without colliding with the server's notification
//! of the same name.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SessionConfig;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identifier of a persistent player identity.
///
/// Assigned when the identity is created and stable for its whole life,
/// across any number of reconnects. Clients present it in `resume` to get
/// their identity back, so it is random (UUID v4) rather than sequential.
///
/// `#[serde(transparent)]` keeps it a plain string on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Generates a fresh random identity.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of a room (the lobby included).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub Uuid);

impl RoomId {
    /// Generates a fresh random room id.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Presentation projections
// ---------------------------------------------------------------------------

/// A room member as shown in listings and membership notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub id: UserId,
    pub username: Option<String>,
}

/// Summary of the room a listed user is in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub size: Option<usize>,
    pub user_count: usize,
    pub lobby: bool,
}

/// One entry of a `listUsers` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: UserId,
    pub username: Option<String>,
    pub room: Option<RoomSummary>,
}

/// One entry of a `listRooms` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListEntry {
    pub id: RoomId,
    pub name: String,
    pub user_count: usize,
    pub users: Vec<MemberEntry>,
    pub size: Option<usize>,
}

// ---------------------------------------------------------------------------
// SessionMessage
// ---------------------------------------------------------------------------

/// The session-layer vocabulary: requests, their responses, and the
/// notifications the server pushes when membership changes.
///
/// Internally tagged with camelCase names, so a join request reads
/// `{ "type": "joinRoom", "id": "..." }` and its answer
/// `{ "type": "joinRoomResponse", "success": true }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionMessage {
    // -- Client -> Server --
    /// Create a new identity bound to this connection.
    Begin,

    /// Rebind an existing identity to this connection.
    Resume { uid: UserId },

    /// List the members of the caller's room.
    ListUsers,

    /// Move the caller into the lobby.
    JoinLobby,

    /// Leave the caller's current room.
    LeaveRoom,

    /// Claim a display name.
    RegisterUsername { username: String },

    /// List all rooms except the lobby.
    ListRooms,

    /// Join the room with the given id.
    JoinRoom { id: RoomId },

    /// Create a room. Both fields fall back to server defaults.
    CreateRoom {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        size: Option<usize>,
    },

    // -- Server -> Client: responses --
    BeginResponse {
        uid: UserId,
        config: SessionConfig,
    },

    /// `config` is only present when `valid` is true.
    ResumeResponse {
        valid: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<SessionConfig>,
    },

    ListUsersResponse { users: Vec<UserEntry> },

    JoinLobbyResponse { success: bool },

    LeaveRoomResponse { success: bool },

    RegisterUsernameResponse { success: bool },

    ListRoomsResponse { rooms: Vec<RoomListEntry> },

    JoinRoomResponse { success: bool },

    CreateRoomResponse { room: RoomListEntry },

    // -- Server -> Client: notifications --
    /// Sent to a user after it joined a room.
    JoinedRoom { name: String },

    /// Sent to a user after it left a room.
    LeftRoom { name: String },

    /// Sent to lobby members when someone joins the lobby.
    LobbyMemberJoined {
        id: UserId,
        username: Option<String>,
    },

    /// Sent to lobby members when someone leaves the lobby.
    LobbyMemberLeft {
        id: UserId,
        username: Option<String>,
    },

    /// Sent to room members when someone joins their room.
    RoomMemberJoined {
        id: UserId,
        username: Option<String>,
    },

    /// Sent to room members when someone leaves their room.
    RoomMemberLeft {
        id: UserId,
        username: Option<String>,
    },

    /// Sent when a request cannot be served at all (e.g. no identity
    /// bound yet). `code` follows HTTP conventions.
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// AppMessage, Payload, Envelope
// ---------------------------------------------------------------------------

/// A named application message. The server routes it by `name` and never
/// looks inside `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMessage {
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// The content of a frame.
///
/// Adjacently tagged:
///   `{ "type": "session", "data": { "type": "begin" } }`
///   `{ "type": "app", "data": { "name": "chat", "data": "hi" } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Payload {
    Session(SessionMessage),
    App(AppMessage),
}

impl From<SessionMessage> for Payload {
    fn from(msg: SessionMessage) -> Self {
        Self::Session(msg)
    }
}

impl From<AppMessage> for Payload {
    fn from(msg: AppMessage) -> Self {
        Self::App(msg)
    }
}

/// The top-level frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-direction sequence number, starting at 0 for each connection.
    pub seq: u64,

    /// Milliseconds since the sender's connection started.
    pub timestamp: u64,

    pub payload: Payload,
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The JSON shapes below are the contract with client code, so each
    //! test pins one shape rather than just round-tripping.

    use super::*;

    fn uid() -> UserId {
        UserId(Uuid::from_u128(0x1234))
    }

    #[test]
    fn test_user_id_serializes_as_plain_string() {
        let json = serde_json::to_value(uid()).unwrap();
        assert_eq!(json, serde_json::json!("00000000-0000-0000-0000-000000001234"));
    }

    #[test]
    fn test_user_id_display_is_hyphenated_uuid() {
        assert_eq!(uid().to_string(), "00000000-0000-0000-0000-000000001234");
    }

    #[test]
    fn test_new_v4_ids_are_distinct() {
        assert_ne!(UserId::new_v4(), UserId::new_v4());
        assert_ne!(RoomId::new_v4(), RoomId::new_v4());
    }

    #[test]
    fn test_session_message_uses_camel_case_tag() {
        let json = serde_json::to_value(SessionMessage::RegisterUsername {
            username: "ana".into(),
        })
        .unwrap();

        assert_eq!(json["type"], "registerUsername");
        assert_eq!(json["username"], "ana");
    }

    #[test]
    fn test_begin_decodes_from_bare_tag() {
        let msg: SessionMessage = serde_json::from_str(r#"{"type":"begin"}"#).unwrap();
        assert_eq!(msg, SessionMessage::Begin);
    }

    #[test]
    fn test_create_room_fields_are_optional() {
        let msg: SessionMessage =
            serde_json::from_str(r#"{"type":"createRoom"}"#).unwrap();
        assert_eq!(
            msg,
            SessionMessage::CreateRoom {
                name: None,
                size: None
            }
        );
    }

    #[test]
    fn test_invalid_resume_omits_config() {
        let json = serde_json::to_value(SessionMessage::ResumeResponse {
            valid: false,
            config: None,
        })
        .unwrap();

        assert_eq!(json["type"], "resumeResponse");
        assert_eq!(json["valid"], false);
        assert!(json.get("config").is_none());
    }

    #[test]
    fn test_begin_response_carries_camel_case_config() {
        let json = serde_json::to_value(SessionMessage::BeginResponse {
            uid: uid(),
            config: SessionConfig::default(),
        })
        .unwrap();

        assert_eq!(json["type"], "beginResponse");
        assert_eq!(json["config"]["reconnectWait"], 10_000);
        assert_eq!(json["config"]["autoJoinLobby"], true);
    }

    #[test]
    fn test_room_list_entry_uses_user_count() {
        let entry = RoomListEntry {
            id: RoomId(Uuid::from_u128(7)),
            name: "Room 1".into(),
            user_count: 2,
            users: vec![MemberEntry {
                id: uid(),
                username: Some("ana".into()),
            }],
            size: Some(4),
        };
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["userCount"], 2);
        assert_eq!(json["size"], 4);
        assert_eq!(json["users"][0]["username"], "ana");
    }

    #[test]
    fn test_member_notification_fields_are_flat() {
        let json = serde_json::to_value(SessionMessage::LobbyMemberJoined {
            id: uid(),
            username: None,
        })
        .unwrap();

        assert_eq!(json["type"], "lobbyMemberJoined");
        assert!(json["username"].is_null());
    }

    #[test]
    fn test_payload_namespaces_are_distinct() {
        let session = serde_json::to_value(Payload::Session(SessionMessage::JoinedRoom {
            name: "Lobby".into(),
        }))
        .unwrap();
        let app = serde_json::to_value(Payload::App(AppMessage {
            name: "joinedRoom".into(),
            data: serde_json::json!({ "x": 1 }),
        }))
        .unwrap();

        assert_eq!(session["type"], "session");
        assert_eq!(session["data"]["type"], "joinedRoom");
        assert_eq!(app["type"], "app");
        assert_eq!(app["data"]["name"], "joinedRoom");
    }

    #[test]
    fn test_app_message_data_defaults_to_null() {
        let payload: Payload =
            serde_json::from_str(r#"{"type":"app","data":{"name":"ping"}}"#).unwrap();
        match payload {
            Payload::App(msg) => {
                assert_eq!(msg.name, "ping");
                assert!(msg.data.is_null());
            }
            other => panic!("expected app payload, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_session_type_returns_error() {
        let result: Result<SessionMessage, _> =
            serde_json::from_str(r#"{"type":"flyToMoon"}"#);
        assert!(result.is_err());
    }
}
