//! A persistent player identity.

use std::time::{Duration, Instant};

use roomkeep_protocol::{AppMessage, MemberEntry, Payload, RoomId, SessionMessage, UserId};
use roomkeep_transport::ConnectionId;

use crate::ConnectionHandle;

/// A player identity, with or without a live connection.
///
/// A `User` outlives its connections. When the socket drops, the user
/// keeps its id, name and room and records when it went away; the
/// maintenance pass evicts it once the grace period has run out.
///
/// ```text
///   connected ──(disconnect)──> disconnected ──(grace elapsed)──> evicted
///       ^                            │
///       └──────────(resume)──────────┘
/// ```
///
/// Room membership is owned by the
/// [`SessionManager`](crate::SessionManager), so the mutators here are
/// crate-private; collaborators get read access and `message`.
#[derive(Debug)]
pub struct User {
    id: UserId,
    username: Option<String>,
    room: Option<RoomId>,
    connection: Option<ConnectionHandle>,
    disconnected_since: Option<Instant>,
    created: Instant,
}

impl User {
    pub(crate) fn new(id: UserId, now: Instant) -> Self {
        Self {
            id,
            username: None,
            room: None,
            connection: None,
            disconnected_since: Some(now),
            created: now,
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The room this user is a member of, if any.
    pub fn room(&self) -> Option<RoomId> {
        self.room
    }

    pub fn connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(ConnectionHandle::id)
    }

    /// When the connection was lost. `None` while connected.
    pub fn disconnected_since(&self) -> Option<Instant> {
        self.disconnected_since
    }

    /// How long the user has been without a connection at `now`.
    pub fn disconnected_for(&self, now: Instant) -> Option<Duration> {
        self.disconnected_since
            .map(|since| now.saturating_duration_since(since))
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    /// Sends a named application message. Dropped if not connected.
    pub fn message(&self, name: impl Into<String>, data: serde_json::Value) -> bool {
        self.deliver(Payload::App(AppMessage {
            name: name.into(),
            data,
        }))
    }

    pub fn member_entry(&self) -> MemberEntry {
        MemberEntry {
            id: self.id,
            username: self.username.clone(),
        }
    }

    // -- crate-private mutation ---------------------------------------------

    /// Sends a session-namespace message. Dropped if not connected.
    pub(crate) fn notify(&self, msg: SessionMessage) -> bool {
        self.deliver(Payload::Session(msg))
    }

    fn deliver(&self, payload: Payload) -> bool {
        match &self.connection {
            Some(conn) => conn.deliver(payload),
            None => false,
        }
    }

    /// Attaches a connection, returning the one it replaces.
    pub(crate) fn set_connection(&mut self, conn: ConnectionHandle) -> Option<ConnectionHandle> {
        self.disconnected_since = None;
        self.connection.replace(conn)
    }

    /// Drops the connection and starts the grace period.
    pub(crate) fn detach(&mut self, now: Instant) -> Option<ConnectionHandle> {
        let conn = self.connection.take();
        if conn.is_some() {
            self.disconnected_since = Some(now);
        }
        conn
    }

    pub(crate) fn set_room(&mut self, room: Option<RoomId>) {
        self.room = room;
    }

    pub(crate) fn set_username(&mut self, name: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.username, name)
    }
}

#[cfg(test)]
mod tests {
    use roomkeep_transport::ConnectionId;

    use super::*;
    use crate::Outbound;

    #[test]
    fn test_new_user_starts_disconnected() {
        let now = Instant::now();
        let user = User::new(UserId::new_v4(), now);
        assert!(!user.connected());
        assert_eq!(user.disconnected_since(), Some(now));
        assert!(user.room().is_none());
    }

    #[test]
    fn test_set_connection_clears_disconnected_since() {
        let now = Instant::now();
        let mut user = User::new(UserId::new_v4(), now);
        let (conn, _rx) = ConnectionHandle::channel(ConnectionId::new(1));

        assert!(user.set_connection(conn).is_none());
        assert!(user.connected());
        assert_eq!(user.connection_id(), Some(ConnectionId::new(1)));
        assert!(user.disconnected_since().is_none());
    }

    #[test]
    fn test_detach_records_time_once() {
        let t0 = Instant::now();
        let mut user = User::new(UserId::new_v4(), t0);
        let (conn, _rx) = ConnectionHandle::channel(ConnectionId::new(1));
        user.set_connection(conn);

        let t1 = t0 + Duration::from_secs(5);
        assert!(user.detach(t1).is_some());
        // a second detach has nothing to drop and keeps the first time
        assert!(user.detach(t1 + Duration::from_secs(5)).is_none());
        assert_eq!(user.disconnected_for(t1 + Duration::from_secs(7)), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_message_uses_app_namespace() {
        let mut user = User::new(UserId::new_v4(), Instant::now());
        let (conn, mut rx) = ConnectionHandle::channel(ConnectionId::new(1));
        user.set_connection(conn);

        assert!(user.message("chat", serde_json::json!("hi")));
        match rx.try_recv().unwrap() {
            Outbound::Deliver(Payload::App(msg)) => {
                assert_eq!(msg.name, "chat");
                assert_eq!(msg.data, serde_json::json!("hi"));
            }
            other => panic!("expected app payload, got {other:?}"),
        }
    }

    #[test]
    fn test_message_without_connection_is_dropped() {
        let user = User::new(UserId::new_v4(), Instant::now());
        assert!(!user.message("chat", serde_json::Value::Null));
    }
}
