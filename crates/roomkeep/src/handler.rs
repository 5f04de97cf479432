//! Per-connection handler: outbound writer, inbound dispatch.
//!
//! Each accepted connection gets two Tokio tasks:
//!   1. A writer that drains the connection's outbound queue, wraps each
//!      payload in an [`Envelope`] and writes it to the socket.
//!   2. This handler, which reads frames and dispatches them to the
//!      session manager under its lock.
//!
//! Replies go through the same queue as notifications, so everything a
//! client sees carries one gap-free `seq` sequence in the order the
//! session manager produced it.

use std::sync::Arc;

use roomkeep_protocol::{AppMessage, Codec, Envelope, Payload, SessionMessage, UserId};
use roomkeep_session::{
    ConnectionHandle, Outbound, OutboundReceiver, SessionError, SessionManager,
};
use roomkeep_transport::{Connection, ConnectionId, WebSocketConnection};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::RoomkeepError;
use crate::server::ServerState;

/// Reports the connection as gone when the handler exits.
///
/// Runs even if the handler panics. `Drop` is synchronous, so the
/// disconnect is spawned onto the runtime.
struct DisconnectGuard {
    conn_id: ConnectionId,
    sessions: Arc<Mutex<SessionManager>>,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let conn_id = self.conn_id;
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            sessions.lock().await.disconnect(conn_id);
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), RoomkeepError> {
    let conn = Arc::new(conn);
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let (handle, rx) = ConnectionHandle::channel(conn_id);
    tokio::spawn(write_outbound(Arc::clone(&conn), rx, Arc::clone(&state)));

    let _guard = DisconnectGuard {
        conn_id,
        sessions: Arc::clone(&state.sessions),
    };

    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::debug!(%conn_id, "connection closed cleanly");
                break;
            }
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "recv error");
                break;
            }
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
                send_error(&handle, 400, &format!("malformed frame: {e}"));
                continue;
            }
        };

        match envelope.payload {
            Payload::Session(msg) => handle_session_message(&state, &handle, msg).await,
            Payload::App(msg) => handle_app_message(&state, &handle, msg).await,
        }
    }

    // _guard drops here -> disconnect fires.
    Ok(())
}

/// Drains the outbound queue into the socket.
///
/// Ends when every sender is gone (the user was detached and the handler
/// exited), on [`Outbound::Close`], or when the socket fails.
async fn write_outbound<C: Codec>(
    conn: Arc<WebSocketConnection>,
    mut rx: OutboundReceiver,
    state: Arc<ServerState<C>>,
) {
    let conn_id = conn.id();
    let start = Instant::now();
    let mut seq: u64 = 0;

    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Deliver(payload) => {
                let envelope = Envelope {
                    seq: next_seq(&mut seq),
                    timestamp: start.elapsed().as_millis() as u64,
                    payload,
                };
                let bytes = match state.codec.encode(&envelope) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(%conn_id, error = %e, "failed to encode outbound frame");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&bytes).await {
                    tracing::debug!(%conn_id, error = %e, "send failed, writer exiting");
                    break;
                }
            }
            Outbound::Close => {
                tracing::debug!(%conn_id, "closing connection");
                if let Err(e) = conn.close().await {
                    tracing::debug!(%conn_id, error = %e, "close failed");
                }
                break;
            }
        }
    }
}

/// Handles a session-protocol request. Every request gets exactly one
/// reply on this connection.
async fn handle_session_message<C: Codec>(
    state: &Arc<ServerState<C>>,
    handle: &ConnectionHandle,
    msg: SessionMessage,
) {
    let conn_id = handle.id();
    let mut sessions = state.sessions.lock().await;

    match msg {
        SessionMessage::Begin => {
            // the beginResponse is queued by the manager itself
            sessions.begin(handle.clone());
            return;
        }
        SessionMessage::Resume { uid } => {
            let reply = match sessions.resume(uid, handle.clone()) {
                Ok(()) => SessionMessage::ResumeResponse {
                    valid: true,
                    config: Some(sessions.config().clone()),
                },
                Err(e) => {
                    tracing::debug!(%conn_id, user_id = %uid, error = %e, "resume rejected");
                    SessionMessage::ResumeResponse {
                        valid: false,
                        config: None,
                    }
                }
            };
            reply_with(handle, reply);
            return;
        }
        _ => {}
    }

    let Some(uid) = sessions.user_for_connection(conn_id) else {
        tracing::debug!(%conn_id, "request on connection with no session");
        send_error(handle, 401, "no session: send begin or resume first");
        return;
    };

    let reply = match msg {
        SessionMessage::ListUsers => match sessions.list_users_in_room(uid) {
            Ok(users) => SessionMessage::ListUsersResponse { users },
            Err(e) => {
                send_error(handle, e.code(), &e.to_string());
                return;
            }
        },
        SessionMessage::JoinLobby => SessionMessage::JoinLobbyResponse {
            success: log_outcome(uid, "joinLobby", sessions.join_lobby(uid)),
        },
        SessionMessage::LeaveRoom => SessionMessage::LeaveRoomResponse {
            success: log_outcome(uid, "leaveRoom", sessions.leave_room(uid)),
        },
        SessionMessage::RegisterUsername { username } => SessionMessage::RegisterUsernameResponse {
            success: log_outcome(
                uid,
                "registerUsername",
                sessions.register_username(uid, &username),
            ),
        },
        SessionMessage::ListRooms => SessionMessage::ListRoomsResponse {
            rooms: sessions.list_rooms(),
        },
        SessionMessage::JoinRoom { id } => SessionMessage::JoinRoomResponse {
            success: log_outcome(uid, "joinRoom", sessions.join_room(uid, id)),
        },
        SessionMessage::CreateRoom { name, size } => {
            let rid = sessions.create_room(name, size);
            let Some(room) = sessions.room_entry(rid) else {
                send_error(handle, 500, "room vanished after creation");
                return;
            };
            SessionMessage::CreateRoomResponse { room }
        }
        other => {
            tracing::debug!(%conn_id, ?other, "ignoring server-to-client message from client");
            send_error(handle, 400, "unexpected message type");
            return;
        }
    };
    reply_with(handle, reply);
}

/// Routes an application message to its registered handler.
async fn handle_app_message<C: Codec>(
    state: &Arc<ServerState<C>>,
    handle: &ConnectionHandle,
    msg: AppMessage,
) {
    let conn_id = handle.id();
    let Some(handler) = state.handlers.get(&msg.name) else {
        tracing::debug!(%conn_id, name = %msg.name, "no handler for app message");
        return;
    };

    let mut sessions = state.sessions.lock().await;
    let Some(uid) = sessions.user_for_connection(conn_id) else {
        tracing::debug!(%conn_id, name = %msg.name, "app message before begin, ignored");
        return;
    };
    tracing::debug!(user_id = %uid, name = %msg.name, "routing app message");
    handler(&mut *sessions, uid, msg.data);
}

/// Maps an operation result to the `success` flag of its reply.
fn log_outcome(uid: UserId, op: &str, result: Result<(), SessionError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(user_id = %uid, op, error = %e, "request failed");
            false
        }
    }
}

fn reply_with(handle: &ConnectionHandle, msg: SessionMessage) {
    handle.deliver(Payload::Session(msg));
}

/// Queues a `SessionMessage::Error` for the client.
fn send_error(handle: &ConnectionHandle, code: u16, message: &str) {
    reply_with(
        handle,
        SessionMessage::Error {
            code,
            message: message.to_string(),
        },
    );
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
