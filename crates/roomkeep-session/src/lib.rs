//! Users, rooms and the lobby for roomkeep.
//!
//! This crate is the state machine at the center of the server:
//!
//! - [`User`]: a persistent identity that survives reconnects.
//! - [`Room`]: a capacity-bounded member list; one of them is the lobby.
//! - [`RoomHooks`] / [`RoomContext`]: per-room extension points.
//! - [`SessionManager`]: owns all of the above, binds connections to
//!   users, and runs the periodic maintenance pass ([`TickReport`]).
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)     <- locks the manager per event and per tick
//!     |
//! Session (this crate)
//!     |
//! Protocol / Tick / Transport (below) <- ids and messages, clock, ConnectionId
//! ```
//!
//! Nothing here does I/O. Outbound messages are pushed into each
//! connection's queue ([`ConnectionHandle`]) and written elsewhere.

mod connection;
mod error;
mod hooks;
mod manager;
mod room;
mod user;

pub use connection::{ConnectionHandle, Outbound, OutboundReceiver, OutboundSender};
pub use error::SessionError;
pub use hooks::{RoomContext, RoomHooks};
pub use manager::{DEFAULT_ROOM_NAME, SessionManager, TickReport};
pub use room::Room;
pub use user::User;
