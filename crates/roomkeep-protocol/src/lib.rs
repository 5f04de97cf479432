//! Wire protocol for roomkeep.
//!
//! - **Types**: [`Envelope`], [`Payload`], [`SessionMessage`],
//!   [`AppMessage`] and the listing projections that travel inside them.
//! - **Identities**: [`UserId`] and [`RoomId`].
//! - **Config**: [`SessionConfig`], advertised to clients on `begin`.
//! - **Codec**: [`Codec`] and [`JsonCodec`].
//!
//! ```text
//! Transport (bytes) -> Protocol (Envelope) -> Session (users, rooms)
//! ```

mod codec;
mod config;
mod error;
mod types;

pub use codec::{Codec, JsonCodec};
pub use config::SessionConfig;
pub use error::ProtocolError;
pub use types::{
    AppMessage, Envelope, MemberEntry, Payload, RoomId, RoomListEntry, RoomSummary,
    SessionMessage, UserEntry, UserId,
};
