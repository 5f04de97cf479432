//! # Roomkeep
//!
//! Multiplayer session, room and lobby server.
//!
//! Clients connect over WebSocket and get a persistent identity that
//! survives reconnects for a configurable grace period. Identities live in
//! the lobby or in capacity-bounded rooms, and a periodic maintenance pass
//! expires old rooms, spins up new ones from a crowded lobby, prunes
//! under-populated ones, and evicts identities whose grace ran out.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roomkeep::prelude::*;
//!
//! # async fn start() -> Result<(), RoomkeepError> {
//! let server = RoomkeepServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .config(load_config("roomkeep.json")?)
//!     .room_hooks(RoomHooks::new().on_new_member(|ctx, user| {
//!         ctx.message_members("arrived", serde_json::json!({ "id": user }));
//!     }))
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

pub mod config;
mod error;
mod handler;
pub mod maintenance;
mod server;

pub use config::load_config;
pub use error::RoomkeepError;
pub use maintenance::{MaintenanceHandle, MaintenanceLoop};
pub use server::{MessageHandler, RoomkeepServer, RoomkeepServerBuilder};

/// Everything a server application usually needs.
pub mod prelude {
    pub use crate::{
        MaintenanceHandle, MaintenanceLoop, MessageHandler, RoomkeepError, RoomkeepServer,
        RoomkeepServerBuilder, load_config,
    };
    pub use roomkeep_protocol::{
        AppMessage, Envelope, Payload, RoomId, RoomListEntry, SessionConfig, SessionMessage,
        UserEntry, UserId,
    };
    pub use roomkeep_session::{
        ConnectionHandle, Room, RoomContext, RoomHooks, SessionError, SessionManager, TickReport,
        User,
    };
    pub use roomkeep_tick::{Clock, ManualClock, SystemClock};
}
