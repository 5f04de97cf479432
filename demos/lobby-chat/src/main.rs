//! Lobby chat: a roomkeep server where people meet in the lobby, get
//! grouped into rooms, and chat with whoever shares their room.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 0.0.0.0:8080, everyone lands in the lobby
//! lobby-chat
//!
//! # Form rooms of three automatically, close them after ten minutes
//! lobby-chat --auto-create-rooms --min-room-members 3 --room-life 600000
//!
//! # Start from a file, then override single options
//! lobby-chat --config roomkeep.json --port 9000
//! ```

use std::path::PathBuf;

use clap::Parser;
use roomkeep::prelude::*;
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Lobby chat server
#[derive(Parser, Debug)]
#[command(name = "lobby-chat")]
#[command(about = "Chat rooms with a lobby, built on roomkeep")]
#[command(version)]
struct Args {
    /// JSON config file; command-line options override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Maintenance tick interval in milliseconds
    #[arg(long)]
    game_loop_speed: Option<u64>,

    /// Capacity of rooms created without a size
    #[arg(long)]
    default_room_size: Option<usize>,

    /// Create a room whenever the lobby holds --min-room-members people
    #[arg(long)]
    auto_create_rooms: bool,

    /// Close rooms that fall below this many members
    #[arg(long)]
    min_room_members: Option<usize>,

    /// Milliseconds a disconnected user may take to come back
    #[arg(long)]
    reconnect_wait: Option<u64>,

    /// Same, for users that are in no room
    #[arg(long)]
    reconnect_wait_roomless: Option<u64>,

    /// Close rooms this many milliseconds after creation
    #[arg(long)]
    room_life: Option<u64>,

    /// Do not put new and departing users in the lobby
    #[arg(long)]
    no_auto_join_lobby: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Applies the command-line options on top of `config`.
    fn apply_overrides(&self, mut config: SessionConfig) -> SessionConfig {
        if let Some(speed) = self.game_loop_speed {
            config.game_loop_speed = speed;
        }
        if self.default_room_size.is_some() {
            config.default_room_size = self.default_room_size;
        }
        if self.auto_create_rooms {
            config.auto_create_rooms = true;
        }
        if self.min_room_members.is_some() {
            config.min_room_members = self.min_room_members;
        }
        if self.reconnect_wait.is_some() {
            config.reconnect_wait = self.reconnect_wait;
        }
        if self.reconnect_wait_roomless.is_some() {
            config.reconnect_wait_roomless = self.reconnect_wait_roomless;
        }
        if self.room_life.is_some() {
            config.room_life = self.room_life;
        }
        if self.no_auto_join_lobby {
            config.auto_join_lobby = false;
        }
        config
    }

    fn session_config(&self) -> Result<SessionConfig, RoomkeepError> {
        let base = match &self.config {
            Some(path) => load_config(path)?,
            None => SessionConfig::default(),
        };
        Ok(self.apply_overrides(base))
    }
}

// ---------------------------------------------------------------------------
// Chat behavior
// ---------------------------------------------------------------------------

fn roster(ctx: &RoomContext<'_>) -> serde_json::Value {
    let members: Vec<_> = ctx
        .members()
        .map(|user| json!({ "id": user.id(), "username": user.username() }))
        .collect();
    json!({ "room": ctx.room().name(), "members": members })
}

fn room_hooks() -> RoomHooks {
    RoomHooks::new()
        .on_init(|ctx| {
            ctx.data_mut().insert("opened".into(), json!(true));
        })
        .on_new_member(|ctx, _user| {
            ctx.message_members("roster", roster(ctx));
        })
        .on_member_leaves(|ctx, _user| {
            ctx.message_members("roster", roster(ctx));
        })
        .on_close(|ctx| {
            tracing::info!(
                room_id = %ctx.room().id(),
                age_ms = ctx.age().as_millis() as u64,
                filled = ctx.room().has_reached_min(),
                "chat room closed"
            );
        })
}

fn lobby_hooks() -> RoomHooks {
    RoomHooks::new().on_new_member(|ctx, _user| {
        let waiting = ctx.room().member_count();
        ctx.message_members("lobbyCount", json!({ "waiting": waiting }));
    })
}

/// Relays a chat line to everyone in the sender's room.
fn relay_chat(sessions: &mut SessionManager, from: UserId, text: serde_json::Value) {
    let Some(user) = sessions.user(from) else {
        return;
    };
    let Some(room) = user.room() else {
        tracing::debug!(user_id = %from, "chat from a user in no room, dropped");
        return;
    };
    let line = json!({ "from": from, "username": user.username(), "text": text });
    if let Err(e) = sessions.message_room(room, "chat", line) {
        tracing::debug!(user_id = %from, error = %e, "chat relay failed");
    }
}

fn server_builder(args: &Args) -> Result<RoomkeepServerBuilder, RoomkeepError> {
    Ok(RoomkeepServer::builder()
        .bind(&args.bind_addr())
        .config(args.session_config()?)
        .room_hooks(room_hooks())
        .lobby_hooks(lobby_hooks())
        .on_message("chat", relay_chat))
}

// ---------------------------------------------------------------------------
// Server bootstrap
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let server = server_builder(&args)?.build().await?;
    tracing::info!(addr = %server.local_addr()?, "lobby chat listening");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;
    Ok(())
}
