//! `RoomkeepServer` builder and server loop.
//!
//! This is the entry point for running a roomkeep server. It ties the
//! layers together: transport -> protocol -> session, plus the
//! maintenance loop on the side.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use roomkeep_protocol::{Codec, JsonCodec, SessionConfig, UserId};
use roomkeep_session::{RoomHooks, SessionManager};
use roomkeep_tick::{Clock, SystemClock};
use roomkeep_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;

use crate::RoomkeepError;
use crate::handler::handle_connection;
use crate::maintenance::MaintenanceLoop;

/// Handler for one named application message. Runs under the session
/// lock with the sender's id and the message's `data`.
pub type MessageHandler = Box<dyn Fn(&mut SessionManager, UserId, serde_json::Value) + Send + Sync>;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) sessions: Arc<Mutex<SessionManager>>,
    pub(crate) handlers: HashMap<String, MessageHandler>,
    pub(crate) codec: C,
}

/// Builder for configuring and starting a roomkeep server.
///
/// # Example
///
/// ```rust,no_run
/// use roomkeep::prelude::*;
///
/// # async fn start() -> Result<(), RoomkeepError> {
/// let server = RoomkeepServer::builder()
///     .bind("0.0.0.0:8080")
///     .config(SessionConfig { min_room_members: Some(2), ..Default::default() })
///     .on_message("chat", |sessions, from, data| {
///         if let Some(room) = sessions.user(from).and_then(|u| u.room()) {
///             let _ = sessions.message_room(room, "chat", data);
///         }
///     })
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct RoomkeepServerBuilder {
    bind_addr: String,
    config: SessionConfig,
    room_hooks: RoomHooks,
    lobby_hooks: RoomHooks,
    handlers: HashMap<String, MessageHandler>,
    clock: Arc<dyn Clock>,
}

impl RoomkeepServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            config: SessionConfig::default(),
            room_hooks: RoomHooks::new(),
            lobby_hooks: RoomHooks::new(),
            handlers: HashMap::new(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Hooks shared by every regular room.
    pub fn room_hooks(mut self, hooks: RoomHooks) -> Self {
        self.room_hooks = hooks;
        self
    }

    /// Hooks for the lobby.
    pub fn lobby_hooks(mut self, hooks: RoomHooks) -> Self {
        self.lobby_hooks = hooks;
        self
    }

    /// Registers the handler for application messages called `name`.
    /// A later registration for the same name replaces the earlier one.
    pub fn on_message(
        mut self,
        name: &str,
        handler: impl Fn(&mut SessionManager, UserId, serde_json::Value) + Send + Sync + 'static,
    ) -> Self {
        self.handlers.insert(name.to_owned(), Box::new(handler));
        self
    }

    /// Replaces the time source. Mostly useful in tests.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Binds the listener and builds the server with [`JsonCodec`].
    pub async fn build(self) -> Result<RoomkeepServer<JsonCodec>, RoomkeepError> {
        self.build_with_codec(JsonCodec).await
    }

    /// Binds the listener and builds the server with the given codec.
    pub async fn build_with_codec<C: Codec>(
        self,
        codec: C,
    ) -> Result<RoomkeepServer<C>, RoomkeepError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let sessions = SessionManager::with_hooks(
            self.config,
            self.clock,
            self.room_hooks,
            self.lobby_hooks,
        );

        let state = Arc::new(ServerState {
            sessions: Arc::new(Mutex::new(sessions)),
            handlers: self.handlers,
            codec,
        });

        Ok(RoomkeepServer { transport, state })
    }
}

impl Default for RoomkeepServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound roomkeep server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct RoomkeepServer<C: Codec = JsonCodec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
}

impl RoomkeepServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> RoomkeepServerBuilder {
        RoomkeepServerBuilder::new()
    }
}

impl<C: Codec> RoomkeepServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, RoomkeepError> {
        Ok(self.transport.local_addr()?)
    }

    /// The session manager, shared with every handler and the
    /// maintenance loop. Lock it to inspect or drive state from outside.
    pub fn sessions(&self) -> Arc<Mutex<SessionManager>> {
        Arc::clone(&self.state.sessions)
    }

    /// Runs the accept loop and the maintenance loop forever.
    pub async fn run(self) -> Result<(), RoomkeepError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until `shutdown` completes, then stops the maintenance loop.
    ///
    /// Connections already accepted keep their handler tasks; only new
    /// accepts and maintenance stop.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), RoomkeepError> {
        let maintenance = MaintenanceLoop::for_manager(Arc::clone(&self.state.sessions))
            .await
            .spawn();
        tracing::info!(addr = ?self.transport.local_addr().ok(), "roomkeep server running");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        maintenance.stop().await;
        tracing::info!("roomkeep server stopped");
        Ok(())
    }
}
