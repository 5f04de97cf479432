//! The session manager: every user, every room, and the maintenance pass.
//!
//! # Concurrency
//!
//! `SessionManager` is plain data behind `&mut self`. The server wraps it
//! in a single `tokio::sync::Mutex`, and every connection event and every
//! maintenance pass runs as one critical section. Nothing in here awaits,
//! so a multi-step change like "leave the old room, join the new one"
//! is never observed halfway.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use roomkeep_protocol::{
    RoomId, RoomListEntry, SessionConfig, SessionMessage, UserEntry, UserId,
};
use roomkeep_tick::Clock;
use roomkeep_transport::ConnectionId;
use tracing::{debug, info, warn};

use crate::{ConnectionHandle, Room, RoomContext, RoomHooks, SessionError, User};

/// Name given to rooms created without one.
pub const DEFAULT_ROOM_NAME: &str = "Nameless Room";

/// What one maintenance pass did, in the order it did it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Rooms closed because they outlived `roomLife`.
    pub expired_rooms: Vec<RoomId>,
    /// The room created from lobby members, if any.
    pub created_room: Option<RoomId>,
    /// Rooms closed for being below `minRoomMembers`.
    pub pruned_rooms: Vec<RoomId>,
    /// Users whose reconnect grace period ran out.
    pub evicted_users: Vec<UserId>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.expired_rooms.is_empty()
            && self.created_room.is_none()
            && self.pruned_rooms.is_empty()
            && self.evicted_users.is_empty()
    }
}

/// Owns all users and rooms, and binds connections to users.
///
/// ## Registries
///
/// - `users`: every known identity, connected or in its grace period.
/// - `rooms`: every room except the lobby, in creation order.
/// - `lobby`: the one permanent room.
/// - `connections`: live connection -> bound user.
/// - `usernames`: registered name -> owner, kept in step with
///   `User::username`.
///
/// ## Invariant
///
/// A user's `room()` is `Some(r)` exactly when `r`'s member list holds
/// that user, once. Only this type mutates either side.
pub struct SessionManager {
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    users: IndexMap<UserId, User>,
    rooms: IndexMap<RoomId, Room>,
    lobby: Room,
    connections: HashMap<ConnectionId, UserId>,
    usernames: HashMap<String, UserId>,
    room_hooks: Arc<RoomHooks>,
    auto_room_count: u64,
}

impl SessionManager {
    /// Creates a manager with no hooks.
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_hooks(config, clock, RoomHooks::new(), RoomHooks::new())
    }

    /// Creates a manager whose rooms use `room_hooks` and whose lobby uses
    /// `lobby_hooks`. The lobby's `init` hook fires here.
    pub fn with_hooks(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        room_hooks: RoomHooks,
        lobby_hooks: RoomHooks,
    ) -> Self {
        let now = clock.now();
        let mut manager = Self {
            config,
            clock,
            users: IndexMap::new(),
            rooms: IndexMap::new(),
            lobby: Room::lobby(Arc::new(lobby_hooks), now),
            connections: HashMap::new(),
            usernames: HashMap::new(),
            room_hooks: Arc::new(room_hooks),
            auto_room_count: 0,
        };
        let lobby_id = manager.lobby.id();
        manager.fire(lobby_id, now, |hooks, ctx| hooks.fire_init(ctx));
        info!(lobby_id = %lobby_id, "session manager created");
        manager
    }

    // -----------------------------------------------------------------------
    // Identity lifecycle
    // -----------------------------------------------------------------------

    /// Creates a new identity bound to `conn`.
    ///
    /// The `beginResponse` goes out on `conn` before anything else, then
    /// the user joins the lobby if `autoJoinLobby` is set.
    pub fn begin(&mut self, conn: ConnectionHandle) -> UserId {
        let now = self.clock.now();
        let conn_id = conn.id();
        self.release_connection(conn_id, now);

        let uid = UserId::new_v4();
        let mut user = User::new(uid, now);
        user.set_connection(conn);
        user.notify(SessionMessage::BeginResponse {
            uid,
            config: self.config.clone(),
        });
        self.users.insert(uid, user);
        self.connections.insert(conn_id, uid);
        info!(user_id = %uid, conn_id = %conn_id, "user created");

        if self.config.auto_join_lobby {
            let lobby_id = self.lobby.id();
            if let Err(e) = self.add_member(lobby_id, uid, now) {
                debug!(user_id = %uid, error = %e, "new user not admitted to lobby");
            }
        }
        uid
    }

    /// Rebinds an existing identity to `conn`. Room membership is kept.
    ///
    /// # Errors
    /// [`SessionError::InvalidSession`] if `uid` is unknown; nothing
    /// changes in that case.
    pub fn resume(&mut self, uid: UserId, conn: ConnectionHandle) -> Result<(), SessionError> {
        let now = self.clock.now();
        if !self.users.contains_key(&uid) {
            debug!(user_id = %uid, "resume for unknown user");
            return Err(SessionError::InvalidSession(uid));
        }

        let conn_id = conn.id();
        match self.connections.get(&conn_id).copied() {
            Some(bound) if bound == uid => {
                debug!(user_id = %uid, conn_id = %conn_id, "resume on already bound connection");
                return Ok(());
            }
            Some(_) => self.release_connection(conn_id, now),
            None => {}
        }

        let Some(user) = self.users.get_mut(&uid) else {
            return Err(SessionError::InvalidSession(uid));
        };
        if let Some(old) = user.set_connection(conn) {
            // the old socket must not be able to disconnect this user later
            self.connections.remove(&old.id());
            old.close();
        }
        self.connections.insert(conn_id, uid);
        info!(user_id = %uid, conn_id = %conn_id, "user resumed");
        Ok(())
    }

    /// Handles a dropped connection. The bound user keeps its room and
    /// starts its grace period. Returns that user, if there was one.
    pub fn disconnect(&mut self, conn_id: ConnectionId) -> Option<UserId> {
        let now = self.clock.now();
        let uid = self.connections.remove(&conn_id)?;
        if let Some(user) = self.users.get_mut(&uid) {
            user.detach(now);
            info!(user_id = %uid, conn_id = %conn_id, "user disconnected, grace period started");
        }
        Some(uid)
    }

    /// Permanently removes a user: closes its connection, takes it out of
    /// its room (without a trip to the lobby), and frees its name.
    ///
    /// # Errors
    /// [`SessionError::InvalidSession`] if `uid` is unknown.
    pub fn delete_user(&mut self, uid: UserId) -> Result<(), SessionError> {
        let now = self.clock.now();
        self.delete_user_at(uid, now)
    }

    /// Claims `name` for `uid`, releasing the user's previous name.
    ///
    /// # Errors
    /// - [`SessionError::InvalidSession`] if `uid` is unknown.
    /// - [`SessionError::NameTaken`] if another user holds `name`.
    pub fn register_username(&mut self, uid: UserId, name: &str) -> Result<(), SessionError> {
        let user = self
            .users
            .get_mut(&uid)
            .ok_or(SessionError::InvalidSession(uid))?;

        match self.usernames.get(name) {
            Some(&owner) if owner == uid => return Ok(()),
            Some(_) => return Err(SessionError::NameTaken(name.to_owned())),
            None => {}
        }

        if let Some(old) = user.set_username(Some(name.to_owned())) {
            self.usernames.remove(&old);
        }
        self.usernames.insert(name.to_owned(), uid);
        debug!(user_id = %uid, username = name, "username registered");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    /// Creates and registers a room. `name` defaults to
    /// [`DEFAULT_ROOM_NAME`], `size` to `defaultRoomSize`.
    pub fn create_room(&mut self, name: Option<String>, size: Option<usize>) -> RoomId {
        let now = self.clock.now();
        self.create_room_at(name, size, now)
    }

    /// Closes a room: every member is moved out (to the lobby when
    /// `autoJoinLobby` is set), then the `close` hook fires and the room
    /// is deregistered.
    ///
    /// # Errors
    /// - [`SessionError::LobbyIsPermanent`] for the lobby.
    /// - [`SessionError::RoomNotFound`] if `rid` is unknown, including a
    ///   room that was already closed.
    pub fn close_room(&mut self, rid: RoomId) -> Result<(), SessionError> {
        let now = self.clock.now();
        self.close_room_at(rid, now)
    }

    /// Moves `uid` into room `rid`, leaving its current room.
    ///
    /// Joining the room one is already in succeeds without changes.
    ///
    /// # Errors
    /// - [`SessionError::InvalidSession`] if `uid` is unknown.
    /// - [`SessionError::RoomNotFound`] if `rid` is unknown.
    /// - [`SessionError::RoomFull`] if the room is at capacity.
    /// - [`SessionError::RejectedByPolicy`] if the room's gate says no.
    pub fn join_room(&mut self, uid: UserId, rid: RoomId) -> Result<(), SessionError> {
        let now = self.clock.now();
        let user = self.users.get(&uid).ok_or(SessionError::InvalidSession(uid))?;
        let room = self.room(rid).ok_or(SessionError::RoomNotFound(rid))?;

        if user.room() == Some(rid) {
            debug!(user_id = %uid, room_id = %rid, "already a member");
            return Ok(());
        }
        if room.is_full() {
            debug!(user_id = %uid, room_id = %rid, "room full");
            return Err(SessionError::RoomFull(rid));
        }
        self.add_member(rid, uid, now)
    }

    /// Moves `uid` into the lobby.
    pub fn join_lobby(&mut self, uid: UserId) -> Result<(), SessionError> {
        self.join_room(uid, self.lobby.id())
    }

    /// Takes `uid` out of its current room. A user leaving a regular room
    /// lands in the lobby when `autoJoinLobby` is set. No-op if the user
    /// is in no room.
    ///
    /// # Errors
    /// [`SessionError::InvalidSession`] if `uid` is unknown.
    pub fn leave_room(&mut self, uid: UserId) -> Result<(), SessionError> {
        let now = self.clock.now();
        let user = self.users.get(&uid).ok_or(SessionError::InvalidSession(uid))?;
        if let Some(rid) = user.room() {
            self.remove_member(rid, uid, true, now);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    /// Sends an application message to every connected user.
    pub fn message_all(&self, name: &str, data: serde_json::Value) {
        for user in self.users.values() {
            user.message(name, data.clone());
        }
    }

    /// Sends an application message to every connected member of `rid`.
    pub fn message_room(
        &self,
        rid: RoomId,
        name: &str,
        data: serde_json::Value,
    ) -> Result<(), SessionError> {
        let room = self.room(rid).ok_or(SessionError::RoomNotFound(rid))?;
        for user in room.members().iter().filter_map(|id| self.users.get(id)) {
            user.message(name, data.clone());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Projections
    // -----------------------------------------------------------------------

    /// Every room except the lobby, in creation order.
    pub fn list_rooms(&self) -> Vec<RoomListEntry> {
        self.rooms
            .values()
            .map(|room| room.list_entry(&self.users))
            .collect()
    }

    /// The listing entry for one room, the lobby included.
    pub fn room_entry(&self, rid: RoomId) -> Option<RoomListEntry> {
        self.room(rid).map(|room| room.list_entry(&self.users))
    }

    /// The members of `uid`'s room. Empty if the user is in no room.
    ///
    /// # Errors
    /// [`SessionError::InvalidSession`] if `uid` is unknown.
    pub fn list_users_in_room(&self, uid: UserId) -> Result<Vec<UserEntry>, SessionError> {
        let user = self.users.get(&uid).ok_or(SessionError::InvalidSession(uid))?;
        let Some(room) = user.room().and_then(|rid| self.room(rid)) else {
            return Ok(Vec::new());
        };
        let summary = room.summary();
        Ok(room
            .members()
            .iter()
            .filter_map(|id| self.users.get(id))
            .map(|member| UserEntry {
                id: member.id(),
                username: member.username().map(str::to_owned),
                room: Some(summary.clone()),
            })
            .collect())
    }

    pub fn user(&self, uid: UserId) -> Option<&User> {
        self.users.get(&uid)
    }

    pub fn users(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// Looks up any room, the lobby included.
    pub fn room(&self, rid: RoomId) -> Option<&Room> {
        if rid == self.lobby.id() {
            Some(&self.lobby)
        } else {
            self.rooms.get(&rid)
        }
    }

    /// Every room except the lobby, in creation order.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn lobby(&self) -> &Room {
        &self.lobby
    }

    pub fn user_for_connection(&self, conn_id: ConnectionId) -> Option<UserId> {
        self.connections.get(&conn_id).copied()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Number of rooms, not counting the lobby.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Runs one maintenance pass at the clock's current time.
    pub fn maintain(&mut self) -> TickReport {
        let now = self.clock.now();
        self.tick(now)
    }

    /// Runs one maintenance pass at `now`. The steps run in this order:
    ///
    /// 1. Rooms older than `roomLife` are closed; every other room,
    ///    the lobby included, gets its `pulse` hook.
    /// 2. With `autoCreateRooms` and a lobby holding at least
    ///    `minRoomMembers` users, one room is created and the first
    ///    `minRoomMembers` lobby members are moved into it.
    /// 3. Rooms below `minRoomMembers` are closed.
    /// 4. Disconnected users past their grace period are deleted.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();

        // 1. expire or pulse
        let life = self.config.room_lifetime();
        let snapshot: Vec<RoomId> = self.rooms.keys().copied().collect();
        for rid in snapshot {
            let Some(room) = self.rooms.get(&rid) else {
                continue;
            };
            if life.is_some_and(|life| room.age(now) >= life) {
                if self.close_room_at(rid, now).is_ok() {
                    report.expired_rooms.push(rid);
                }
            } else {
                self.fire(rid, now, |hooks, ctx| hooks.fire_pulse(ctx));
            }
        }
        let lobby_id = self.lobby.id();
        self.fire(lobby_id, now, |hooks, ctx| hooks.fire_pulse(ctx));

        // 2. auto-create
        if let Some(min) = self.config.auto_create_threshold() {
            if self.lobby.member_count() >= min {
                self.auto_room_count += 1;
                let name = format!("Room {}", self.auto_room_count);
                let rid = self.create_room_at(Some(name), None, now);
                let movers: Vec<UserId> = self.lobby.members()[..min].to_vec();
                for uid in movers {
                    if let Err(e) = self.add_member(rid, uid, now) {
                        warn!(user_id = %uid, room_id = %rid, error = %e, "automatic move rejected");
                    }
                }
                report.created_room = Some(rid);
            }
        }

        // 3. prune
        if self.config.min_room_members.is_some() {
            let under: Vec<RoomId> = self
                .rooms
                .values()
                .filter(|room| room.is_under_populated())
                .map(Room::id)
                .collect();
            for rid in under {
                if self.close_room_at(rid, now).is_ok() {
                    report.pruned_rooms.push(rid);
                }
            }
        }

        // 4. evict
        let expired: Vec<UserId> = self
            .users
            .values()
            .filter(|user| !user.connected())
            .filter(|user| {
                let grace = if user.room().is_none() {
                    self.config.roomless_reconnect_grace()
                } else {
                    self.config.reconnect_grace()
                };
                match (grace, user.disconnected_for(now)) {
                    (Some(grace), Some(away)) => away >= grace,
                    _ => false,
                }
            })
            .map(User::id)
            .collect();
        for uid in expired {
            if self.delete_user_at(uid, now).is_ok() {
                report.evicted_users.push(uid);
            }
        }

        if !report.is_empty() {
            info!(
                expired = report.expired_rooms.len(),
                created = report.created_room.is_some(),
                pruned = report.pruned_rooms.len(),
                evicted = report.evicted_users.len(),
                "maintenance pass"
            );
        }
        report
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn room_mut(&mut self, rid: RoomId) -> Option<&mut Room> {
        if rid == self.lobby.id() {
            Some(&mut self.lobby)
        } else {
            self.rooms.get_mut(&rid)
        }
    }

    /// Runs `f` with the hook set and a context for room `rid`.
    fn fire(
        &mut self,
        rid: RoomId,
        now: Instant,
        f: impl FnOnce(&RoomHooks, &mut RoomContext<'_>),
    ) {
        let room = if rid == self.lobby.id() {
            &mut self.lobby
        } else {
            match self.rooms.get_mut(&rid) {
                Some(room) => room,
                None => return,
            }
        };
        let hooks = Arc::clone(room.hooks());
        let mut ctx = RoomContext::new(room, &self.users, now);
        f(&hooks, &mut ctx);
    }

    /// Sends a session message to every member of `rid` except `skip`.
    fn notify_members(&self, rid: RoomId, skip: UserId, msg: &SessionMessage) {
        let Some(room) = self.room(rid) else {
            return;
        };
        for member in room.members().iter().filter(|&&id| id != skip) {
            if let Some(user) = self.users.get(member) {
                user.notify(msg.clone());
            }
        }
    }

    /// Detaches whichever user `conn_id` is bound to.
    fn release_connection(&mut self, conn_id: ConnectionId, now: Instant) {
        if let Some(previous) = self.connections.remove(&conn_id) {
            if let Some(user) = self.users.get_mut(&previous) {
                user.detach(now);
                info!(user_id = %previous, conn_id = %conn_id, "connection rebound, previous user detached");
            }
        }
    }

    fn create_room_at(&mut self, name: Option<String>, size: Option<usize>, now: Instant) -> RoomId {
        let room = Room::new(
            name.unwrap_or_else(|| DEFAULT_ROOM_NAME.to_owned()),
            size.or(self.config.default_room_size),
            self.config.min_room_members,
            Arc::clone(&self.room_hooks),
            now,
        );
        let rid = room.id();
        info!(room_id = %rid, name = room.name(), size = ?room.size(), "room created");
        self.rooms.insert(rid, room);
        self.fire(rid, now, |hooks, ctx| hooks.fire_init(ctx));
        rid
    }

    fn close_room_at(&mut self, rid: RoomId, now: Instant) -> Result<(), SessionError> {
        if rid == self.lobby.id() {
            return Err(SessionError::LobbyIsPermanent);
        }
        let room = self.rooms.get_mut(&rid).ok_or(SessionError::RoomNotFound(rid))?;
        room.mark_closing();
        let members = room.members().to_vec();

        for uid in members {
            self.remove_member(rid, uid, true, now);
        }
        self.fire(rid, now, |hooks, ctx| hooks.fire_close(ctx));
        self.rooms.shift_remove(&rid);
        info!(room_id = %rid, "room closed");
        Ok(())
    }

    /// The one place a user enters a room.
    ///
    /// Capacity is not checked here: automatic moves ignore it. The gate
    /// is always consulted.
    fn add_member(&mut self, rid: RoomId, uid: UserId, now: Instant) -> Result<(), SessionError> {
        let room = self.room(rid).ok_or(SessionError::RoomNotFound(rid))?;
        let user = self.users.get(&uid).ok_or(SessionError::InvalidSession(uid))?;

        if !room.hooks().allows(room, user) {
            debug!(user_id = %uid, room_id = %rid, "join rejected by room policy");
            return Err(SessionError::RejectedByPolicy(rid));
        }
        let previous = user.room();
        if previous == Some(rid) {
            return Ok(());
        }
        if let Some(previous) = previous {
            self.remove_member(previous, uid, false, now);
        }

        let Some(room) = self.room_mut(rid) else {
            return Err(SessionError::RoomNotFound(rid));
        };
        room.push_member(uid);
        let is_lobby = room.is_lobby();
        let name = room.name().to_owned();
        let Some(user) = self.users.get_mut(&uid) else {
            return Err(SessionError::InvalidSession(uid));
        };
        user.set_room(Some(rid));
        let entry = user.member_entry();
        debug!(user_id = %uid, room_id = %rid, "member joined");

        self.fire(rid, now, |hooks, ctx| hooks.fire_new_member(ctx, uid));

        let joined = if is_lobby {
            SessionMessage::LobbyMemberJoined {
                id: entry.id,
                username: entry.username,
            }
        } else {
            SessionMessage::RoomMemberJoined {
                id: entry.id,
                username: entry.username,
            }
        };
        self.notify_members(rid, uid, &joined);
        if let Some(user) = self.users.get(&uid) {
            user.notify(SessionMessage::JoinedRoom { name });
        }
        Ok(())
    }

    /// The one place a user leaves a room. No-op unless `uid` is a member
    /// of `rid`.
    ///
    /// With `return_to_lobby`, a user leaving a regular room is put in the
    /// lobby (if `autoJoinLobby` is set) before the `member_leaves` hook
    /// and the notifications run.
    fn remove_member(&mut self, rid: RoomId, uid: UserId, return_to_lobby: bool, now: Instant) {
        let Some(user) = self.users.get_mut(&uid) else {
            return;
        };
        if user.room() != Some(rid) {
            debug!(user_id = %uid, room_id = %rid, "not a member, nothing to remove");
            return;
        }
        user.set_room(None);
        let entry = user.member_entry();

        let Some(room) = self.room_mut(rid) else {
            return;
        };
        room.remove_member(uid, now);
        let is_lobby = room.is_lobby();
        let name = room.name().to_owned();
        debug!(user_id = %uid, room_id = %rid, "member left");

        if !is_lobby && return_to_lobby && self.config.auto_join_lobby {
            let lobby_id = self.lobby.id();
            if let Err(e) = self.add_member(lobby_id, uid, now) {
                warn!(user_id = %uid, error = %e, "return to lobby rejected");
            }
        }

        self.fire(rid, now, |hooks, ctx| hooks.fire_member_leaves(ctx, uid));

        let left = if is_lobby {
            SessionMessage::LobbyMemberLeft {
                id: entry.id,
                username: entry.username,
            }
        } else {
            SessionMessage::RoomMemberLeft {
                id: entry.id,
                username: entry.username,
            }
        };
        self.notify_members(rid, uid, &left);
        if let Some(user) = self.users.get(&uid) {
            user.notify(SessionMessage::LeftRoom { name });
        }
    }

    fn delete_user_at(&mut self, uid: UserId, now: Instant) -> Result<(), SessionError> {
        let user = self.users.get_mut(&uid).ok_or(SessionError::InvalidSession(uid))?;
        if let Some(conn) = user.detach(now) {
            self.connections.remove(&conn.id());
            conn.close();
        }
        if let Some(rid) = self.users.get(&uid).and_then(User::room) {
            self.remove_member(rid, uid, false, now);
        }
        if let Some(user) = self.users.shift_remove(&uid) {
            if let Some(name) = user.username() {
                self.usernames.remove(name);
            }
        }
        info!(user_id = %uid, "user deleted");
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================
