//! Rooms, the lobby included.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use roomkeep_protocol::{RoomId, RoomListEntry, RoomSummary, UserId};

use crate::{RoomHooks, User};

/// A capacity-bounded group of users.
///
/// Members are kept in join order. The lobby is an ordinary `Room` with
/// `is_lobby` set: it has no capacity, no minimum population, and is
/// never closed.
///
/// All membership changes go through the
/// [`SessionManager`](crate::SessionManager), which keeps `members` and
/// each user's back-reference in step. Hooks get a room through a
/// [`RoomContext`](crate::RoomContext) and may only touch its `data`.
#[derive(Debug)]
pub struct Room {
    id: RoomId,
    name: String,
    size: Option<usize>,
    min_members: Option<usize>,
    created: Instant,
    last_empty: Instant,
    members: Vec<UserId>,
    reached_min: bool,
    is_lobby: bool,
    closing: bool,
    data: serde_json::Map<String, serde_json::Value>,
    hooks: Arc<RoomHooks>,
}

impl Room {
    pub(crate) fn new(
        name: String,
        size: Option<usize>,
        min_members: Option<usize>,
        hooks: Arc<RoomHooks>,
        now: Instant,
    ) -> Self {
        Self {
            id: RoomId::new_v4(),
            name,
            size,
            min_members,
            created: now,
            last_empty: now,
            members: Vec::new(),
            reached_min: false,
            is_lobby: false,
            closing: false,
            data: serde_json::Map::new(),
            hooks,
        }
    }

    pub(crate) fn lobby(hooks: Arc<RoomHooks>, now: Instant) -> Self {
        Self {
            is_lobby: true,
            ..Self::new("Lobby".to_owned(), None, None, hooks, now)
        }
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capacity; `None` means unbounded.
    pub fn size(&self) -> Option<usize> {
        self.size
    }

    /// Population below which the maintenance pass closes the room.
    pub fn min_members(&self) -> Option<usize> {
        self.min_members
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }

    /// When the room last became empty (creation time if it never had
    /// members).
    pub fn last_empty(&self) -> Instant {
        self.last_empty
    }

    pub fn members(&self) -> &[UserId] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.members.contains(&user)
    }

    /// Whether the population has ever been at or above `min_members`.
    /// Stays set after members leave. Always `false` without a minimum.
    pub fn has_reached_min(&self) -> bool {
        self.reached_min
    }

    pub fn is_lobby(&self) -> bool {
        self.is_lobby
    }

    /// True while the room is forcing its members out on close.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn is_full(&self) -> bool {
        self.size.is_some_and(|size| self.members.len() >= size)
    }

    /// Below the minimum population. Never true for the lobby.
    pub fn is_under_populated(&self) -> bool {
        self.min_members.is_some_and(|min| self.members.len() < min)
    }

    pub fn data(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut serde_json::Map<String, serde_json::Value> {
        &mut self.data
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            name: self.name.clone(),
            size: self.size,
            user_count: self.members.len(),
            lobby: self.is_lobby,
        }
    }

    /// The `listRooms` projection. Members missing from `users` are
    /// skipped.
    pub fn list_entry(&self, users: &IndexMap<UserId, User>) -> RoomListEntry {
        RoomListEntry {
            id: self.id,
            name: self.name.clone(),
            user_count: self.members.len(),
            users: self
                .members
                .iter()
                .filter_map(|id| users.get(id))
                .map(User::member_entry)
                .collect(),
            size: self.size,
        }
    }

    // -- crate-private mutation ---------------------------------------------

    pub(crate) fn hooks(&self) -> &Arc<RoomHooks> {
        &self.hooks
    }

    pub(crate) fn push_member(&mut self, user: UserId) {
        self.members.push(user);
        if self.min_members.is_some_and(|min| self.members.len() >= min) {
            self.reached_min = true;
        }
    }

    /// Removes `user`. Returns `false` if it was not a member.
    pub(crate) fn remove_member(&mut self, user: UserId, now: Instant) -> bool {
        let Some(pos) = self.members.iter().position(|&m| m == user) else {
            return false;
        };
        self.members.remove(pos);
        if self.members.is_empty() {
            self.last_empty = now;
        }
        true
    }

    pub(crate) fn mark_closing(&mut self) {
        self.closing = true;
    }
}
