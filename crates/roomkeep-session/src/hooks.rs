//! Per-room extension points.
//!
//! A [`RoomHooks`] value is a fixed set of optional callbacks. Rooms of
//! the same kind share one set through an `Arc`; the lobby gets its own.
//!
//! ```rust
//! use roomkeep_session::RoomHooks;
//!
//! let hooks = RoomHooks::new()
//!     .on_new_member(|ctx, user| {
//!         ctx.message_members("welcome", serde_json::json!({ "id": user }));
//!     })
//!     .should_allow_user(|room, _user| room.member_count() < 4);
//! ```
//!
//! Hooks run synchronously inside the manager's critical section. They
//! must not block and cannot await.

use std::fmt;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use roomkeep_protocol::UserId;

use crate::{Room, User};

type RoomFn = Box<dyn Fn(&mut RoomContext<'_>) + Send + Sync>;
type MemberFn = Box<dyn Fn(&mut RoomContext<'_>, UserId) + Send + Sync>;
type GateFn = Box<dyn Fn(&Room, &User) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// RoomContext
// ---------------------------------------------------------------------------

/// What a hook sees: the room it fired for, read access to users, and
/// the time of the operation that fired it.
pub struct RoomContext<'a> {
    room: &'a mut Room,
    users: &'a IndexMap<UserId, User>,
    now: Instant,
}

impl<'a> RoomContext<'a> {
    pub(crate) fn new(room: &'a mut Room, users: &'a IndexMap<UserId, User>, now: Instant) -> Self {
        Self { room, users, now }
    }

    pub fn room(&self) -> &Room {
        self.room
    }

    pub fn data(&self) -> &serde_json::Map<String, serde_json::Value> {
        self.room.data()
    }

    pub fn data_mut(&mut self) -> &mut serde_json::Map<String, serde_json::Value> {
        self.room.data_mut()
    }

    pub fn user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    /// Current members, in join order.
    pub fn members(&self) -> impl Iterator<Item = &User> + '_ {
        self.room.members().iter().filter_map(|id| self.users.get(id))
    }

    /// Sends an application message to every connected member.
    pub fn message_members(&self, name: &str, data: serde_json::Value) {
        for user in self.members() {
            user.message(name, data.clone());
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn age(&self) -> Duration {
        self.room.age(self.now)
    }
}

// ---------------------------------------------------------------------------
// RoomHooks
// ---------------------------------------------------------------------------

/// Optional callbacks fired on room events. Any slot left empty is a
/// no-op; an empty gate admits everyone.
#[derive(Default)]
pub struct RoomHooks {
    init: Option<RoomFn>,
    pulse: Option<RoomFn>,
    new_member: Option<MemberFn>,
    member_leaves: Option<MemberFn>,
    should_allow_user: Option<GateFn>,
    close: Option<RoomFn>,
}

impl RoomHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fired once, right after the room is registered.
    pub fn on_init(mut self, f: impl Fn(&mut RoomContext<'_>) + Send + Sync + 'static) -> Self {
        self.init = Some(Box::new(f));
        self
    }

    /// Fired once per maintenance tick.
    pub fn on_pulse(mut self, f: impl Fn(&mut RoomContext<'_>) + Send + Sync + 'static) -> Self {
        self.pulse = Some(Box::new(f));
        self
    }

    /// Fired after a user became a member, before anyone is notified.
    pub fn on_new_member(
        mut self,
        f: impl Fn(&mut RoomContext<'_>, UserId) + Send + Sync + 'static,
    ) -> Self {
        self.new_member = Some(Box::new(f));
        self
    }

    /// Fired after a user left. The user is no longer in `members()`.
    pub fn on_member_leaves(
        mut self,
        f: impl Fn(&mut RoomContext<'_>, UserId) + Send + Sync + 'static,
    ) -> Self {
        self.member_leaves = Some(Box::new(f));
        self
    }

    /// Gate consulted before every join, automatic moves included.
    pub fn should_allow_user(
        mut self,
        f: impl Fn(&Room, &User) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_allow_user = Some(Box::new(f));
        self
    }

    /// Fired after every member has been forced out.
    pub fn on_close(mut self, f: impl Fn(&mut RoomContext<'_>) + Send + Sync + 'static) -> Self {
        self.close = Some(Box::new(f));
        self
    }

    // -- dispatch -----------------------------------------------------------

    pub(crate) fn allows(&self, room: &Room, user: &User) -> bool {
        self.should_allow_user.as_ref().is_none_or(|gate| gate(room, user))
    }

    pub(crate) fn fire_init(&self, ctx: &mut RoomContext<'_>) {
        if let Some(f) = &self.init {
            f(ctx);
        }
    }

    pub(crate) fn fire_pulse(&self, ctx: &mut RoomContext<'_>) {
        if let Some(f) = &self.pulse {
            f(ctx);
        }
    }

    pub(crate) fn fire_new_member(&self, ctx: &mut RoomContext<'_>, user: UserId) {
        if let Some(f) = &self.new_member {
            f(ctx, user);
        }
    }

    pub(crate) fn fire_member_leaves(&self, ctx: &mut RoomContext<'_>, user: UserId) {
        if let Some(f) = &self.member_leaves {
            f(ctx, user);
        }
    }

    pub(crate) fn fire_close(&self, ctx: &mut RoomContext<'_>) {
        if let Some(f) = &self.close {
            f(ctx);
        }
    }
}

impl fmt::Debug for RoomHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomHooks")
            .field("init", &self.init.is_some())
            .field("pulse", &self.pulse.is_some())
            .field("new_member", &self.new_member.is_some())
            .field("member_leaves", &self.member_leaves.is_some())
            .field("should_allow_user", &self.should_allow_user.is_some())
            .field("close", &self.close.is_some())
            .finish()
    }
}
