//! Integration tests for the maintenance pass (`SessionManager::tick`).
//!
//! Each test drives a `ManualClock` and calls `tick` directly, so every
//! timeout is exact and nothing sleeps.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use roomkeep_protocol::{SessionConfig, UserId};
use roomkeep_session::{ConnectionHandle, OutboundReceiver, RoomHooks, SessionManager};
use roomkeep_tick::{Clock, ManualClock};
use roomkeep_transport::ConnectionId;

// =========================================================================
// Helpers
// =========================================================================

fn manager(config: SessionConfig) -> (SessionManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    (SessionManager::new(config, clock.clone()), clock)
}

fn begin(mgr: &mut SessionManager, n: u64) -> (UserId, OutboundReceiver) {
    let (conn, rx) = ConnectionHandle::channel(ConnectionId::new(n));
    (mgr.begin(conn), rx)
}

fn resume(mgr: &mut SessionManager, uid: UserId, n: u64) -> bool {
    let (conn, _rx) = ConnectionHandle::channel(ConnectionId::new(n));
    mgr.resume(uid, conn).is_ok()
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn grace_1s() -> SessionConfig {
    SessionConfig {
        reconnect_wait: Some(1_000),
        ..Default::default()
    }
}

// =========================================================================
// Reconnect grace (scenarios A and B)
// =========================================================================

#[test]
fn test_resume_within_grace_keeps_identity_and_room() {
    // Scenario A
    let (mut mgr, clock) = manager(grace_1s());
    let (uid, _rx) = begin(&mut mgr, 1);
    let rid = mgr.create_room(None, None);
    mgr.join_room(uid, rid).unwrap();

    mgr.disconnect(ConnectionId::new(1));
    clock.advance(ms(500));
    let report = mgr.maintain();

    assert!(report.evicted_users.is_empty());
    assert!(resume(&mut mgr, uid, 2));
    assert_eq!(mgr.user(uid).unwrap().room(), Some(rid));
}

#[test]
fn test_resume_after_grace_and_tick_is_invalid() {
    // Scenario B
    let (mut mgr, clock) = manager(grace_1s());
    let (uid, _rx) = begin(&mut mgr, 1);
    let rid = mgr.create_room(None, None);
    mgr.join_room(uid, rid).unwrap();
    mgr.register_username(uid, "ana").unwrap();

    mgr.disconnect(ConnectionId::new(1));
    clock.advance(ms(1_000));
    let report = mgr.maintain();
    clock.advance(ms(500));

    assert_eq!(report.evicted_users, vec![uid]);
    assert!(!resume(&mut mgr, uid, 2));
    assert!(!resume(&mut mgr, uid, 3));
    assert_eq!(mgr.room(rid).unwrap().member_count(), 0);

    // the name is free again for a brand-new identity
    let (fresh, _rx2) = begin(&mut mgr, 4);
    assert!(mgr.register_username(fresh, "ana").is_ok());
}

#[test]
fn test_grace_is_only_enforced_on_tick() {
    let (mut mgr, clock) = manager(grace_1s());
    let (uid, _rx) = begin(&mut mgr, 1);

    mgr.disconnect(ConnectionId::new(1));
    clock.advance(ms(5_000));

    // no tick ran, so the identity is still there
    assert!(resume(&mut mgr, uid, 2));
}

#[test]
fn test_unset_reconnect_wait_never_evicts() {
    let (mut mgr, clock) = manager(SessionConfig {
        reconnect_wait: None,
        ..Default::default()
    });
    let (uid, _rx) = begin(&mut mgr, 1);

    mgr.disconnect(ConnectionId::new(1));
    clock.advance(Duration::from_secs(86_400));
    mgr.maintain();

    assert!(mgr.user(uid).is_some());
}

#[test]
fn test_roomless_users_use_roomless_wait() {
    let (mut mgr, clock) = manager(SessionConfig {
        auto_join_lobby: false,
        reconnect_wait: Some(10_000),
        reconnect_wait_roomless: Some(200),
        ..Default::default()
    });
    let (roomless, _r1) = begin(&mut mgr, 1);
    let (seated, _r2) = begin(&mut mgr, 2);
    let rid = mgr.create_room(None, None);
    mgr.join_room(seated, rid).unwrap();

    mgr.disconnect(ConnectionId::new(1));
    mgr.disconnect(ConnectionId::new(2));
    clock.advance(ms(300));
    let report = mgr.maintain();

    assert_eq!(report.evicted_users, vec![roomless]);
    assert!(mgr.user(seated).is_some());
}

#[test]
fn test_connected_users_are_never_evicted() {
    let (mut mgr, clock) = manager(SessionConfig {
        reconnect_wait: Some(0),
        ..Default::default()
    });
    let (uid, _rx) = begin(&mut mgr, 1);

    clock.advance(Duration::from_secs(60));
    mgr.maintain();

    assert!(mgr.user(uid).is_some());
}

// =========================================================================
// Pruning (scenario D) and room life
// =========================================================================

#[test]
fn test_room_below_minimum_is_closed_and_members_return_to_lobby() {
    // Scenario D
    let (mut mgr, _clock) = manager(SessionConfig {
        min_room_members: Some(3),
        ..Default::default()
    });
    let rid = mgr.create_room(None, None);
    let users: Vec<UserId> = (1..=3).map(|n| begin(&mut mgr, n).0).collect();
    for &u in &users {
        mgr.join_room(u, rid).unwrap();
    }
    assert!(mgr.maintain().pruned_rooms.is_empty());

    mgr.leave_room(users[0]).unwrap();
    let report = mgr.maintain();

    assert_eq!(report.pruned_rooms, vec![rid]);
    assert!(mgr.room(rid).is_none());
    for &u in &users {
        assert_eq!(mgr.user(u).unwrap().room(), Some(mgr.lobby().id()));
    }
    assert_eq!(mgr.lobby().member_count(), 3);
}

#[test]
fn test_lobby_is_never_pruned() {
    let (mut mgr, _clock) = manager(SessionConfig {
        min_room_members: Some(5),
        ..Default::default()
    });
    let (_uid, _rx) = begin(&mut mgr, 1);

    let report = mgr.maintain();

    assert!(report.pruned_rooms.is_empty());
    assert_eq!(mgr.lobby().member_count(), 1);
}

#[test]
fn test_room_life_expires_old_rooms_only() {
    let (mut mgr, clock) = manager(SessionConfig {
        room_life: Some(1_000),
        ..Default::default()
    });
    let old = mgr.create_room(Some("old".into()), None);
    clock.advance(ms(600));
    let young = mgr.create_room(Some("young".into()), None);
    let (uid, _rx) = begin(&mut mgr, 1);
    mgr.join_room(uid, old).unwrap();

    clock.advance(ms(400));
    let report = mgr.maintain();

    assert_eq!(report.expired_rooms, vec![old]);
    assert!(mgr.room(young).is_some());
    assert_eq!(mgr.user(uid).unwrap().room(), Some(mgr.lobby().id()));
}

#[test]
fn test_lobby_is_pulsed_but_never_expires() {
    let pulses = Arc::new(Mutex::new(0));
    let p = Arc::clone(&pulses);
    let clock = Arc::new(ManualClock::new());
    let mut mgr = SessionManager::with_hooks(
        SessionConfig {
            room_life: Some(10),
            ..Default::default()
        },
        clock.clone(),
        RoomHooks::new(),
        RoomHooks::new().on_pulse(move |_| *p.lock().unwrap() += 1),
    );

    clock.advance(ms(100));
    mgr.maintain();
    mgr.maintain();

    assert_eq!(*pulses.lock().unwrap(), 2);
    assert!(mgr.room(mgr.lobby().id()).is_some());
}

#[test]
fn test_expired_room_is_not_pulsed() {
    let pulses = Arc::new(Mutex::new(0));
    let p = Arc::clone(&pulses);
    let clock = Arc::new(ManualClock::new());
    let mut mgr = SessionManager::with_hooks(
        SessionConfig {
            room_life: Some(50),
            ..Default::default()
        },
        clock.clone(),
        RoomHooks::new().on_pulse(move |_| *p.lock().unwrap() += 1),
        RoomHooks::new(),
    );
    mgr.create_room(None, None);

    mgr.maintain();
    clock.advance(ms(50));
    mgr.maintain();

    assert_eq!(*pulses.lock().unwrap(), 1);
    assert_eq!(mgr.room_count(), 0);
}

// =========================================================================
// Auto-create
// =========================================================================

fn auto_create(min: usize) -> SessionConfig {
    SessionConfig {
        auto_create_rooms: true,
        min_room_members: Some(min),
        ..Default::default()
    }
}

#[test]
fn test_auto_create_moves_front_of_lobby_into_new_room() {
    let (mut mgr, _clock) = manager(auto_create(2));
    let users: Vec<UserId> = (1..=5).map(|n| begin(&mut mgr, n).0).collect();

    let report = mgr.maintain();

    let rid = report.created_room.expect("a room should be created");
    let room = mgr.room(rid).unwrap();
    assert_eq!(room.name(), "Room 1");
    assert_eq!(room.members(), &users[..2]);
    assert_eq!(mgr.lobby().members(), &users[2..]);
    assert!(report.pruned_rooms.is_empty(), "fresh room is populated before pruning");
}

#[test]
fn test_auto_create_fires_at_most_once_per_tick() {
    let (mut mgr, _clock) = manager(auto_create(2));
    for n in 1..=6 {
        begin(&mut mgr, n);
    }

    mgr.maintain();
    assert_eq!(mgr.room_count(), 1);
    assert_eq!(mgr.lobby().member_count(), 4);

    let second = mgr.maintain().created_room.unwrap();
    assert_eq!(mgr.room(second).unwrap().name(), "Room 2");
    assert_eq!(mgr.room_count(), 2);
}

#[test]
fn test_auto_create_below_threshold_does_nothing() {
    let (mut mgr, _clock) = manager(auto_create(3));
    begin(&mut mgr, 1);
    begin(&mut mgr, 2);

    assert!(mgr.maintain().created_room.is_none());
    assert_eq!(mgr.room_count(), 0);
}

#[test]
fn test_auto_create_requires_flag() {
    let (mut mgr, _clock) = manager(SessionConfig {
        min_room_members: Some(1),
        ..Default::default()
    });
    begin(&mut mgr, 1);

    assert!(mgr.maintain().created_room.is_none());
}

#[test]
fn test_auto_created_room_rejecting_movers_is_pruned_same_tick() {
    let clock = Arc::new(ManualClock::new());
    let gate = RoomHooks::new().should_allow_user(|room, _| room.member_count() < 1);
    let mut mgr = SessionManager::with_hooks(auto_create(2), clock, gate, RoomHooks::new());
    let (a, _ra) = begin(&mut mgr, 1);
    let (b, _rb) = begin(&mut mgr, 2);

    let report = mgr.maintain();

    let rid = report.created_room.unwrap();
    assert_eq!(report.pruned_rooms, vec![rid]);
    assert_eq!(mgr.lobby().members(), &[b, a]);
}

// =========================================================================
// Step order and the membership invariant
// =========================================================================

#[test]
fn test_evicted_user_leaves_room_without_lobby_return() {
    let (mut mgr, clock) = manager(grace_1s());
    let (uid, _rx) = begin(&mut mgr, 1);
    let rid = mgr.create_room(None, None);
    mgr.join_room(uid, rid).unwrap();

    mgr.disconnect(ConnectionId::new(1));
    clock.advance(ms(1_000));
    mgr.maintain();

    assert_eq!(mgr.room(rid).unwrap().member_count(), 0);
    assert_eq!(mgr.lobby().member_count(), 0);
}

#[test]
fn test_eviction_runs_after_pruning() {
    // A timed-out user still counts toward the room's population when
    // pruning runs, and is only deleted afterwards.
    let (mut mgr, clock) = manager(SessionConfig {
        min_room_members: Some(2),
        reconnect_wait: Some(100),
        ..Default::default()
    });
    let rid = mgr.create_room(None, None);
    let (a, _ra) = begin(&mut mgr, 1);
    let (b, _rb) = begin(&mut mgr, 2);
    mgr.join_room(a, rid).unwrap();
    mgr.join_room(b, rid).unwrap();

    mgr.disconnect(ConnectionId::new(2));
    clock.advance(ms(100));
    let report = mgr.maintain();

    assert!(report.pruned_rooms.is_empty());
    assert_eq!(report.evicted_users, vec![b]);
    assert_eq!(mgr.room(rid).unwrap().members(), &[a]);

    let report = mgr.maintain();
    assert_eq!(report.pruned_rooms, vec![rid]);
}

#[test]
fn test_expired_room_members_feed_auto_create_same_tick() {
    // Expiry returns members to the lobby before auto-create counts it.
    let (mut mgr, clock) = manager(SessionConfig {
        auto_create_rooms: true,
        min_room_members: Some(2),
        room_life: Some(1_000),
        ..Default::default()
    });
    let old = mgr.create_room(None, None);
    let (a, _ra) = begin(&mut mgr, 1);
    let (b, _rb) = begin(&mut mgr, 2);
    mgr.join_room(a, old).unwrap();
    mgr.join_room(b, old).unwrap();

    clock.advance(ms(1_000));
    let report = mgr.maintain();

    assert_eq!(report.expired_rooms, vec![old]);
    assert!(report.pruned_rooms.is_empty());
    let fresh = report.created_room.expect("lobby refilled by the expired room");
    let room = mgr.room(fresh).unwrap();
    assert_eq!(room.member_count(), 2);
    assert!(room.contains(a) && room.contains(b));
    assert_eq!(mgr.user(a).unwrap().room(), Some(fresh));
    assert_eq!(mgr.lobby().member_count(), 0);
}

#[test]
fn test_every_user_is_in_at_most_one_room_after_busy_ticks() {
    let (mut mgr, clock) = manager(SessionConfig {
        auto_create_rooms: true,
        min_room_members: Some(2),
        reconnect_wait: Some(300),
        room_life: Some(700),
        ..Default::default()
    });
    let mut receivers = Vec::new();
    for n in 1..=9 {
        receivers.push(begin(&mut mgr, n));
    }

    for step in 0..20u64 {
        if step % 3 == 0 {
            mgr.disconnect(ConnectionId::new(step % 9 + 1));
        }
        if step % 4 == 0 {
            let (extra, _rx) = begin(&mut mgr, 100 + step);
            let _ = mgr.leave_room(extra);
        }
        clock.advance(ms(150));
        mgr.tick(clock.now());

        for user in mgr.users() {
            let holding = std::iter::once(mgr.lobby())
                .chain(mgr.rooms())
                .filter(|room| room.contains(user.id()))
                .count();
            match user.room() {
                Some(rid) => {
                    assert_eq!(holding, 1);
                    assert!(mgr.room(rid).unwrap().contains(user.id()));
                }
                None => assert_eq!(holding, 0),
            }
        }
    }
}
