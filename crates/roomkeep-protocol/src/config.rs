//! Session-layer configuration.
//!
//! [`SessionConfig`] is the one configuration value the core reads. It is
//! also what `begin` and `resume` hand back to clients, so it lives here
//! with the rest of the wire vocabulary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Options that shape room and identity lifecycle.
///
/// Every field has a default, so a partial JSON object (or `{}`) is a
/// valid configuration. Durations are plain milliseconds on the wire;
/// `null` or a missing key means "never" for the optional ones.
///
/// ```rust
/// use roomkeep_protocol::SessionConfig;
///
/// let cfg: SessionConfig = serde_json::from_str(r#"{ "minRoomMembers": 3 }"#).unwrap();
/// assert_eq!(cfg.min_room_members, Some(3));
/// assert_eq!(cfg.game_loop_speed, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Maintenance tick interval in milliseconds.
    pub game_loop_speed: u64,

    /// Capacity given to rooms created without an explicit size.
    pub default_room_size: Option<usize>,

    /// Spin up a room whenever the lobby holds `min_room_members` users.
    pub auto_create_rooms: bool,

    /// Rooms below this population are closed on the next tick.
    pub min_room_members: Option<usize>,

    /// Grace period for disconnected users, in milliseconds.
    pub reconnect_wait: Option<u64>,

    /// Grace period for disconnected users that are in no room.
    /// Falls back to `reconnect_wait` when unset.
    pub reconnect_wait_roomless: Option<u64>,

    /// Rooms older than this are closed, in milliseconds.
    pub room_life: Option<u64>,

    /// Put new users in the lobby, and return users there when they
    /// leave a room.
    pub auto_join_lobby: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            game_loop_speed: 100,
            default_room_size: None,
            auto_create_rooms: false,
            min_room_members: None,
            reconnect_wait: Some(10_000),
            reconnect_wait_roomless: None,
            room_life: None,
            auto_join_lobby: true,
        }
    }
}

impl SessionConfig {
    /// The maintenance tick interval. A zero speed is clamped to 1ms.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.game_loop_speed.max(1))
    }

    pub fn reconnect_grace(&self) -> Option<Duration> {
        self.reconnect_wait.map(Duration::from_millis)
    }

    /// The grace period for a user with no room: `reconnectWaitRoomless`
    /// if set, otherwise the regular one.
    pub fn roomless_reconnect_grace(&self) -> Option<Duration> {
        self.reconnect_wait_roomless
            .map(Duration::from_millis)
            .or_else(|| self.reconnect_grace())
    }

    pub fn room_lifetime(&self) -> Option<Duration> {
        self.room_life.map(Duration::from_millis)
    }

    /// The auto-create threshold, only when auto-creation can fire.
    ///
    /// A threshold of zero would create a room on every tick, so it
    /// counts as disabled.
    pub fn auto_create_threshold(&self) -> Option<usize> {
        if !self.auto_create_rooms {
            return None;
        }
        self.min_room_members.filter(|&n| n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_documented_values() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.game_loop_speed, 100);
        assert_eq!(cfg.reconnect_wait, Some(10_000));
        assert!(cfg.auto_join_lobby);
        assert!(!cfg.auto_create_rooms);
        assert!(cfg.room_life.is_none());
    }

    #[test]
    fn test_deserialize_empty_object_yields_defaults() {
        let cfg: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn test_deserialize_null_reconnect_wait_disables_eviction() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{ "reconnectWait": null }"#).unwrap();
        assert!(cfg.reconnect_grace().is_none());
    }

    #[test]
    fn test_tick_interval_zero_speed_clamps_to_one_ms() {
        let cfg = SessionConfig {
            game_loop_speed: 0,
            ..Default::default()
        };
        assert_eq!(cfg.tick_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_roomless_grace_falls_back_to_reconnect_wait() {
        let mut cfg = SessionConfig::default();
        assert_eq!(
            cfg.roomless_reconnect_grace(),
            Some(Duration::from_millis(10_000))
        );

        cfg.reconnect_wait_roomless = Some(500);
        assert_eq!(
            cfg.roomless_reconnect_grace(),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_auto_create_threshold_requires_flag_and_positive_minimum() {
        let mut cfg = SessionConfig {
            min_room_members: Some(3),
            ..Default::default()
        };
        assert_eq!(cfg.auto_create_threshold(), None);

        cfg.auto_create_rooms = true;
        assert_eq!(cfg.auto_create_threshold(), Some(3));

        cfg.min_room_members = Some(0);
        assert_eq!(cfg.auto_create_threshold(), None);
    }
}
