//! Loading a [`SessionConfig`] from disk.
//!
//! A config file is a JSON object holding any subset of the session
//! options; missing keys keep their defaults:
//!
//! ```json
//! { "minRoomMembers": 2, "autoCreateRooms": true, "roomLife": 600000 }
//! ```

use std::path::Path;

use roomkeep_protocol::SessionConfig;

use crate::RoomkeepError;

/// Reads a partial JSON config from `path` over the defaults.
///
/// # Errors
/// [`RoomkeepError::Config`] if the file cannot be read or is not a valid
/// config object.
pub fn load_config(path: impl AsRef<Path>) -> Result<SessionConfig, RoomkeepError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| RoomkeepError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let config = parse_config(&text).map_err(|e| RoomkeepError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

fn parse_config(text: &str) -> Result<SessionConfig, serde_json::Error> {
    serde_json::from_str(text)
}
