//! Runtime configuration loaded from environment variables.
//!
//! Every knob has a default; a missing or unparsable variable falls back to it
//! rather than failing startup.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use uuid::Uuid;

use crate::consts::{
    DEFAULT_DRAG_THROTTLE_MS, DEFAULT_ERASE_RADIUS, DEFAULT_GRID_SIZE, DEFAULT_LOCAL_KEY, DEFAULT_PROPERTY_DEBOUNCE_MS,
    MAX_HISTORY_SIZE,
};
use crate::doc::ActorId;

const DEFAULT_LOCAL_DIR: &str = ".boardsync";
const DEFAULT_RELAY_PORT: u16 = 3000;

/// Parse `key` from the environment, falling back to `default`.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).into_iter().map(|v| v.trim().to_string()).find(|v| !v.is_empty())
}

// =============================================================================
// SYNC
// =============================================================================

/// Tuning for one editing session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Written as `updatedBy` on every local edit.
    pub actor_id: ActorId,
    pub grid_size: f64,
    pub history_size: usize,
    pub erase_radius: f64,
    /// Quiet period before a property edit is written.
    pub property_debounce: Duration,
    /// Minimum spacing between writes of one dragged or resized shape.
    pub drag_throttle: Duration,
    /// Directory for the local fallback copy and backups.
    pub local_dir: PathBuf,
    pub local_key: String,
}

impl SyncConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            actor_id: env_string("BOARD_ACTOR_ID").unwrap_or_else(|| Uuid::new_v4().to_string()),
            grid_size: env_parse("BOARD_GRID_SIZE", DEFAULT_GRID_SIZE),
            history_size: env_parse("BOARD_HISTORY_SIZE", MAX_HISTORY_SIZE),
            erase_radius: env_parse("BOARD_ERASE_RADIUS", DEFAULT_ERASE_RADIUS),
            property_debounce: Duration::from_millis(env_parse(
                "SYNC_PROPERTY_DEBOUNCE_MS",
                DEFAULT_PROPERTY_DEBOUNCE_MS,
            )),
            drag_throttle: Duration::from_millis(env_parse("SYNC_DRAG_THROTTLE_MS", DEFAULT_DRAG_THROTTLE_MS)),
            local_dir: env_string("BOARD_LOCAL_DIR").map_or_else(|| PathBuf::from(DEFAULT_LOCAL_DIR), PathBuf::from),
            local_key: env_string("BOARD_LOCAL_KEY").unwrap_or_else(|| DEFAULT_LOCAL_KEY.to_string()),
        }
    }

    /// Defaults with an explicit actor; used by embedders and tests.
    #[must_use]
    pub fn for_actor(actor_id: impl Into<ActorId>) -> Self {
        Self {
            actor_id: actor_id.into(),
            grid_size: DEFAULT_GRID_SIZE,
            history_size: MAX_HISTORY_SIZE,
            erase_radius: DEFAULT_ERASE_RADIUS,
            property_debounce: Duration::from_millis(DEFAULT_PROPERTY_DEBOUNCE_MS),
            drag_throttle: Duration::from_millis(DEFAULT_DRAG_THROTTLE_MS),
            local_dir: PathBuf::from(DEFAULT_LOCAL_DIR),
            local_key: DEFAULT_LOCAL_KEY.to_string(),
        }
    }
}

// =============================================================================
// RELAY
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    pub port: u16,
}

impl RelayConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self { port: env_parse("RELAY_PORT", DEFAULT_RELAY_PORT) }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
