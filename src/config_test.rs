#![allow(clippy::float_cmp)]

use super::*;

// Each test uses its own variable names; the process environment is shared
// between test threads.

#[test]
fn env_parse_reads_valid_values() {
    // SAFETY: the variable is unique to this test.
    unsafe { std::env::set_var("BOARDSYNC_TEST_PARSE_OK", " 250 ") };
    assert_eq!(env_parse("BOARDSYNC_TEST_PARSE_OK", 7u64), 250);
}

#[test]
fn env_parse_falls_back_on_garbage_or_absence() {
    // SAFETY: the variable is unique to this test.
    unsafe { std::env::set_var("BOARDSYNC_TEST_PARSE_BAD", "fast") };
    assert_eq!(env_parse("BOARDSYNC_TEST_PARSE_BAD", 300u64), 300);
    assert_eq!(env_parse("BOARDSYNC_TEST_PARSE_MISSING", 40.0f64), 40.0);
}

#[test]
fn for_actor_uses_documented_defaults() {
    let config = SyncConfig::for_actor("alice");
    assert_eq!(config.actor_id, "alice");
    assert_eq!(config.grid_size, 40.0);
    assert_eq!(config.history_size, 20);
    assert_eq!(config.erase_radius, 10.0);
    assert_eq!(config.property_debounce, Duration::from_millis(300));
    assert_eq!(config.drag_throttle, Duration::from_millis(300));
    assert_eq!(config.local_key, "board-push-state");
}

#[test]
fn from_env_generates_an_actor_when_unset() {
    let config = SyncConfig::from_env();
    assert!(!config.actor_id.is_empty());
}
