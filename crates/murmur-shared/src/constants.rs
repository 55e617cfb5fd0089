/// Application name
pub const APP_NAME: &str = "Murmur";

/// Lifetime of a message composed while disappearing mode is on (10 s)
pub const DISAPPEARING_TTL_MS: i64 = 10_000;

/// Period of the per-session expiry sweep
pub const EXPIRY_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Idle time after the last keystroke before `typing = false` is broadcast
pub const TYPING_DEBOUNCE_MS: u64 = 2_000;

/// Minimum spacing between two outgoing buzzes
pub const BUZZ_COOLDOWN_SECS: u64 = 30;

/// How long the incoming buzz effect stays on screen
pub const BUZZ_EFFECT_MS: u64 = 1_500;

/// Simulated ring time before a started call becomes connected
pub const RING_DURATION_SECS: u64 = 3;

/// How long a toast notification is displayed
pub const NOTIFICATION_DISPLAY_SECS: u64 = 3;

/// Realtime socket heartbeat interval
pub const HEARTBEAT_INTERVAL_SECS: u64 = 25;

/// Channel topic carrying every chat event for the signed-in user
pub const DEFAULT_CHANNEL_TOPIC: &str = "realtime:chat";

/// Table whose inserts are delivered as `new_message`
pub const MESSAGES_TABLE: &str = "messages";

/// Bot reply used when the generation service is unreachable
pub const FALLBACK_REPLY: &str = "I'm having trouble connecting right now. Please try again in a moment.";

/// Quick replies used when the generation service is unreachable
pub const FALLBACK_SUGGESTIONS: [&str; 3] = ["Sounds good!", "Tell me more", "Thanks!"];

/// Summary text used when the generation service is unreachable
pub const FALLBACK_SUMMARY: &str = "Summary unavailable.";
