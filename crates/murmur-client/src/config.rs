//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a development build starts against a local
//! backend with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use murmur_shared::constants::{
    BUZZ_COOLDOWN_SECS, BUZZ_EFFECT_MS, DISAPPEARING_TTL_MS, EXPIRY_SWEEP_INTERVAL_MS,
    NOTIFICATION_DISPLAY_SECS, RING_DURATION_SECS, TYPING_DEBOUNCE_MS,
};

use crate::store::ReconcileStrategy;

/// Timer settings used by the controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Lifetime of a message sent in disappearing mode.
    pub disappearing_ttl: Duration,
    pub expiry_sweep: Duration,
    pub typing_debounce: Duration,
    pub buzz_cooldown: Duration,
    pub buzz_effect: Duration,
    /// Simulated ring before a started call connects.
    pub ring: Duration,
    pub notification: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            disappearing_ttl: Duration::from_millis(DISAPPEARING_TTL_MS as u64),
            expiry_sweep: Duration::from_millis(EXPIRY_SWEEP_INTERVAL_MS),
            typing_debounce: Duration::from_millis(TYPING_DEBOUNCE_MS),
            buzz_cooldown: Duration::from_secs(BUZZ_COOLDOWN_SECS),
            buzz_effect: Duration::from_millis(BUZZ_EFFECT_MS),
            ring: Duration::from_secs(RING_DURATION_SECS),
            notification: Duration::from_secs(NOTIFICATION_DISPLAY_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the hosted backend (REST, storage and realtime).
    /// Env: `MURMUR_BACKEND_URL`
    /// Default: `http://localhost:54321`
    pub backend_url: String,

    /// Public API key sent with every backend request.
    /// Env: `MURMUR_ANON_KEY`
    /// Default: empty.
    pub anon_key: String,

    /// Object storage bucket for chat media.
    /// Env: `MURMUR_STORAGE_BUCKET`
    /// Default: `chat-media`
    pub storage_bucket: String,

    /// API key of the generation service. Without one, bot replies,
    /// suggestions and summaries use the static fallbacks.
    /// Env: `MURMUR_GENERATION_API_KEY`
    pub generation_api_key: Option<String>,

    /// Env: `MURMUR_GENERATION_MODEL`
    /// Default: `gemini-1.5-flash`
    pub generation_model: String,

    /// How realtime echoes of locally sent messages are reconciled.
    /// Env: `MURMUR_RECONCILE` (`trust-local` / `dedup`)
    /// Default: `dedup`
    pub reconcile: ReconcileStrategy,

    /// Local cache database file.
    /// Env: `MURMUR_DB_PATH`
    /// Default: platform data directory.
    pub db_path: Option<PathBuf>,

    pub timings: Timings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            storage_bucket: "chat-media".to_string(),
            generation_api_key: None,
            generation_model: "gemini-1.5-flash".to_string(),
            reconcile: ReconcileStrategy::default(),
            db_path: None,
            timings: Timings::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("MURMUR_BACKEND_URL") {
            let url = url.trim_end_matches('/').to_string();
            if url.starts_with("http://") || url.starts_with("https://") {
                config.backend_url = url;
            } else {
                tracing::warn!(value = %url, "Invalid MURMUR_BACKEND_URL, using default");
            }
        }

        if let Some(key) = lookup("MURMUR_ANON_KEY") {
            config.anon_key = key;
        }

        if let Some(bucket) = lookup("MURMUR_STORAGE_BUCKET") {
            if !bucket.is_empty() {
                config.storage_bucket = bucket;
            }
        }

        if let Some(key) = lookup("MURMUR_GENERATION_API_KEY") {
            if !key.is_empty() {
                config.generation_api_key = Some(key);
            }
        }

        if let Some(model) = lookup("MURMUR_GENERATION_MODEL") {
            if !model.is_empty() {
                config.generation_model = model;
            }
        }

        if let Some(value) = lookup("MURMUR_RECONCILE") {
            match ReconcileStrategy::parse(&value) {
                Some(strategy) => config.reconcile = strategy,
                None => {
                    tracing::warn!(value = %value, "Invalid MURMUR_RECONCILE, using default");
                }
            }
        }

        if let Some(path) = lookup("MURMUR_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    /// Websocket endpoint of the realtime service.
    pub fn realtime_url(&self) -> String {
        let ws_base = if let Some(rest) = self.backend_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.backend_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.backend_url.clone()
        };
        format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            self.anon_key
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.backend_url, "http://localhost:54321");
        assert_eq!(config.reconcile, ReconcileStrategy::DedupById);
        assert!(config.generation_api_key.is_none());
        assert_eq!(config.timings.disappearing_ttl, Duration::from_secs(10));
        assert_eq!(config.timings.ring, Duration::from_secs(3));
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("MURMUR_BACKEND_URL", "https://demo.example.co/"),
            ("MURMUR_RECONCILE", "trust-local"),
            ("MURMUR_GENERATION_API_KEY", "k"),
            ("MURMUR_DB_PATH", "/tmp/murmur.db"),
        ]));
        assert_eq!(config.backend_url, "https://demo.example.co");
        assert_eq!(config.reconcile, ReconcileStrategy::TrustLocal);
        assert_eq!(config.generation_api_key.as_deref(), Some("k"));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/murmur.db")));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("MURMUR_BACKEND_URL", "ftp://nope"),
            ("MURMUR_RECONCILE", "sometimes"),
            ("MURMUR_GENERATION_API_KEY", ""),
        ]));
        assert_eq!(config.backend_url, "http://localhost:54321");
        assert_eq!(config.reconcile, ReconcileStrategy::DedupById);
        assert!(config.generation_api_key.is_none());
    }

    #[test]
    fn test_realtime_url_switches_scheme() {
        let mut config = ClientConfig {
            anon_key: "anon".into(),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.realtime_url(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        config.backend_url = "https://demo.example.co".into();
        assert!(config.realtime_url().starts_with("wss://demo.example.co/realtime/v1/"));
    }
}
