//! Integration with `onairconfig`.
//!
//! `PlayerConfigExt` reads the `player.*` section into [`PlayerSettings`] and
//! manages the stream URL stored at `radio.stream_url`. `Config` also
//! implements [`StreamSourceStore`], so the controller can be fed directly by
//! the global configuration:
//!
//! ```no_run
//! use std::sync::Arc;
//! use onairconfig::get_config;
//! use onaircontrol::{PlayerConfigExt, StreamSourceStore};
//!
//! let config = get_config();
//! let settings = config.get_player_settings();
//! let store: Arc<dyn StreamSourceStore> = config.clone();
//! # let _ = (settings, store);
//! ```

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use onairconfig::Config;
use serde_yaml::Value;
use tracing::debug;

use crate::constants::*;
use crate::settings::{PlayerSettings, clamp_volume};
use crate::store::{StoreChangeCallback, StoreSubscription, StreamSourceStore};

#[cfg(feature = "icy")]
use crate::icy::IcyOptions;

/// Player-related accessors on `onairconfig::Config`.
pub trait PlayerConfigExt {
    /// Reads the `player.*` section, using defaults for missing entries.
    fn get_player_settings(&self) -> PlayerSettings;

    fn set_retry_ceiling(&self, ceiling: u32) -> Result<()>;

    fn set_reconnect_delay(&self, delay: Duration) -> Result<()>;

    fn set_start_timeout(&self, timeout: Duration) -> Result<()>;

    /// Configured stream URL, `None` when unset or empty.
    fn get_stream_url(&self) -> Option<String>;

    /// Writes the stream URL. Subscribers of `radio.stream_url` are notified.
    fn set_stream_url(&self, url: &str) -> Result<()>;

    #[cfg(feature = "icy")]
    fn get_icy_options(&self) -> IcyOptions;
}

impl PlayerConfigExt for Config {
    fn get_player_settings(&self) -> PlayerSettings {
        let ms = |key: &str, default: u64| {
            Duration::from_millis(self.get_u64_or(&["player", key], default))
        };

        PlayerSettings {
            source_category: STREAM_URL_CATEGORY.to_string(),
            source_key: STREAM_URL_KEY.to_string(),
            retry_ceiling: self.get_u64_or(&["player", "retry_ceiling"], DEFAULT_RETRY_CEILING as u64)
                .min(u32::MAX as u64) as u32,
            reconnect_delay: ms("reconnect_delay_ms", DEFAULT_RECONNECT_DELAY_MS),
            reconnect_max_delay: ms("reconnect_max_delay_ms", DEFAULT_RECONNECT_MAX_DELAY_MS),
            backoff_multiplier: self.get_f64_or(&["player", "backoff_multiplier"], DEFAULT_BACKOFF_MULTIPLIER),
            start_timeout: ms("start_timeout_ms", DEFAULT_START_TIMEOUT_MS),
            watchdog_interval: ms("watchdog_interval_ms", DEFAULT_WATCHDOG_INTERVAL_MS),
            stuck_buffering_after: ms("stuck_buffering_ms", DEFAULT_STUCK_BUFFERING_MS),
            initial_volume: clamp_volume(self.get_f64_or(&["player", "initial_volume"], 1.0) as f32),
        }
        .sanitized()
    }

    fn set_retry_ceiling(&self, ceiling: u32) -> Result<()> {
        self.set_u64(&["player", "retry_ceiling"], ceiling as u64)
    }

    fn set_reconnect_delay(&self, delay: Duration) -> Result<()> {
        self.set_u64(&["player", "reconnect_delay_ms"], delay.as_millis() as u64)
    }

    fn set_start_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_u64(&["player", "start_timeout_ms"], timeout.as_millis() as u64)
    }

    fn get_stream_url(&self) -> Option<String> {
        let url = self.get_string_or(&[STREAM_URL_CATEGORY, STREAM_URL_KEY], "");
        let url = url.trim();
        (!url.is_empty()).then(|| url.to_string())
    }

    fn set_stream_url(&self, url: &str) -> Result<()> {
        self.set_value(
            &[STREAM_URL_CATEGORY, STREAM_URL_KEY],
            Value::String(url.trim().to_string()),
        )
    }

    #[cfg(feature = "icy")]
    fn get_icy_options(&self) -> IcyOptions {
        IcyOptions {
            stall_timeout: Duration::from_millis(
                self.get_u64_or(&["player", "icy", "stall_timeout_ms"], DEFAULT_ICY_STALL_TIMEOUT_MS),
            ),
            user_agent: self.get_string_or(&["player", "icy", "user_agent"], DEFAULT_ICY_USER_AGENT),
        }
    }
}

#[async_trait]
impl StreamSourceStore for Config {
    async fn get(&self, category: &str, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        // A missing path means "not configured yet", not a failure.
        let value = match self.get_value(&[category, key]) {
            Ok(Value::Null) | Err(_) => return Ok(None),
            Ok(value) => value,
        };
        Ok(Some(serde_json::to_value(&value)?))
    }

    fn on_change(
        &self,
        category: &str,
        key: &str,
        callback: StoreChangeCallback,
    ) -> anyhow::Result<StoreSubscription> {
        let subscription = Config::on_change(self, &[category, key], move |_| callback());
        debug!(category, key, id = %subscription.id(), "Watching stream source");
        Ok(StoreSubscription::new(move || subscription.unsubscribe()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_player_settings_defaults() {
        let config = Config::in_memory("").unwrap();
        assert_eq!(config.get_player_settings(), PlayerSettings::default());
    }

    #[test]
    fn test_player_settings_overrides() {
        let config = Config::in_memory(
            "player:\n  retry_ceiling: 4\n  reconnect_delay_ms: 500\n  start_timeout_ms: 1500\n  initial_volume: 7\n",
        )
        .unwrap();
        let settings = config.get_player_settings();
        assert_eq!(settings.retry_ceiling, 4);
        assert_eq!(settings.reconnect_delay, Duration::from_millis(500));
        assert_eq!(settings.start_timeout, Duration::from_millis(1500));
        assert_eq!(settings.initial_volume, 1.0);
        assert_eq!(settings.watchdog_interval, watchdog_interval());
    }

    #[test]
    fn test_player_setters() {
        let config = Config::in_memory("").unwrap();
        config.set_retry_ceiling(3).unwrap();
        config.set_reconnect_delay(Duration::from_secs(1)).unwrap();
        let settings = config.get_player_settings();
        assert_eq!(settings.retry_ceiling, 3);
        assert_eq!(settings.reconnect_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_stream_url_roundtrip() {
        let config = Config::in_memory("").unwrap();
        assert_eq!(config.get_stream_url(), None);
        config.set_stream_url("  https://stream.example/live ").unwrap();
        assert_eq!(config.get_stream_url().as_deref(), Some("https://stream.example/live"));
    }

    #[tokio::test]
    async fn test_store_get() {
        let config = Config::in_memory("radio:\n  stream_url:\n    url: https://a.example/x\n").unwrap();
        let value = StreamSourceStore::get(&config, "radio", "stream_url").await.unwrap();
        assert_eq!(value, Some(serde_json::json!({ "url": "https://a.example/x" })));

        let missing = StreamSourceStore::get(&config, "radio", "other").await.unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_store_on_change() {
        let config = Config::in_memory("").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = StreamSourceStore::on_change(
            &config,
            "radio",
            "stream_url",
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        config.set_stream_url("https://a.example/1").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        assert_eq!(config.subscriber_count(), 0);
        config.set_stream_url("https://a.example/2").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "icy")]
    #[test]
    fn test_icy_options() {
        let config = Config::in_memory("player:\n  icy:\n    stall_timeout_ms: 2500\n").unwrap();
        let options = config.get_icy_options();
        assert_eq!(options.stall_timeout, Duration::from_millis(2500));
        assert_eq!(options.user_agent, DEFAULT_ICY_USER_AGENT);
    }
}
