//! Feed configuration from environment variables
//!
//! Every option is a fixed constant for the lifetime of a feed; nothing is
//! reconfigured at runtime.

use crate::aggregator::AggregatorConfig;
use crate::error::ConfigError;
use crate::supervisor::SupervisorConfig;
use crate::transport::polling::{PollRequest, PollingSettings};
use crate::transport::streaming::StreamingSettings;
use crate::transport::TransportKind;
use crate::window::WindowConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// The three feed shapes the dashboard runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedPreset {
    /// Latest block polled over JSON-RPC
    BlockRays,
    /// Validator block proposals pushed over a WebSocket
    ValidatorStream,
    /// Any `type`-tagged event stream
    EventStream,
}

impl FeedPreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedPreset::BlockRays => "block-rays",
            FeedPreset::ValidatorStream => "validator-stream",
            FeedPreset::EventStream => "event-stream",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "block-rays" | "block_rays" | "blocks" => Some(FeedPreset::BlockRays),
            "validator-stream" | "validator_stream" | "validators" => {
                Some(FeedPreset::ValidatorStream)
            }
            "event-stream" | "event_stream" | "events" => Some(FeedPreset::EventStream),
            _ => None,
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        match self {
            FeedPreset::BlockRays => TransportKind::Polling,
            FeedPreset::ValidatorStream | FeedPreset::EventStream => TransportKind::Streaming,
        }
    }
}

/// Configuration for one feed instance
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub preset: FeedPreset,

    /// Upstream endpoint (http(s) for polling, ws(s) for streaming)
    pub endpoint: String,

    /// JSON-RPC method issued on every poll; plain GET when None
    pub rpc_method: Option<String>,

    /// Message sent right after a stream opens
    pub subscribe_message: Option<String>,

    /// JSON pointer to the latest item inside a poll response
    pub item_pointer: String,

    /// Field of the latest item used as its identity
    pub identity_field: String,

    pub poll_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub dwell_ms: i64,
    pub retention_ms: i64,
    pub max_items: usize,
    pub rate_window_ms: i64,
    pub leaderboard_size: usize,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub request_timeout_ms: u64,

    /// Forwarded event buffer between supervisor and feed task
    pub channel_buffer: usize,

    pub rust_log: String,
}

impl FeedConfig {
    /// Defaults for a preset pointed at `endpoint`
    pub fn for_preset(preset: FeedPreset, endpoint: impl Into<String>) -> Self {
        let rpc_method = match preset {
            FeedPreset::BlockRays => Some("eth_getBlockByNumber".to_string()),
            _ => None,
        };

        Self {
            preset,
            endpoint: endpoint.into(),
            rpc_method,
            subscribe_message: None,
            item_pointer: "/result".to_string(),
            identity_field: "hash".to_string(),
            poll_interval_ms: 2_000,
            sweep_interval_ms: 500,
            dwell_ms: 6_000,
            retention_ms: 12_000,
            max_items: 24,
            rate_window_ms: 60_000,
            leaderboard_size: 10,
            reconnect_min_ms: 1_000,
            reconnect_max_ms: 30_000,
            request_timeout_ms: 5_000,
            channel_buffer: 1_000,
            rust_log: "info".to_string(),
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `FEED_ENDPOINT` (required)
    /// - `FEED_PRESET` (default: block-rays)
    /// - `FEED_RPC_METHOD`, `FEED_SUBSCRIBE_MESSAGE`, `FEED_ITEM_POINTER`, `FEED_IDENTITY_FIELD`
    /// - `POLL_INTERVAL_MS` (default: 2000)
    /// - `SWEEP_INTERVAL_MS` (default: 500)
    /// - `DWELL_MS` (default: 6000)
    /// - `RETENTION_MS` (default: 12000)
    /// - `MAX_ITEMS` (default: 24)
    /// - `RATE_WINDOW_MS` (default: 60000)
    /// - `LEADERBOARD_SIZE` (default: 10)
    /// - `RECONNECT_MIN_MS` / `RECONNECT_MAX_MS` (default: 1000 / 30000)
    /// - `REQUEST_TIMEOUT_MS` (default: 5000)
    /// - `FEED_CHANNEL_BUFFER` (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`FeedConfig::from_env`] over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup("FEED_ENDPOINT")
            .ok_or_else(|| ConfigError::MissingVariable("FEED_ENDPOINT".to_string()))?;

        let preset = match lookup("FEED_PRESET") {
            Some(raw) => FeedPreset::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidValue(format!("unknown FEED_PRESET '{}'", raw))
            })?,
            None => FeedPreset::BlockRays,
        };

        let mut config = Self::for_preset(preset, endpoint);

        if let Some(method) = lookup("FEED_RPC_METHOD") {
            config.rpc_method = if method.trim().is_empty() {
                None
            } else {
                Some(method.trim().to_string())
            };
        }
        config.subscribe_message = lookup("FEED_SUBSCRIBE_MESSAGE").or(config.subscribe_message);
        if let Some(pointer) = lookup("FEED_ITEM_POINTER") {
            config.item_pointer = pointer;
        }
        if let Some(field) = lookup("FEED_IDENTITY_FIELD") {
            config.identity_field = field;
        }

        config.poll_interval_ms = parse_or(&lookup, "POLL_INTERVAL_MS", config.poll_interval_ms);
        config.sweep_interval_ms = parse_or(&lookup, "SWEEP_INTERVAL_MS", config.sweep_interval_ms);
        config.dwell_ms = parse_or(&lookup, "DWELL_MS", config.dwell_ms);
        config.retention_ms = parse_or(&lookup, "RETENTION_MS", config.retention_ms);
        config.max_items = parse_or(&lookup, "MAX_ITEMS", config.max_items);
        config.rate_window_ms = parse_or(&lookup, "RATE_WINDOW_MS", config.rate_window_ms);
        config.leaderboard_size = parse_or(&lookup, "LEADERBOARD_SIZE", config.leaderboard_size);
        config.reconnect_min_ms = parse_or(&lookup, "RECONNECT_MIN_MS", config.reconnect_min_ms);
        config.reconnect_max_ms = parse_or(&lookup, "RECONNECT_MAX_MS", config.reconnect_max_ms);
        config.request_timeout_ms =
            parse_or(&lookup, "REQUEST_TIMEOUT_MS", config.request_timeout_ms);
        config.channel_buffer = parse_or(&lookup, "FEED_CHANNEL_BUFFER", config.channel_buffer);
        config.rust_log = lookup("RUST_LOG").unwrap_or(config.rust_log);

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let scheme_ok = match self.preset.transport_kind() {
            TransportKind::Polling => {
                self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")
            }
            TransportKind::Streaming => {
                self.endpoint.starts_with("ws://") || self.endpoint.starts_with("wss://")
            }
        };
        if !scheme_ok {
            return Err(ConfigError::InvalidValue(format!(
                "FEED_ENDPOINT '{}' does not match a {} transport",
                self.endpoint,
                self.preset.transport_kind().as_str()
            )));
        }

        if self.poll_interval_ms == 0 || self.sweep_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "poll and sweep intervals must be positive".to_string(),
            ));
        }

        if self.channel_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "FEED_CHANNEL_BUFFER must be positive".to_string(),
            ));
        }

        if self.reconnect_min_ms > self.reconnect_max_ms {
            return Err(ConfigError::InvalidValue(format!(
                "RECONNECT_MIN_MS ({}) exceeds RECONNECT_MAX_MS ({})",
                self.reconnect_min_ms, self.reconnect_max_ms
            )));
        }

        self.window_config().map(|_| ())
    }

    pub fn window_config(&self) -> Result<WindowConfig, ConfigError> {
        WindowConfig::new(self.dwell_ms, self.retention_ms, self.max_items)
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            rate_window_ms: self.rate_window_ms,
            leaderboard_size: self.leaderboard_size,
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            reconnect_min: Duration::from_millis(self.reconnect_min_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
        }
    }

    pub fn polling_settings(&self) -> PollingSettings {
        let request = match &self.rpc_method {
            Some(method) => PollRequest::JsonRpc {
                method: method.clone(),
                params: serde_json::json!(["latest", false]),
            },
            None => PollRequest::Get,
        };

        PollingSettings {
            url: self.endpoint.clone(),
            request,
            interval: Duration::from_millis(self.poll_interval_ms),
            timeout: Duration::from_millis(self.request_timeout_ms),
            item_pointer: self.item_pointer.clone(),
            identity_field: self.identity_field.clone(),
        }
    }

    pub fn streaming_settings(&self) -> StreamingSettings {
        StreamingSettings {
            url: self.endpoint.clone(),
            subscribe_message: self.subscribe_message.clone(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("Invalid {} '{}', keeping default", key, raw);
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config =
            FeedConfig::from_lookup(lookup_from(&[("FEED_ENDPOINT", "https://rpc.example.org")]))
                .unwrap();

        assert_eq!(config.preset, FeedPreset::BlockRays);
        assert_eq!(config.rpc_method.as_deref(), Some("eth_getBlockByNumber"));
        assert_eq!(config.poll_interval_ms, 2_000);
        assert_eq!(config.dwell_ms, 6_000);
        assert_eq!(config.retention_ms, 12_000);
        assert_eq!(config.max_items, 24);
        assert_eq!(config.item_pointer, "/result");
    }

    #[test]
    fn test_custom_config() {
        let config = FeedConfig::from_lookup(lookup_from(&[
            ("FEED_ENDPOINT", "wss://feed.example.org/validators"),
            ("FEED_PRESET", "validator-stream"),
            ("DWELL_MS", "1000"),
            ("RETENTION_MS", "3000"),
            ("MAX_ITEMS", "5"),
            ("FEED_SUBSCRIBE_MESSAGE", r#"{"subscribe":"proposals"}"#),
        ]))
        .unwrap();

        assert_eq!(config.preset, FeedPreset::ValidatorStream);
        assert_eq!(config.rpc_method, None);
        assert_eq!(config.dwell_ms, 1_000);
        assert_eq!(config.retention_ms, 3_000);
        assert_eq!(config.max_items, 5);
        assert!(config.subscribe_message.is_some());
    }

    #[test]
    fn test_missing_endpoint() {
        let err = FeedConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert_eq!(err, ConfigError::MissingVariable("FEED_ENDPOINT".to_string()));
    }

    #[test]
    fn test_scheme_must_match_transport() {
        let err = FeedConfig::from_lookup(lookup_from(&[
            ("FEED_ENDPOINT", "https://feed.example.org"),
            ("FEED_PRESET", "event-stream"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_dwell_must_be_shorter_than_retention() {
        let err = FeedConfig::from_lookup(lookup_from(&[
            ("FEED_ENDPOINT", "http://localhost:8545"),
            ("DWELL_MS", "5000"),
            ("RETENTION_MS", "5000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_unparseable_number_keeps_default() {
        let config = FeedConfig::from_lookup(lookup_from(&[
            ("FEED_ENDPOINT", "http://localhost:8545"),
            ("POLL_INTERVAL_MS", "soon"),
        ]))
        .unwrap();
        assert_eq!(config.poll_interval_ms, 2_000);
    }

    #[test]
    fn test_empty_rpc_method_switches_to_get() {
        let config = FeedConfig::from_lookup(lookup_from(&[
            ("FEED_ENDPOINT", "http://localhost:8080/latest"),
            ("FEED_RPC_METHOD", ""),
            ("FEED_ITEM_POINTER", ""),
        ]))
        .unwrap();
        assert!(matches!(config.polling_settings().request, PollRequest::Get));
        assert_eq!(config.polling_settings().item_pointer, "");
    }
}
