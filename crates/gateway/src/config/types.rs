use hermes_core::{AssetType, ExchangeId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigFile {
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
}

/// Configuration for a single exchange connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Unique identifier for the exchange (e.g., "binance", "coinbene")
    pub id: ExchangeId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Whether this exchange is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// WebSocket URL
    pub ws_url: String,
    /// Asset classes this exchange serves
    #[serde(default = "default_assets")]
    pub assets: Vec<AssetType>,
    #[serde(default)]
    pub websocket: WebsocketConfig,
    #[serde(default)]
    pub orderbook: OrderbookConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

impl ExchangeConfig {
    /// Minimal config with every tunable at its default
    pub fn new(id: impl Into<ExchangeId>, ws_url: impl Into<String>) -> Self {
        ExchangeConfig {
            id: id.into(),
            name: String::new(),
            enabled: true,
            ws_url: ws_url.into(),
            assets: default_assets(),
            websocket: WebsocketConfig::default(),
            orderbook: OrderbookConfig::default(),
            reconnect: ReconnectConfig::default(),
            rate_limits: RateLimitConfig::default(),
        }
    }

    pub fn supports(&self, asset: AssetType) -> bool {
        self.assets.contains(&asset)
    }
}

/// Socket health and subscription traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebsocketConfig {
    /// Reconnect if nothing arrives for this long
    #[serde(default = "default_response_check_timeout")]
    pub response_check_timeout_ms: u64,
    /// Max subscribe/unsubscribe requests awaiting an ack
    #[serde(default = "default_response_max_limit")]
    pub response_max_limit: usize,
    /// Max specs coalesced into one wire message
    #[serde(default = "default_subscription_batch_size")]
    pub subscription_batch_size: usize,
    /// Pending subscriptions are activated optimistically after this long
    #[serde(default = "default_subscription_ack_timeout")]
    pub subscription_ack_timeout_ms: u64,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        WebsocketConfig {
            response_check_timeout_ms: default_response_check_timeout(),
            response_max_limit: default_response_max_limit(),
            subscription_batch_size: default_subscription_batch_size(),
            subscription_ack_timeout_ms: default_subscription_ack_timeout(),
        }
    }
}

impl WebsocketConfig {
    pub fn response_check_timeout(&self) -> Duration {
        Duration::from_millis(self.response_check_timeout_ms)
    }

    pub fn subscription_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_ack_timeout_ms)
    }
}

/// Order book synchronization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderbookConfig {
    /// Max out-of-sequence updates held per book while synced
    #[serde(default = "default_buffer_limit")]
    pub buffer_limit: usize,
    /// Sort buffered updates by sequence before replay
    #[serde(default = "default_true")]
    pub sort_buffer: bool,
    /// Reject crossed books and negative amounts
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Resync if a gap stays open this long
    #[serde(default = "default_gap_timeout")]
    pub gap_timeout_ms: u64,
    /// Levels requested per REST snapshot
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: u32,
    /// Max updates held per book while its snapshot is in flight
    #[serde(default = "default_awaiting_buffer_limit")]
    pub awaiting_buffer_limit: usize,
}

impl Default for OrderbookConfig {
    fn default() -> Self {
        OrderbookConfig {
            buffer_limit: default_buffer_limit(),
            sort_buffer: true,
            verify: true,
            gap_timeout_ms: default_gap_timeout(),
            snapshot_depth: default_snapshot_depth(),
            awaiting_buffer_limit: default_awaiting_buffer_limit(),
        }
    }
}

impl OrderbookConfig {
    pub fn gap_timeout(&self) -> Duration {
        Duration::from_millis(self.gap_timeout_ms)
    }
}

/// Capped exponential backoff between reconnect attempts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fraction of the delay randomized either way (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Give up after this many consecutive failures; 0 retries forever
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// One token bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Burst size
    pub capacity: u32,
    pub refill_per_second: f64,
}

/// Token buckets per endpoint class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Unauthenticated REST (snapshots, tickers)
    #[serde(default = "default_public_bucket")]
    pub public: BucketConfig,
    /// Authenticated REST
    #[serde(default = "default_private_bucket")]
    pub private: BucketConfig,
    /// Outbound subscribe/unsubscribe messages
    #[serde(default = "default_subscribe_bucket")]
    pub subscribe: BucketConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            public: default_public_bucket(),
            private: default_private_bucket(),
            subscribe: default_subscribe_bucket(),
        }
    }
}

/// Global configuration that applies to all exchanges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Number of processing lanes books are hashed onto
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// Queue depth per lane
    #[serde(default = "default_lane_capacity")]
    pub lane_capacity: usize,
    /// How often lanes look for expired gaps
    #[serde(default = "default_gap_check_interval")]
    pub gap_check_interval_ms: u64,
    /// Trade ids remembered per book for deduplication
    #[serde(default = "default_trade_history_limit")]
    pub trade_history_limit: usize,
    /// Unflushed trades kept per book; oldest dropped beyond this
    #[serde(default = "default_trade_pending_limit")]
    pub trade_pending_limit: usize,
    /// Capacity of the service event broadcast
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Concurrent REST snapshot fetches
    #[serde(default = "default_snapshot_concurrency")]
    pub snapshot_concurrency: usize,
    /// Raw inbound messages queued per connection
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            lanes: default_lanes(),
            lane_capacity: default_lane_capacity(),
            gap_check_interval_ms: default_gap_check_interval(),
            trade_history_limit: default_trade_history_limit(),
            trade_pending_limit: default_trade_pending_limit(),
            event_capacity: default_event_capacity(),
            snapshot_concurrency: default_snapshot_concurrency(),
            inbound_capacity: default_inbound_capacity(),
        }
    }
}

impl GlobalConfig {
    pub fn gap_check_interval(&self) -> Duration {
        Duration::from_millis(self.gap_check_interval_ms)
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_assets() -> Vec<AssetType> {
    vec![AssetType::Spot]
}

fn default_response_check_timeout() -> u64 {
    30_000
}

fn default_response_max_limit() -> usize {
    16
}

fn default_subscription_batch_size() -> usize {
    50
}

fn default_subscription_ack_timeout() -> u64 {
    7_000
}

fn default_buffer_limit() -> usize {
    5
}

fn default_gap_timeout() -> u64 {
    5_000
}

fn default_snapshot_depth() -> u32 {
    100
}

fn default_awaiting_buffer_limit() -> usize {
    1_000
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_public_bucket() -> BucketConfig {
    BucketConfig {
        capacity: 20,
        refill_per_second: 10.0,
    }
}

fn default_private_bucket() -> BucketConfig {
    BucketConfig {
        capacity: 10,
        refill_per_second: 5.0,
    }
}

fn default_subscribe_bucket() -> BucketConfig {
    BucketConfig {
        capacity: 5,
        refill_per_second: 5.0,
    }
}

fn default_lanes() -> usize {
    4
}

fn default_lane_capacity() -> usize {
    1_024
}

fn default_gap_check_interval() -> u64 {
    250
}

fn default_trade_history_limit() -> usize {
    10_000
}

fn default_trade_pending_limit() -> usize {
    5_000
}

fn default_event_capacity() -> usize {
    1_024
}

fn default_snapshot_concurrency() -> usize {
    4
}

fn default_inbound_capacity() -> usize {
    4_096
}
