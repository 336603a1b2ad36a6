use hermes_core::{AssetType, ExchangeId};
use std::path::Path;
use thiserror::Error;

use super::types::{BucketConfig, ExchangeConfig, GatewayConfigFile, GlobalConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("No enabled exchanges in config")]
    NoEnabledExchanges,
    #[error("Exchange not found: {0}")]
    ExchangeNotFound(ExchangeId),
    #[error("{exchange} does not support asset type {asset}")]
    UnsupportedAsset {
        exchange: ExchangeId,
        asset: AssetType,
    },
    #[error("Invalid config for {scope}: {reason}")]
    Invalid { scope: String, reason: String },
}

/// Load engine configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<GatewayConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<GatewayConfigFile, ConfigError> {
    let config: GatewayConfigFile = serde_json::from_str(json)?;
    Ok(config)
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<GatewayConfigFile, ConfigError> {
    let default_config = include_str!("gateway_config.json");
    load_config_from_str(default_config)
}

impl GatewayConfigFile {
    /// Get only enabled exchanges
    pub fn enabled_exchanges(&self) -> Vec<&ExchangeConfig> {
        self.exchanges.iter().filter(|e| e.enabled).collect()
    }

    /// Get a specific exchange by ID
    pub fn get_exchange(&self, id: &ExchangeId) -> Result<&ExchangeConfig, ConfigError> {
        self.exchanges
            .iter()
            .find(|e| &e.id == id)
            .ok_or_else(|| ConfigError::ExchangeNotFound(id.clone()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_exchanges().is_empty() {
            return Err(ConfigError::NoEnabledExchanges);
        }
        self.global.validate()?;
        for exchange in self.enabled_exchanges() {
            exchange.validate()?;
        }
        Ok(())
    }
}

impl GlobalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            scope: "global".to_string(),
            reason: reason.to_string(),
        };
        if self.lanes == 0 {
            return Err(invalid("lanes must be at least 1"));
        }
        if self.lane_capacity == 0 || self.inbound_capacity == 0 || self.event_capacity == 0 {
            return Err(invalid("channel capacities must be at least 1"));
        }
        if self.snapshot_concurrency == 0 {
            return Err(invalid("snapshot_concurrency must be at least 1"));
        }
        if self.gap_check_interval_ms == 0 {
            return Err(invalid("gap_check_interval_ms must be positive"));
        }
        Ok(())
    }
}

impl ExchangeConfig {
    /// Fail with `UnsupportedAsset` unless this exchange serves `asset`
    pub fn ensure_supported(&self, asset: AssetType) -> Result<(), ConfigError> {
        if self.supports(asset) {
            Ok(())
        } else {
            Err(ConfigError::UnsupportedAsset {
                exchange: self.id.clone(),
                asset,
            })
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid {
            scope: self.id.to_string(),
            reason,
        };
        if self.ws_url.is_empty() {
            return Err(invalid("ws_url is empty".into()));
        }
        if self.assets.is_empty() {
            return Err(invalid("no asset types configured".into()));
        }
        if self.websocket.subscription_batch_size == 0 {
            return Err(invalid("subscription_batch_size must be at least 1".into()));
        }
        if self.websocket.response_max_limit == 0 {
            return Err(invalid("response_max_limit must be at least 1".into()));
        }
        if self.websocket.response_check_timeout_ms == 0 {
            return Err(invalid("response_check_timeout_ms must be positive".into()));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(invalid("reconnect multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(invalid("reconnect jitter must be within 0.0..=1.0".into()));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(invalid("initial_delay_ms exceeds max_delay_ms".into()));
        }
        let buckets = [
            ("public", &self.rate_limits.public),
            ("private", &self.rate_limits.private),
            ("subscribe", &self.rate_limits.subscribe),
        ];
        for (name, bucket) in buckets {
            check_bucket(bucket).map_err(|reason| invalid(format!("{name} bucket: {reason}")))?;
        }
        Ok(())
    }
}

fn check_bucket(bucket: &BucketConfig) -> Result<(), String> {
    if bucket.capacity == 0 {
        return Err("capacity must be at least 1".into());
    }
    if bucket.refill_per_second.is_nan() || bucket.refill_per_second <= 0.0 {
        return Err("refill_per_second must be positive".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_default_config() {
        let config = load_default_config().unwrap();
        assert!(!config.exchanges.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_enabled_exchanges() {
        let config = load_default_config().unwrap();
        let enabled = config.enabled_exchanges();
        assert!(enabled.iter().any(|e| e.id.as_str() == "binance"));
        assert!(enabled.iter().all(|e| e.enabled));
    }

    #[test]
    fn test_get_exchange() {
        let config = load_default_config().unwrap();
        let coinbene = config.get_exchange(&ExchangeId::new("coinbene")).unwrap();
        assert_eq!(coinbene.name, "CoinBene");
        assert!(coinbene.supports(AssetType::PerpetualSwap));

        let missing = config.get_exchange(&ExchangeId::new("nowhere"));
        assert!(matches!(missing, Err(ConfigError::ExchangeNotFound(_))));
    }

    #[test]
    fn test_unsupported_asset() {
        let config = ExchangeConfig::new("binance", "wss://example");
        assert!(config.ensure_supported(AssetType::Spot).is_ok());
        assert!(matches!(
            config.ensure_supported(AssetType::Futures),
            Err(ConfigError::UnsupportedAsset { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_tunables() {
        let mut config = ExchangeConfig::new("binance", "wss://example");
        config.reconnect.jitter = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = ExchangeConfig::new("binance", "wss://example");
        config.rate_limits.subscribe.refill_per_second = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_no_enabled_exchanges() {
        let config = load_config_from_str(
            r#"{ "exchanges": [ { "id": "x", "ws_url": "ws://x", "enabled": false } ] }"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NoEnabledExchanges)
        ));
    }
}
