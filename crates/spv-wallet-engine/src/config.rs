//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use spv_wallet_arc::ArcConfig;
use spv_wallet_paymail::PaymailConfig;

use crate::error::EngineError;
use crate::fee::{FeeUnit, MAX_SATOSHIS_PER_BYTE};
use crate::resolver::DEFAULT_P2P_MINIMUM_SATOSHIS;

/// Retry policy for outbound calls (P2P delivery, broadcast).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry; doubled after each attempt.
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff_ms: 250,
        }
    }
}

impl RetryConfig {
    /// Delay before the first retry.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default fee rate when a draft does not set one.
    pub fee_unit: FeeUnit,
    /// Change below this many satoshis is added to the fee.
    pub dust_limit: u64,
    /// Default draft lifetime in seconds.
    pub draft_expiry_secs: u64,
    /// Amount requested from P2P providers when a zero amount is asked for.
    pub p2p_minimum_satoshis: u64,
    /// Upper bound on fee/change recomputation rounds.
    pub max_fee_rounds: u32,
    /// Retry policy for P2P delivery and broadcast.
    pub retry: RetryConfig,
    /// Period of the expiry sweep and pending-obligation tasks.
    pub background_interval_secs: u64,
    /// Paymail client settings, including the default sender.
    pub paymail: PaymailConfig,
    /// ARC endpoint and broadcast options.
    pub arc: ArcConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_unit: FeeUnit::default(),
            dust_limit: 1,
            draft_expiry_secs: 20,
            p2p_minimum_satoshis: DEFAULT_P2P_MINIMUM_SATOSHIS,
            max_fee_rounds: 8,
            retry: RetryConfig::default(),
            background_interval_secs: 10,
            paymail: PaymailConfig::default(),
            arc: ArcConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidInput(format!("engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.fee_unit.is_valid() {
            return Err(EngineError::InvalidInput(format!(
                "fee_unit must have non-zero bytes and at most {MAX_SATOSHIS_PER_BYTE} sat/byte"
            )));
        }
        if self.draft_expiry_secs == 0 {
            return Err(EngineError::InvalidInput(
                "draft_expiry_secs must be non-zero".to_string(),
            ));
        }
        if self.retry.attempts == 0 {
            return Err(EngineError::InvalidInput(
                "retry.attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Background pass period, at least one second.
    pub fn background_interval(&self) -> Duration {
        Duration::from_secs(self.background_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.fee_unit, FeeUnit::new(1, 1));
        assert_eq!(config.dust_limit, 1);
        assert_eq!(config.draft_expiry_secs, 20);
        assert_eq!(config.p2p_minimum_satoshis, 100);
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.initial_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn test_from_json_partial() {
        let config = EngineConfig::from_json(
            r#"{
                "fee_unit": {"satoshis": 50, "bytes": 1000},
                "arc": {"base_url": "http://localhost:9090/v1"},
                "paymail": {"sender_paymail": "alice@example.com"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.fee_unit, FeeUnit::new(50, 1000));
        assert_eq!(config.arc.base_url, "http://localhost:9090/v1");
        assert!(config.arc.prefer_extended_format);
        assert_eq!(config.paymail.sender_paymail, "alice@example.com");
        assert_eq!(config.paymail.scheme, "https");
        assert_eq!(config.draft_expiry_secs, 20);
    }

    #[test]
    fn test_from_json_rejects_bad_values() {
        assert!(EngineConfig::from_json(r#"{"fee_unit": {"satoshis": 1, "bytes": 0}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"fee_unit": {"satoshis": 18446744073709551615, "bytes": 1}}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"draft_expiry_secs": 0}"#).is_err());
        assert!(EngineConfig::from_json("not json").is_err());
    }
}
