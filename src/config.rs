//! Engine configuration.
//!
//! The launcher hands the process a single JSON document; secrets may be
//! overridden from the environment so credential files never need to hold
//! them.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub solana: SolanaConfig,
    pub ftx: FtxConfig,
    pub serum: SerumConfig,
    pub mango: MangoConfig,
    pub key_store: KeyStoreConfig,
    pub pairs: Vec<PairConfig>,
    pub currencies: Vec<CurrencyConfig>,
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolanaConfig {
    pub http_url: String,
    pub ws_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtxConfig {
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerumConfig {
    /// Base58 address of the serum dex program.
    pub program_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MangoConfig {
    pub program_id: String,
    pub group_address: String,
    pub account_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyStoreConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairConfig {
    pub base: String,
    pub quote: String,
    pub cex_market_name: String,
    pub dex_market_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyConfig {
    pub name: String,
    pub mint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub bucket: String,
    pub org: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub max_usd_trade_size: Decimal,
    pub min_usd_trade_profit: Decimal,
    /// Compute and publish arbitrage metrics without sending orders.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Credentials may come from the environment instead of the config file.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("FTX_API_KEY") {
            self.ftx.api_key = key;
        }
        if let Ok(secret) = std::env::var("FTX_API_SECRET") {
            self.ftx.api_secret = secret;
        }
        if let Some(telemetry) = self.telemetry.as_mut() {
            if let Ok(token) = std::env::var("TELEMETRY_TOKEN") {
                telemetry.token = token;
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.solana.http_url.is_empty() {
            return Err(Error::Config("solana.http_url cannot be empty".into()));
        }
        if self.solana.ws_url.is_empty() {
            return Err(Error::Config("solana.ws_url cannot be empty".into()));
        }
        if self.ftx.host.is_empty() {
            return Err(Error::Config("ftx.host cannot be empty".into()));
        }
        if self.pairs.is_empty() {
            return Err(Error::Config("at least one trading pair is required".into()));
        }
        if self.currencies.is_empty() {
            return Err(Error::Config("at least one currency is required".into()));
        }
        for pair in &self.pairs {
            let has_base = self.currencies.iter().any(|c| c.name == pair.base);
            let has_quote = self.currencies.iter().any(|c| c.name == pair.quote);
            if !has_base || !has_quote {
                return Err(Error::Config(format!(
                    "pair {}/{} references an unknown currency",
                    pair.base, pair.quote
                )));
            }
        }
        if self.strategy.max_usd_trade_size <= Decimal::ZERO {
            return Err(Error::Config(
                "strategy.max_usd_trade_size must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn init_logging(&self) {
        use tracing_subscriber::EnvFilter;

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.logging.level.clone()));

        if self.logging.format == "json" {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        } else {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> serde_json::Value {
        serde_json::json!({
            "solana": {"http_url": "https://node.example", "ws_url": "wss://node.example"},
            "ftx": {"host": "ftx.example"},
            "serum": {"program_id": "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"},
            "mango": {
                "program_id": "mv3ekLzLbnVPNxjSKvqBpU3ZeZXPQdEC3bp5MDEBG68",
                "group_address": "98pjRuQjK3qA6gXts96PqZT4Ze5QmnCmt3QYjhbUSPue",
                "account_address": "8mFQbdXsFXt3R3cu3oSNS3bDZRwJRP18vyzd9J278J9z"
            },
            "key_store": {"path": "/tmp/keys"},
            "pairs": [{"base": "SOL", "quote": "USD", "cex_market_name": "SOL/USD",
                       "dex_market_address": "9wFFyRfZBsuAha4YcuxcXLKwMxJR43S7fPfQLusDBzvT"}],
            "currencies": [
                {"name": "SOL", "mint": "So11111111111111111111111111111111111111112"},
                {"name": "USD", "mint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"}
            ],
            "strategy": {"max_usd_trade_size": "1000", "min_usd_trade_profit": "0.10"}
        })
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = serde_json::from_value(minimal_json()).unwrap();
        assert_eq!(config.pairs.len(), 1);
        assert!(config.telemetry.is_none());
        assert!(!config.strategy.dry_run);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_pair_currency() {
        let mut json = minimal_json();
        json["pairs"][0]["base"] = "BTC".into();
        let config: Config = serde_json::from_value(json).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_non_positive_trade_size() {
        let mut json = minimal_json();
        json["strategy"]["max_usd_trade_size"] = "0".into();
        let config: Config = serde_json::from_value(json).unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
