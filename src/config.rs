//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! read at startup by `BinanceCredentials::from_env`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;

use crate::types::{StakerError, TimeInForce, WalletId};
use crate::venue::binance::{DEFAULT_BASE_URL, DEFAULT_RECV_WINDOW_MS, DEFAULT_TIMEOUT_SECS};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub venue: VenueConfig,
    pub wallets: Vec<WalletConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Pause between consecutive wallet bets.
    #[serde(default = "default_bet_pause_ms")]
    pub bet_pause_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    #[serde(default = "default_gross_odds")]
    pub gross_odds: Decimal,
    #[serde(default = "default_margin_factor")]
    pub margin_factor: Decimal,
    #[serde(default)]
    pub time_in_force: TimeInForce,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            gross_odds: default_gross_odds(),
            margin_factor: default_margin_factor(),
            time_in_force: TimeInForce::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            api_secret_env: default_api_secret_env(),
            recv_window_ms: default_recv_window_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// One capital bucket, sized as a fraction of the free balance at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    pub wallet_id: WalletId,
    pub symbol: String,
    pub balance_fraction: Decimal,
    pub leverage: u32,
}

fn default_cycle_interval_secs() -> u64 {
    60
}

fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_bet_pause_ms() -> u64 {
    2_000
}

fn default_gross_odds() -> Decimal {
    dec!(1.2)
}

fn default_margin_factor() -> Decimal {
    Decimal::ONE
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_api_key_env() -> String {
    "BINANCE_API_KEY".to_string()
}

fn default_api_secret_env() -> String {
    "BINANCE_API_SECRET".to_string()
}

fn default_recv_window_ms() -> u64 {
    DEFAULT_RECV_WINDOW_MS
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), StakerError> {
        if self.agent.cycle_interval_secs == 0 {
            return Err(StakerError::Config("cycle_interval_secs must be > 0".into()));
        }
        if self.strategy.gross_odds <= Decimal::ONE {
            return Err(StakerError::Config(format!(
                "gross_odds must be > 1, got {}",
                self.strategy.gross_odds
            )));
        }
        if self.strategy.margin_factor < Decimal::ONE {
            return Err(StakerError::Config(format!(
                "margin_factor must be >= 1, got {}",
                self.strategy.margin_factor
            )));
        }
        if self.wallets.is_empty() {
            return Err(StakerError::Config("no wallets configured".into()));
        }

        let mut seen = HashSet::new();
        let mut symbols = HashSet::new();
        for w in &self.wallets {
            if !seen.insert(w.wallet_id) {
                return Err(StakerError::Config(format!("duplicate wallet_id {}", w.wallet_id)));
            }
            // one venue position per symbol: wallets cannot share one
            if !symbols.insert(w.symbol.as_str()) {
                return Err(StakerError::Config(format!(
                    "wallet {} reuses symbol {}",
                    w.wallet_id, w.symbol
                )));
            }
            if w.symbol.trim().is_empty() {
                return Err(StakerError::Config(format!("wallet {} has no symbol", w.wallet_id)));
            }
            if w.balance_fraction <= Decimal::ZERO || w.balance_fraction > Decimal::ONE {
                return Err(StakerError::Config(format!(
                    "wallet {} balance_fraction must be in (0, 1], got {}",
                    w.wallet_id, w.balance_fraction
                )));
            }
            if w.leverage < 1 {
                return Err(StakerError::Config(format!(
                    "wallet {} leverage must be >= 1",
                    w.wallet_id
                )));
            }
        }
        Ok(())
    }

    /// Distinct symbols across all wallets.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.wallets.iter().map(|w| w.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }
}
