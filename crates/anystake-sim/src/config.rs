// crates/anystake-sim/src/config.rs
//
// Deployment and scenario configuration for the simulator.
// Loaded from a TOML file; every field has a default so a partial file
// (or none at all) still yields a runnable deployment.
//
// Amounts are decimal strings in whole tokens and are converted with the
// token's decimals at deployment. VIP thresholds are WAD-normalized and
// therefore always read with 18 decimals.

use std::fs;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::scenario::Step;

/// A token to register with the in-memory bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,

    #[serde(default = "default_decimals")]
    pub decimals: u8,

    /// Fee charged on every transfer, in basis points.
    #[serde(default)]
    pub transfer_fee_bps: u32,
}

/// A constant-product pair seeded by the liquidity provider account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairConfig {
    /// Label of the pair, which is also its LP token.
    pub lp: String,
    pub token0: String,
    pub token1: String,
    pub reserve0: String,
    pub reserve1: String,
}

/// Tokens minted to an account before the first step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceConfig {
    pub account: String,
    pub token: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryConfig {
    /// Ledger share of each settlement, per mille.
    #[serde(default = "default_distribution_rate")]
    pub distribution_rate: u32,

    /// Buyback earmark of the regulator share, per mille.
    #[serde(default = "default_buyback_rate")]
    pub buyback_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// First pool index that counts as external (exit fee applies).
    #[serde(default = "default_external_pool_threshold")]
    pub external_pool_threshold: usize,

    /// Loyalty points minted per deposit, in whole points.
    #[serde(default = "default_stipend")]
    pub stipend: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegulatorConfig {
    /// Pair quoting the points token for the peg test.
    #[serde(default = "default_reference_pair")]
    pub reference_pair: String,

    #[serde(default = "default_price_multiplier")]
    pub price_multiplier: u64,

    /// Below-peg exit penalty, per mille.
    #[serde(default = "default_peg_penalty_rate")]
    pub peg_penalty_rate: u32,
}

/// One pool of the initial batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub token: String,

    /// Pair used to value exit fees. Omitted for native pools.
    #[serde(default)]
    pub price_ref: Option<String>,

    pub weight: u64,

    /// WAD-normalized total stake at which the exit fee is waived.
    #[serde(default = "default_zero")]
    pub vip: String,

    #[serde(default)]
    pub fee_bps: u32,
}

/// Top-level simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Report format: "table" or "json".
    #[serde(default = "default_format")]
    pub format: String,

    /// Owner of every deployed component.
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Routing token of the venue.
    #[serde(default = "default_native")]
    pub native: String,

    #[serde(default = "default_reward_token")]
    pub reward_token: String,

    /// Loyalty points token; also the regulator's stake token.
    #[serde(default = "default_points_token")]
    pub points_token: String,

    #[serde(default = "default_start_block")]
    pub start_block: u64,

    #[serde(default)]
    pub tokens: Vec<TokenConfig>,

    #[serde(default)]
    pub pairs: Vec<PairConfig>,

    #[serde(default)]
    pub balances: Vec<BalanceConfig>,

    #[serde(default)]
    pub treasury: TreasuryConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub regulator: RegulatorConfig,

    #[serde(default)]
    pub pools: Vec<PoolConfig>,

    /// Scenario, executed in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_decimals() -> u8 {
    18
}

fn default_distribution_rate() -> u32 {
    700
}

fn default_buyback_rate() -> u32 {
    300
}

fn default_external_pool_threshold() -> usize {
    3
}

fn default_stipend() -> String {
    "1".to_string()
}

fn default_reference_pair() -> String {
    "DFTP-LP".to_string()
}

fn default_price_multiplier() -> u64 {
    1
}

fn default_peg_penalty_rate() -> u32 {
    100
}

fn default_zero() -> String {
    "0".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "table".to_string()
}

fn default_owner() -> String {
    "mastermind".to_string()
}

fn default_native() -> String {
    "WETH".to_string()
}

fn default_reward_token() -> String {
    "DFT".to_string()
}

fn default_points_token() -> String {
    "DFTP".to_string()
}

fn default_start_block() -> u64 {
    1
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            distribution_rate: default_distribution_rate(),
            buyback_rate: default_buyback_rate(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            external_pool_threshold: default_external_pool_threshold(),
            stipend: default_stipend(),
        }
    }
}

impl Default for RegulatorConfig {
    fn default() -> Self {
        Self {
            reference_pair: default_reference_pair(),
            price_multiplier: default_price_multiplier(),
            peg_penalty_rate: default_peg_penalty_rate(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            format: default_format(),
            owner: default_owner(),
            native: default_native(),
            reward_token: default_reward_token(),
            points_token: default_points_token(),
            start_block: default_start_block(),
            tokens: Vec::new(),
            pairs: Vec::new(),
            balances: Vec::new(),
            treasury: TreasuryConfig::default(),
            ledger: LedgerConfig::default(),
            regulator: RegulatorConfig::default(),
            pools: Vec::new(),
            steps: Vec::new(),
        }
    }
}

impl SimConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self, SimError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, SimError> {
        Ok(toml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = SimConfig::from_toml_str("").unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.owner, "mastermind");
        assert_eq!(config.treasury, TreasuryConfig::default());
        assert_eq!(config.treasury.distribution_rate, 700);
        assert_eq!(config.treasury.buyback_rate, 300);
        assert_eq!(config.ledger.external_pool_threshold, 3);
        assert_eq!(config.regulator.peg_penalty_rate, 100);
        assert!(config.steps.is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let config = SimConfig::from_toml_str(
            r#"
            reward_token = "GOV"

            [treasury]
            buyback_rate = 0

            [[tokens]]
            symbol = "USDC"
            decimals = 6

            [[pools]]
            token = "USDC"
            price_ref = "USDC-LP"
            weight = 100
            fee_bps = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.reward_token, "GOV");
        assert_eq!(config.treasury.distribution_rate, 700);
        assert_eq!(config.treasury.buyback_rate, 0);
        assert_eq!(config.tokens[0].transfer_fee_bps, 0);
        assert_eq!(config.pools[0].vip, "0");
        assert_eq!(config.pools[0].price_ref.as_deref(), Some("USDC-LP"));
    }

    #[test]
    fn test_malformed_file() {
        assert!(matches!(
            SimConfig::from_toml_str("pools = 3"),
            Err(SimError::Toml(_))
        ));
    }
}
