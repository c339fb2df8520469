//! Bot configuration as supplied by operators or the marketplace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    /// +1 for longs, -1 for shorts.
    pub fn direction(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Longest planned position duration accepted (30 days).
pub const MAX_POSITION_DURATION_SECS: i64 = 30 * 24 * 3600;

fn default_min_duration() -> i64 {
    120
}

fn default_max_duration() -> i64 {
    1800
}

fn default_max_concurrent() -> usize {
    3
}

fn default_open_frequency() -> f64 {
    0.02
}

fn default_sides() -> Vec<Side> {
    vec![Side::Long, Side::Short]
}

fn default_max_slippage() -> f64 {
    0.1
}

fn default_max_trades_history() -> usize {
    500
}

/// Configuration of one simulated bot.
///
/// Immutable for the lifetime of a bot instance; changes go through
/// [`BotConfigPatch`] and produce a new, re-validated config. Fields with a
/// serde default may be omitted from external descriptions, unknown fields
/// are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Display name
    pub name: String,

    /// Trading pair, e.g. "BTC/USDT"
    pub pair: String,

    /// Leverage multiplier (>= 1)
    pub leverage: f64,

    /// Target fraction of winning trades, strictly between 0 and 1
    pub win_rate: f64,

    /// Daily return target as percent of invested capital
    pub daily_target_percent: f64,

    /// Expected number of trades per day
    pub trades_per_day: f64,

    /// Capital backing the bot in USD; copies scale against this
    pub invested_capital: f64,

    /// Minimum margin per position in USD
    pub min_position_size: f64,

    /// Maximum margin per position in USD
    pub max_position_size: f64,

    /// Shortest planned holding time in seconds
    #[serde(default = "default_min_duration")]
    pub min_duration_secs: i64,

    /// Longest planned holding time in seconds
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: i64,

    /// Maximum simultaneously open positions
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_positions: usize,

    /// Probability of opening a position on a tick with free capacity
    #[serde(default = "default_open_frequency")]
    pub open_frequency: f64,

    /// Sides the bot may open
    #[serde(default = "default_sides")]
    pub allowed_sides: Vec<Side>,

    /// Cap on simulated slippage, percent of notional
    #[serde(default = "default_max_slippage")]
    pub max_slippage_percent: f64,

    /// Number of closed trades kept in the ledger
    #[serde(default = "default_max_trades_history")]
    pub max_trades_history: usize,

    /// Seed for the bot's random source; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

impl BotConfig {
    /// Check the invariants every bot relies on.
    pub fn validate(&self) -> Result<(), SimError> {
        let fail = |msg: String| Err(SimError::InvalidConfig(msg));

        if self.pair.trim().is_empty() {
            return fail("pair must not be empty".into());
        }
        if !(self.win_rate > 0.0 && self.win_rate < 1.0) {
            return fail(format!("win rate must be in (0, 1), got {}", self.win_rate));
        }
        if !(self.daily_target_percent.is_finite() && self.daily_target_percent > 0.0) {
            return fail(format!(
                "daily target must be positive, got {}",
                self.daily_target_percent
            ));
        }
        if !(self.trades_per_day.is_finite() && self.trades_per_day > 0.0) {
            return fail(format!(
                "trades per day must be positive, got {}",
                self.trades_per_day
            ));
        }
        if !(self.invested_capital.is_finite() && self.invested_capital > 0.0) {
            return fail(format!(
                "invested capital must be positive, got {}",
                self.invested_capital
            ));
        }
        if !(self.leverage.is_finite() && self.leverage >= 1.0) {
            return fail(format!("leverage must be at least 1, got {}", self.leverage));
        }
        if !(self.min_position_size > 0.0 && self.min_position_size <= self.max_position_size)
            || !self.max_position_size.is_finite()
        {
            return fail(format!(
                "position size bounds must satisfy 0 < min <= max, got [{}, {}]",
                self.min_position_size, self.max_position_size
            ));
        }
        if self.min_duration_secs <= 0
            || self.min_duration_secs > self.max_duration_secs
            || self.max_duration_secs > MAX_POSITION_DURATION_SECS
        {
            return fail(format!(
                "duration bounds must satisfy 0 < min <= max <= {}, got [{}, {}]",
                MAX_POSITION_DURATION_SECS, self.min_duration_secs, self.max_duration_secs
            ));
        }
        if self.max_concurrent_positions == 0 {
            return fail("max concurrent positions must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.open_frequency) {
            return fail(format!(
                "open frequency must be in [0, 1], got {}",
                self.open_frequency
            ));
        }
        if self.allowed_sides.is_empty() {
            return fail("at least one side must be allowed".into());
        }
        if !(self.max_slippage_percent.is_finite() && self.max_slippage_percent >= 0.0) {
            return fail(format!(
                "slippage cap must be non-negative, got {}",
                self.max_slippage_percent
            ));
        }
        if self.max_trades_history == 0 {
            return fail("trade history cap must be at least 1".into());
        }

        Ok(())
    }

    /// Symbol as keyed by the price feed ("BTC/USDT" -> "BTCUSDT").
    pub fn feed_symbol(&self) -> String {
        normalize_symbol(&self.pair)
    }
}

/// Normalize a pair or symbol to the feed's uppercase, separator-free form.
pub fn normalize_symbol(pair: &str) -> String {
    pair.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "BTC Momentum".to_string(),
            pair: "BTC/USDT".to_string(),
            leverage: 10.0,
            win_rate: 0.7,
            daily_target_percent: 1.5,   // 1.5% of capital per day
            trades_per_day: 20.0,
            invested_capital: 10_000.0,
            min_position_size: 100.0,
            max_position_size: 500.0,
            min_duration_secs: default_min_duration(),
            max_duration_secs: default_max_duration(),
            max_concurrent_positions: default_max_concurrent(),
            open_frequency: default_open_frequency(),
            allowed_sides: default_sides(),
            max_slippage_percent: default_max_slippage(),
            max_trades_history: default_max_trades_history(),
            seed: None,
        }
    }
}

/// Partial update of a [`BotConfig`]; absent fields keep their value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfigPatch {
    pub name: Option<String>,
    pub pair: Option<String>,
    pub leverage: Option<f64>,
    pub win_rate: Option<f64>,
    pub daily_target_percent: Option<f64>,
    pub trades_per_day: Option<f64>,
    pub invested_capital: Option<f64>,
    pub min_position_size: Option<f64>,
    pub max_position_size: Option<f64>,
    pub min_duration_secs: Option<i64>,
    pub max_duration_secs: Option<i64>,
    pub max_concurrent_positions: Option<usize>,
    pub open_frequency: Option<f64>,
    pub allowed_sides: Option<Vec<Side>>,
    pub max_slippage_percent: Option<f64>,
    pub max_trades_history: Option<usize>,
    pub seed: Option<u64>,
}

impl BotConfigPatch {
    /// Produce the patched config. The result is not validated here.
    pub fn apply(&self, base: &BotConfig) -> BotConfig {
        let b = base.clone();
        BotConfig {
            name: self.name.clone().unwrap_or(b.name),
            pair: self.pair.clone().unwrap_or(b.pair),
            leverage: self.leverage.unwrap_or(b.leverage),
            win_rate: self.win_rate.unwrap_or(b.win_rate),
            daily_target_percent: self.daily_target_percent.unwrap_or(b.daily_target_percent),
            trades_per_day: self.trades_per_day.unwrap_or(b.trades_per_day),
            invested_capital: self.invested_capital.unwrap_or(b.invested_capital),
            min_position_size: self.min_position_size.unwrap_or(b.min_position_size),
            max_position_size: self.max_position_size.unwrap_or(b.max_position_size),
            min_duration_secs: self.min_duration_secs.unwrap_or(b.min_duration_secs),
            max_duration_secs: self.max_duration_secs.unwrap_or(b.max_duration_secs),
            max_concurrent_positions: self
                .max_concurrent_positions
                .unwrap_or(b.max_concurrent_positions),
            open_frequency: self.open_frequency.unwrap_or(b.open_frequency),
            allowed_sides: self.allowed_sides.clone().unwrap_or(b.allowed_sides),
            max_slippage_percent: self.max_slippage_percent.unwrap_or(b.max_slippage_percent),
            max_trades_history: self.max_trades_history.unwrap_or(b.max_trades_history),
            seed: self.seed.or(b.seed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BotConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_win_rate_and_capital() {
        let config = BotConfig {
            win_rate: 1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));

        let config = BotConfig {
            invested_capital: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));

        let config = BotConfig {
            daily_target_percent: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unbounded_durations() {
        let config = BotConfig {
            max_duration_secs: i64::MAX / 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SimError::InvalidConfig(_))));

        let config = BotConfig {
            min_duration_secs: 60,
            max_duration_secs: MAX_POSITION_DURATION_SECS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_external_description_gets_defaults() {
        let json = r#"{
            "name": "ETH Swing",
            "pair": "ETH/USDT",
            "leverage": 5,
            "winRate": 0.65,
            "dailyTargetPercent": 2.0,
            "tradesPerDay": 12,
            "investedCapital": 5000,
            "minPositionSize": 50,
            "maxPositionSize": 250,
            "someUiOnlyField": "ignored"
        }"#;

        let config: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.min_duration_secs, 120);
        assert_eq!(config.max_duration_secs, 1800);
        assert_eq!(config.max_trades_history, 500);
        assert_eq!(config.allowed_sides, vec![Side::Long, Side::Short]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_patch_keeps_untouched_fields() {
        let base = BotConfig::default();
        let patch = BotConfigPatch {
            win_rate: Some(0.8),
            allowed_sides: Some(vec![Side::Long]),
            ..Default::default()
        };

        let patched = patch.apply(&base);
        assert_eq!(patched.win_rate, 0.8);
        assert_eq!(patched.allowed_sides, vec![Side::Long]);
        assert_eq!(patched.pair, base.pair);
        assert_eq!(patched.invested_capital, base.invested_capital);
    }

    #[test]
    fn test_feed_symbol() {
        assert_eq!(normalize_symbol("btc/usdt"), "BTCUSDT");
        assert_eq!(normalize_symbol("ETH-USDT"), "ETHUSDT");
        assert_eq!(BotConfig::default().feed_symbol(), "BTCUSDT");
    }
}
