//! Offline simulation: replay bots over a synthetic price path.
//!
//! Prices follow a seeded Gaussian random walk per symbol, the clock is
//! simulated, and each bot's realized P&L is sampled per UTC day so the
//! daily series can be compared against the configured target.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use statrs::statistics::Statistics;
use tracing::info;

use crate::db::MemoryStore;
use crate::feed::PriceMap;
use crate::guard::finite;
use crate::models::{BotConfig, BotId};
use crate::trading::{BotRegistry, SimulatorConfig};

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Number of simulated days
    pub days: u32,

    /// Simulated seconds between ticks
    pub tick_secs: i64,

    /// Seed of the price path
    pub seed: u64,

    /// Std-dev of the per-tick price return (fraction, not percent)
    pub tick_volatility: f64,

    /// First simulated instant; should be a UTC midnight
    pub start: DateTime<Utc>,

    pub sim: SimulatorConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            days: 7,
            tick_secs: 10,
            seed: 42,
            tick_volatility: 0.0005,
            start: DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_454), // 2026-01-01
            sim: SimulatorConfig::default(),
        }
    }
}

/// Per-bot outcome.
#[derive(Debug, Clone)]
pub struct BotSimulation {
    pub id: BotId,
    pub name: String,
    pub pair: String,
    pub target_pct: f64,
    /// Realized P&L per day, percent of capital
    pub daily_pnl_pct: Vec<f64>,
    pub mean_daily_pct: f64,
    pub std_dev_daily_pct: f64,
    /// |mean - target| / target
    pub deviation: f64,
    pub total_trades: usize,
    pub win_rate: f64,
}

/// Results of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub ticks: u64,
    pub bots: Vec<BotSimulation>,
}

impl std::fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n{:=^60}", " SIMULATION RESULTS ")?;
        writeln!(f)?;
        writeln!(
            f,
            "Period: {} to {} ({} ticks)",
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d %H:%M"),
            self.ticks
        )?;
        for bot in &self.bots {
            writeln!(f)?;
            writeln!(f, "--- {} ({}, {}) ---", bot.name, bot.id, bot.pair)?;
            writeln!(f, "Target:      {:.3}% / day", bot.target_pct)?;
            writeln!(f, "Mean:        {:.3}% / day", bot.mean_daily_pct)?;
            writeln!(f, "Std Dev:     {:.3}%", bot.std_dev_daily_pct)?;
            writeln!(f, "Deviation:   {:.1}%", bot.deviation * 100.0)?;
            writeln!(f, "Trades:      {} ({:.1}% won)", bot.total_trades, bot.win_rate * 100.0)?;
        }
        writeln!(f, "{:=^60}", "")?;
        Ok(())
    }
}

/// Starting price of a synthetic series.
fn initial_price(symbol: &str) -> f64 {
    match symbol {
        "BTCUSDT" => 60_000.0,
        "ETHUSDT" => 3_000.0,
        "SOLUSDT" => 150.0,
        _ => 100.0,
    }
}

/// Seeded multiplicative random walk for a set of symbols.
struct RandomWalk {
    prices: PriceMap,
    step: Normal<f64>,
    rng: StdRng,
}

impl RandomWalk {
    fn new(symbols: impl IntoIterator<Item = String>, volatility: f64, seed: u64) -> Result<Self> {
        let step = Normal::new(0.0, volatility).context("Invalid tick volatility")?;
        let prices = symbols
            .into_iter()
            .map(|s| {
                let price = initial_price(&s);
                (s, price)
            })
            .collect();
        Ok(Self {
            prices,
            step,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn advance(&mut self) -> &PriceMap {
        let mut symbols: Vec<&String> = self.prices.keys().collect();
        symbols.sort();
        let moves: Vec<(String, f64)> = symbols
            .into_iter()
            .map(|s| (s.clone(), self.step.sample(&mut self.rng)))
            .collect();

        for (symbol, ret) in moves {
            if let Some(price) = self.prices.get_mut(&symbol) {
                let next = *price * (1.0 + ret);
                if next.is_finite() && next > 0.0 {
                    *price = next;
                }
            }
        }
        &self.prices
    }
}

pub struct Simulation;

impl Simulation {
    /// Register `bots` in a private registry and run them for `config.days`.
    ///
    /// Each entry is an optional id and a config.
    pub fn run(bots: Vec<(Option<String>, BotConfig)>, config: &SimulationConfig) -> Result<SimulationReport> {
        let store = Arc::new(MemoryStore::new());
        let mut registry = BotRegistry::new(store, config.sim.clone());
        for (id, bot) in bots {
            registry.create_bot(bot, id.as_deref())?;
        }

        let ids = registry.ids();
        let symbols = ids
            .iter()
            .filter_map(|id| registry.get(id))
            .map(|b| b.config().feed_symbol());
        let mut walk = RandomWalk::new(symbols, config.tick_volatility, config.seed)?;

        let tick = Duration::seconds(config.tick_secs.max(1));
        let end = config.start + Duration::days(i64::from(config.days));
        let mut series: HashMap<BotId, Vec<f64>> = HashMap::new();
        let mut day: Option<NaiveDate> = None;
        let mut now = config.start;
        let mut ticks = 0u64;

        info!(bots = ids.len(), days = config.days, "Running simulation");

        while now < end {
            let today = now.date_naive();
            if day.is_some_and(|d| d != today) {
                Self::record_day(&registry, &mut series);
            }
            day = Some(today);

            let prices = walk.advance().clone();
            registry.tick(&prices, now);
            ticks += 1;
            now += tick;
        }
        if day.is_some() {
            Self::record_day(&registry, &mut series);
        }

        let bots = ids
            .iter()
            .filter_map(|id| {
                let bot = registry.get(id)?;
                let stats = bot.stats();
                let daily = series.remove(id).unwrap_or_default();
                let target = bot.config().daily_target_percent;

                let (mean, std_dev) = match daily.len() {
                    0 => (0.0, 0.0),
                    1 => (daily[0], 0.0),
                    _ => (daily.iter().mean(), daily.iter().std_dev()),
                };
                let mean = finite(mean);

                Some(BotSimulation {
                    id: id.clone(),
                    name: bot.config().name.clone(),
                    pair: bot.config().pair.clone(),
                    target_pct: target,
                    daily_pnl_pct: daily,
                    mean_daily_pct: mean,
                    std_dev_daily_pct: finite(std_dev),
                    deviation: finite((mean - target).abs() / target),
                    total_trades: stats.total_trades,
                    win_rate: stats.win_rate,
                })
            })
            .collect();

        Ok(SimulationReport {
            start: config.start,
            end: now,
            ticks,
            bots,
        })
    }

    fn record_day(registry: &BotRegistry, series: &mut HashMap<BotId, Vec<f64>>) {
        for id in registry.ids() {
            if let Some(bot) = registry.get(&id) {
                series.entry(id).or_default().push(bot.daily_pnl_pct());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_walk_is_seeded() {
        let symbols = || vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        let mut a = RandomWalk::new(symbols(), 0.001, 7).unwrap();
        let mut b = RandomWalk::new(symbols(), 0.001, 7).unwrap();
        for _ in 0..100 {
            assert_eq!(a.advance(), b.advance());
        }
        assert!(a.prices.values().all(|p| *p > 0.0));
    }

    #[test]
    fn test_daily_pnl_converges_to_target() {
        let bot = BotConfig {
            seed: Some(2024),
            max_trades_history: 10_000,
            ..Default::default()
        };
        let config = SimulationConfig {
            days: 40,
            tick_secs: 30,
            ..Default::default()
        };

        let report = Simulation::run(vec![(Some("sim-btc".into()), bot)], &config).unwrap();
        let result = &report.bots[0];

        assert_eq!(result.daily_pnl_pct.len(), 40);
        assert!(result.daily_pnl_pct.iter().all(|p| p.is_finite()));
        assert!(result.total_trades > 40 * 15);
        assert!(
            result.deviation < 0.25,
            "mean {:.4} vs target {:.4}",
            result.mean_daily_pct,
            result.target_pct
        );
    }

    #[test]
    fn test_rejects_copy_ids() {
        let err = Simulation::run(
            vec![(Some("copy_x".into()), BotConfig::default())],
            &SimulationConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }
}
