//! Bot state machine: one configuration, its open positions and its ledger.
//!
//! A bot has no lifecycle of its own beyond "has open positions / has
//! capacity". Everything happens in [`Bot::tick`]:
//! - Refresh live P&L of open positions from the latest prices
//! - Close positions whose planned duration elapsed (friction, Trade)
//! - Possibly open a new position sized by the P&L range calculator
//! - Trim the ledger

use std::collections::VecDeque;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

use crate::feed::PriceMap;
use crate::guard::{finite, finite_or_zero};
use crate::metrics::MetricsCalculator;
use crate::models::{normalize_symbol, BotConfig, BotId, BotStats, Position, Trade};
use crate::trading::{
    apply_friction_to_pnl, calculate_friction, calculate_range, expected_friction_cost, uniform,
    FrictionInput, RangeRequest, SimulatorConfig,
};

/// Tick returns kept for the volatility estimate.
const VOLATILITY_WINDOW: usize = 50;

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub closed: usize,
    pub opened: usize,
}

impl std::ops::Add for TickReport {
    type Output = TickReport;

    fn add(self, other: TickReport) -> TickReport {
        TickReport {
            closed: self.closed + other.closed,
            opened: self.opened + other.opened,
        }
    }
}

/// Simulated trading bot.
///
/// Only the registry constructs these; copies never get one.
pub struct Bot {
    id: BotId,
    config: BotConfig,
    feed_symbol: String,
    positions: Vec<Position>,
    trades: VecDeque<Trade>,
    rng: StdRng,

    // Market view
    last_price: Option<f64>,
    returns: VecDeque<f64>,

    // Daily accounting (UTC days)
    day: Option<NaiveDate>,
    daily_pnl_pct: f64,
    trades_today: u32,
}

impl Bot {
    pub(crate) fn new(id: BotId, config: BotConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let feed_symbol = config.feed_symbol();

        Self {
            id,
            config,
            feed_symbol,
            positions: Vec::new(),
            trades: VecDeque::new(),
            rng,
            last_price: None,
            returns: VecDeque::with_capacity(VOLATILITY_WINDOW),
            day: None,
            daily_pnl_pct: 0.0,
            trades_today: 0,
        }
    }

    pub fn id(&self) -> &BotId {
        &self.id
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Closed trades, oldest first.
    pub fn trades(&self) -> impl DoubleEndedIterator<Item = &Trade> + ExactSizeIterator {
        self.trades.iter()
    }

    /// Realized P&L today, percent of capital.
    pub fn daily_pnl_pct(&self) -> f64 {
        self.daily_pnl_pct
    }

    /// Swap in a new configuration. Open positions and the ledger stay.
    pub(crate) fn replace_config(&mut self, config: BotConfig) {
        let feed_symbol = config.feed_symbol();
        if feed_symbol != self.feed_symbol {
            // Old-pair prices must not seed entries or returns on the new pair
            self.last_price = None;
            self.returns.clear();
            self.feed_symbol = feed_symbol;
        }
        if let Some(seed) = config.seed.filter(|s| Some(*s) != self.config.seed) {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.config = config;
        self.trim_ledger();
    }

    /// Advance the bot to `now` using the latest price snapshot.
    ///
    /// Symbols missing from `prices` leave positions untouched; nothing is
    /// closed before its planned time. Closing runs before opening so a
    /// freed slot can be reused within the same tick.
    pub fn tick(&mut self, prices: &PriceMap, now: DateTime<Utc>, sim: &SimulatorConfig) -> TickReport {
        self.roll_day(now);
        self.observe_price(prices);
        self.reprice_positions(prices);

        let closed = self.close_due(now, sim);
        let opened = usize::from(self.maybe_open(now, sim));
        self.trim_ledger();

        TickReport { closed, opened }
    }

    /// Derived stats over open positions and the retained ledger.
    pub fn stats(&self) -> BotStats {
        MetricsCalculator::bot_stats(
            self.id.as_str(),
            &self.config.name,
            &self.config.pair,
            &self.positions,
            self.trades.iter(),
        )
    }

    /// Std-dev of recent tick returns in percent; zero until enough data.
    pub fn volatility(&self) -> f64 {
        if self.returns.len() < 2 {
            return 0.0;
        }
        finite(self.returns.iter().std_dev())
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            if self.day.is_some() {
                debug!(
                    bot = %self.id,
                    pnl_pct = self.daily_pnl_pct,
                    trades = self.trades_today,
                    "Day rolled over"
                );
            }
            self.day = Some(today);
            self.daily_pnl_pct = 0.0;
            self.trades_today = 0;
        }
    }

    fn observe_price(&mut self, prices: &PriceMap) {
        let Some(&price) = prices.get(&self.feed_symbol) else {
            return;
        };
        if !(price.is_finite() && price > 0.0) {
            warn!(bot = %self.id, symbol = %self.feed_symbol, price = %price, "Ignoring bad price");
            return;
        }

        if let Some(last) = self.last_price {
            if last != price {
                self.returns.push_back((price - last) / last * 100.0);
                if self.returns.len() > VOLATILITY_WINDOW {
                    self.returns.pop_front();
                }
            }
        }
        self.last_price = Some(price);
    }

    /// Reprice each position from its own pair; the bot's pair may have
    /// changed since it was opened.
    fn reprice_positions(&mut self, prices: &PriceMap) {
        for position in &mut self.positions {
            if let Some(&price) = prices.get(&normalize_symbol(&position.pair)) {
                position.update_price(price);
            }
        }
    }

    fn close_due(&mut self, now: DateTime<Utc>, sim: &SimulatorConfig) -> usize {
        if !self.positions.iter().any(|p| p.is_due(now)) {
            return 0;
        }

        let (due, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.positions)
            .into_iter()
            .partition(|p| p.is_due(now));
        self.positions = open;

        let count = due.len();
        for position in due {
            let trade = self.realize(position, now, sim);

            self.daily_pnl_pct = finite(self.daily_pnl_pct + trade.pnl_pct);
            self.trades_today += 1;

            debug!(
                bot = %self.id,
                side = %trade.side,
                pnl = trade.pnl,
                pnl_pct = trade.pnl_pct,
                "Position closed"
            );
            self.trades.push_back(trade);
        }
        count
    }

    /// Turn a due position into a trade. Friction is applied here and
    /// nowhere else.
    fn realize(&mut self, position: Position, now: DateTime<Utc>, sim: &SimulatorConfig) -> Trade {
        let capital = self.config.invested_capital;
        let is_win = match position.outcome {
            Some(outcome) => outcome,
            None => self.rng.random_bool(finite(self.config.win_rate).clamp(0.0, 1.0)),
        };
        let raw_pct = if is_win {
            position.planned_win_pct
        } else {
            -position.planned_loss_pct
        };

        // Capital percent -> percent of notional, where friction lives
        let notional = position.notional();
        let raw_amount = capital * raw_pct / 100.0;
        let raw_notional_pct = if notional > 0.0 {
            raw_amount / notional * 100.0
        } else {
            0.0
        };

        let volatility = self.volatility();
        let friction = calculate_friction(
            &FrictionInput {
                pair: &position.pair,
                position_size: position.size,
                leverage: position.leverage,
                side: position.side,
                volatility,
                max_slippage: self.config.max_slippage_percent,
            },
            &sim.friction,
            &mut self.rng,
        );
        let net_notional_pct = apply_friction_to_pnl(raw_notional_pct, &friction);

        let pnl = finite_or_zero(notional * net_notional_pct / 100.0, "trade.pnl");
        let pnl_pct = finite_or_zero(pnl / capital * 100.0, "trade.pnl_pct");
        let exit_price = position.exit_price_for(pnl);

        Trade {
            id: uuid::Uuid::new_v4().to_string(),
            bot_id: self.id.clone(),
            pair: position.pair,
            side: position.side,
            leverage: position.leverage,
            size: position.size,
            entry_price: position.entry_price,
            exit_price,
            pnl,
            pnl_pct,
            duration_secs: (now - position.opened_at).num_seconds().max(0),
            opened_at: position.opened_at,
            closed_at: now,
            friction,
        }
    }

    fn maybe_open(&mut self, now: DateTime<Utc>, sim: &SimulatorConfig) -> bool {
        let config = &self.config;
        if self.positions.len() >= config.max_concurrent_positions {
            return false;
        }

        // Daily budget: the range math assumes trades_per_day trades
        let committed = self.trades_today as f64 + self.positions.len() as f64;
        if committed >= config.trades_per_day.ceil() {
            return false;
        }

        if !self.rng.random_bool(finite(config.open_frequency).clamp(0.0, 1.0)) {
            return false;
        }

        let Some(entry_price) = self.last_price else {
            debug!(bot = %self.id, "No price yet, skipping open");
            return false;
        };

        let side = match config.allowed_sides.len() {
            0 => return false,
            n => config.allowed_sides[self.rng.random_range(0..n)],
        };
        let size = finite(uniform(
            &mut self.rng,
            config.min_position_size,
            config.max_position_size,
        ));
        let min_duration = config.min_duration_secs.max(1);
        let duration_secs = self
            .rng
            .random_range(min_duration..=config.max_duration_secs.max(min_duration));

        let Some(close_at) = Duration::try_seconds(duration_secs)
            .and_then(|d| now.checked_add_signed(d))
        else {
            warn!(bot = %self.id, duration_secs = duration_secs, "Position duration out of range, skipping open");
            return false;
        };

        let expected_cost = expected_friction_cost(
            &FrictionInput {
                pair: &config.pair,
                position_size: size,
                leverage: config.leverage,
                side,
                volatility: self.volatility(),
                max_slippage: config.max_slippage_percent,
            },
            &sim.friction,
        );
        let cost_allowance_pct =
            finite(expected_cost * size * config.leverage / config.invested_capital);

        let request = RangeRequest {
            daily_target_pct: config.daily_target_percent,
            trades_per_day: config.trades_per_day,
            win_rate: config.win_rate,
            current_daily_pnl: self.daily_pnl_pct,
            trades_remaining: (config.trades_per_day - committed).max(1.0),
            cost_allowance_pct,
        };

        let range = match calculate_range(&request, &sim.calculator, &mut self.rng) {
            Ok(range) => range,
            Err(e) => {
                warn!(bot = %self.id, error = %e, "Range calculation failed");
                return false;
            }
        };
        let planned_win_pct = finite(range.sample_win(&mut self.rng));
        let planned_loss_pct = finite(range.sample_loss(&mut self.rng));

        let mut position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            pair: config.pair.clone(),
            side,
            leverage: config.leverage,
            entry_price,
            current_price: entry_price,
            size,
            opened_at: now,
            close_at,
            target_price: entry_price,
            stop_price: entry_price,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
            planned_win_pct,
            planned_loss_pct,
            outcome: None,
        };
        let capital = config.invested_capital;
        position.target_price = position.exit_price_for(capital * planned_win_pct / 100.0);
        position.stop_price = position.exit_price_for(-capital * planned_loss_pct / 100.0);

        debug!(
            bot = %self.id,
            side = %side,
            size = size,
            mode = ?range.mode,
            duration_secs = duration_secs,
            "Position opened"
        );
        self.positions.push(position);
        true
    }

    fn trim_ledger(&mut self) {
        while self.trades.len() > self.config.max_trades_history {
            self.trades.pop_front();
        }
    }

    #[cfg(test)]
    pub(crate) fn push_trade(&mut self, trade: Trade) {
        self.trades.push_back(trade);
    }

    #[cfg(test)]
    pub(crate) fn push_position(&mut self, position: Position) {
        self.positions.push(position);
    }
}
