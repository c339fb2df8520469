//! Open position held by a simulated bot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::Side;
use crate::guard::finite;

/// Synthetic open position. Owned by exactly one bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Unique position id
    pub id: String,

    /// Trading pair, e.g. "BTC/USDT"
    pub pair: String,

    pub side: Side,

    pub leverage: f64,

    pub entry_price: f64,

    /// Latest price seen from the feed
    pub current_price: f64,

    /// Margin committed in USD
    pub size: f64,

    pub opened_at: DateTime<Utc>,

    /// When the position is due to close
    pub close_at: DateTime<Utc>,

    /// Price at which the planned win would be realized
    pub target_price: f64,

    /// Price at which the planned loss would be realized
    pub stop_price: f64,

    /// Unrealized P&L in USD
    #[serde(default)]
    pub unrealized_pnl: f64,

    /// Unrealized return on margin, percent
    #[serde(default)]
    pub unrealized_pnl_pct: f64,

    /// Planned win, percent of bot capital, drawn at open time
    pub planned_win_pct: f64,

    /// Planned loss magnitude, percent of bot capital, drawn at open time
    pub planned_loss_pct: f64,

    /// Outcome fixed in advance, if any; drawn at close otherwise
    #[serde(default)]
    pub outcome: Option<bool>,
}

impl Position {
    /// Leveraged exposure in USD.
    pub fn notional(&self) -> f64 {
        self.size * self.leverage
    }

    /// Update live P&L from the latest price. Non-positive or non-finite
    /// prices are ignored.
    pub fn update_price(&mut self, current_price: f64) {
        if !(current_price.is_finite() && current_price > 0.0) {
            return;
        }
        self.current_price = current_price;

        if self.entry_price > 0.0 {
            let move_pct = (current_price - self.entry_price) / self.entry_price;
            let roe = move_pct * self.leverage * self.side.direction();
            self.unrealized_pnl = finite(self.size * roe);
            self.unrealized_pnl_pct = finite(roe * 100.0);
        }
    }

    /// Whether the planned holding time has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.close_at
    }

    /// Exit price that realizes `pnl` USD on this position.
    pub fn exit_price_for(&self, pnl: f64) -> f64 {
        let notional = self.notional();
        if notional <= 0.0 || self.entry_price <= 0.0 {
            return self.entry_price;
        }
        let move_pct = pnl / notional * self.side.direction();
        let exit = self.entry_price * (1.0 + move_pct);
        if exit.is_finite() && exit > 0.0 {
            exit
        } else {
            self.entry_price
        }
    }

    /// Scaled copy used by the copy projection.
    pub fn scaled(&self, ratio: f64) -> Position {
        Position {
            size: finite(self.size * ratio),
            unrealized_pnl: finite(self.unrealized_pnl * ratio),
            ..self.clone()
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_position(side: Side, entry: f64) -> Position {
    let now = Utc::now();
    Position {
        id: "pos-1".to_string(),
        pair: "BTC/USDT".to_string(),
        side,
        leverage: 10.0,
        entry_price: entry,
        current_price: entry,
        size: 100.0,
        opened_at: now,
        close_at: now + chrono::Duration::minutes(10),
        target_price: entry,
        stop_price: entry,
        unrealized_pnl: 0.0,
        unrealized_pnl_pct: 0.0,
        planned_win_pct: 0.1,
        planned_loss_pct: 0.05,
        outcome: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_pnl() {
        let mut pos = sample_position(Side::Long, 100.0);
        pos.update_price(101.0);

        // 1% move at 10x on $100 margin
        assert!((pos.unrealized_pnl - 10.0).abs() < 1e-9);
        assert!((pos.unrealized_pnl_pct - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_pnl() {
        let mut pos = sample_position(Side::Short, 100.0);
        pos.update_price(101.0);
        assert!((pos.unrealized_pnl + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_bad_prices_ignored() {
        let mut pos = sample_position(Side::Long, 100.0);
        pos.update_price(f64::NAN);
        pos.update_price(0.0);
        assert_eq!(pos.current_price, 100.0);
        assert_eq!(pos.unrealized_pnl, 0.0);
    }

    #[test]
    fn test_exit_price_realizes_pnl() {
        let pos = sample_position(Side::Short, 200.0);
        let exit = pos.exit_price_for(20.0);
        // Short profits when price falls: 20 / 1000 notional = 2%
        assert!((exit - 196.0).abs() < 1e-9);
    }
}
