//! Derived performance views. Never stored; recomputed on demand.

use serde::{Deserialize, Serialize};

use super::position::Position;
use super::trade::Trade;

/// Performance snapshot of a bot or a projected user copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStats {
    pub id: String,
    pub name: String,
    pub pair: String,

    /// Sum of realized trade P&L in USD
    pub total_pnl: f64,

    /// Sum of live P&L over open positions in USD
    pub unrealized_pnl: f64,

    /// Fraction of winning trades (0.0 to 1.0)
    pub win_rate: f64,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,

    /// Mean P&L of winning trades
    pub avg_win: f64,

    /// Mean absolute P&L of losing trades
    pub avg_loss: f64,

    pub open_positions: Vec<Position>,

    /// Most recent trades, newest first
    pub recent_trades: Vec<Trade>,
}

impl std::fmt::Display for BotStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== {} ({}) ===", self.name, self.id)?;
        writeln!(f, "Pair:            {}", self.pair)?;
        writeln!(f, "Realized P&L:    ${:.2}", self.total_pnl)?;
        writeln!(f, "Unrealized P&L:  ${:.2}", self.unrealized_pnl)?;
        writeln!(f, "Win Rate:        {:.1}%", self.win_rate * 100.0)?;
        writeln!(
            f,
            "Trades:          {} ({} won, {} lost)",
            self.total_trades, self.winning_trades, self.losing_trades
        )?;
        writeln!(f, "Avg Win:         ${:.2}", self.avg_win)?;
        writeln!(f, "Avg Loss:        ${:.2}", self.avg_loss)?;
        writeln!(f, "Open Positions:  {}", self.open_positions.len())?;
        Ok(())
    }
}

/// Registry-wide rollup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    pub total_bots: usize,
    pub total_pnl: f64,
    pub avg_win_rate: f64,
    pub total_positions: usize,
    pub total_trades: usize,
}

impl std::fmt::Display for AggregatedStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bots: {} | P&L: ${:.2} | Avg Win: {:.1}% | Positions: {} | Trades: {}",
            self.total_bots,
            self.total_pnl,
            self.avg_win_rate * 100.0,
            self.total_positions,
            self.total_trades
        )
    }
}
