//! Calculator for bot performance: win rate, average win/loss, totals.

use crate::guard::finite;
use crate::models::{AggregatedStats, BotStats, Position, Trade};

/// Number of trades reported in `recent_trades`.
pub const RECENT_TRADES_LIMIT: usize = 20;

/// Stateless calculator over positions and a trade ledger.
pub struct MetricsCalculator;

impl MetricsCalculator {
    /// Build stats from open positions and a ledger ordered oldest first.
    ///
    /// Every numeric field is finite, whatever the input.
    pub fn bot_stats<'a, I>(
        id: &str,
        name: &str,
        pair: &str,
        positions: &[Position],
        trades: I,
    ) -> BotStats
    where
        I: IntoIterator<Item = &'a Trade>,
    {
        let trades: Vec<&Trade> = trades.into_iter().collect();
        let mut stats = BotStats {
            id: id.to_string(),
            name: name.to_string(),
            pair: pair.to_string(),
            open_positions: positions.to_vec(),
            ..Default::default()
        };

        stats.unrealized_pnl = finite(positions.iter().map(|p| finite(p.unrealized_pnl)).sum());

        if !trades.is_empty() {
            Self::calculate_pnl_metrics(&mut stats, &trades);
        }

        stats.recent_trades = trades
            .iter()
            .rev()
            .take(RECENT_TRADES_LIMIT)
            .map(|t| (*t).clone())
            .collect();

        stats
    }

    fn calculate_pnl_metrics(stats: &mut BotStats, trades: &[&Trade]) {
        let (wins, losses): (Vec<&Trade>, Vec<&Trade>) =
            trades.iter().copied().partition(|t| t.is_win());
        let wins: Vec<f64> = wins.iter().map(|t| finite(t.pnl)).collect();
        let losses: Vec<f64> = losses.iter().map(|t| finite(t.pnl)).collect();

        stats.total_trades = trades.len();
        stats.winning_trades = wins.len();
        stats.losing_trades = losses.len();
        stats.total_pnl = finite(wins.iter().chain(losses.iter()).sum());
        stats.win_rate = wins.len() as f64 / trades.len() as f64;

        if !wins.is_empty() {
            stats.avg_win = finite(wins.iter().sum::<f64>() / wins.len() as f64);
        }
        if !losses.is_empty() {
            stats.avg_loss = finite(losses.iter().map(|l| l.abs()).sum::<f64>() / losses.len() as f64);
        }
    }

    /// Roll individual stats up into registry-wide totals.
    pub fn aggregate<'a, I>(all: I) -> AggregatedStats
    where
        I: IntoIterator<Item = &'a BotStats>,
    {
        let mut agg = AggregatedStats::default();
        let mut win_rate_sum = 0.0;

        for stats in all {
            agg.total_bots += 1;
            agg.total_pnl += finite(stats.total_pnl);
            win_rate_sum += finite(stats.win_rate);
            agg.total_positions += stats.open_positions.len();
            agg.total_trades += stats.total_trades;
        }

        agg.total_pnl = finite(agg.total_pnl);
        if agg.total_bots > 0 {
            agg.avg_win_rate = finite(win_rate_sum / agg.total_bots as f64);
        }
        agg
    }
}

#[cfg(test)]
pub(crate) fn sample_trade(pnl: f64, closed_at: chrono::DateTime<chrono::Utc>) -> Trade {
    use crate::models::{BotId, FrictionBreakdown, Side};

    Trade {
        id: uuid::Uuid::new_v4().to_string(),
        bot_id: BotId::from_raw("bot-1"),
        pair: "BTC/USDT".to_string(),
        side: Side::Long,
        leverage: 10.0,
        size: 100.0,
        entry_price: 100.0,
        exit_price: 100.0,
        pnl,
        pnl_pct: pnl / 100.0,
        duration_secs: 60,
        opened_at: closed_at - chrono::Duration::seconds(60),
        closed_at,
        friction: FrictionBreakdown::default(),
    }
}
