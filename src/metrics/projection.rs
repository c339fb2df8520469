//! Copy projection: a user copy's stats derived from its master's ledger.
//!
//! Nothing here is stored. A copy is a proportional claim on the master,
//! so its view is recomputed from the master's current state every time.

use rust_decimal::prelude::ToPrimitive;

use super::calculator::MetricsCalculator;
use crate::bot::Bot;
use crate::guard::finite;
use crate::models::{BotStats, CopyStatus, Position, Trade, UserCopy};

/// Scale factor between a copy and its master: invested / master capital.
///
/// Zero when either side is unusable (non-positive or non-finite).
pub fn copy_ratio(copy: &UserCopy, master_capital: f64) -> f64 {
    let invested = copy.invested_amount.to_f64().unwrap_or(0.0);
    if !(invested.is_finite() && invested > 0.0) {
        return 0.0;
    }
    if !(master_capital.is_finite() && master_capital > 0.0) {
        return 0.0;
    }
    finite(invested / master_capital)
}

/// Project `copy` onto `master`.
///
/// - Trades count when closed at or after the copy was created. Once a
///   close is requested, trades from positions opened later are excluded;
///   once closed, trades closed after the close are excluded too.
/// - Open positions count when opened at or after creation and, for a
///   closing copy, no later than the close request. A closed copy has none.
pub fn project(copy: &UserCopy, master: &Bot) -> BotStats {
    let ratio = copy_ratio(copy, master.config().invested_capital);

    let trades: Vec<Trade> = master
        .trades()
        .filter(|t| includes_trade(copy, t))
        .map(|t| t.scaled(ratio))
        .collect();

    let positions: Vec<Position> = master
        .positions()
        .iter()
        .filter(|p| includes_position(copy, p))
        .map(|p| p.scaled(ratio))
        .collect();

    MetricsCalculator::bot_stats(
        copy.id.as_str(),
        &master.config().name,
        &master.config().pair,
        &positions,
        &trades,
    )
}

fn includes_trade(copy: &UserCopy, trade: &Trade) -> bool {
    if trade.closed_at < copy.created_at {
        return false;
    }
    if let Some(requested) = copy.close_requested_at {
        if trade.opened_at > requested {
            return false;
        }
    }
    match copy.closed_at {
        Some(closed) => trade.closed_at <= closed,
        None => true,
    }
}

fn includes_position(copy: &UserCopy, position: &Position) -> bool {
    if copy.status == CopyStatus::Closed || position.opened_at < copy.created_at {
        return false;
    }
    match copy.close_requested_at {
        Some(requested) => position.opened_at <= requested,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::calculator::sample_trade;
    use crate::models::{sample_position, BotConfig, BotId, Side};
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Master with $10k capital and trades at t0 + 0..10 minutes.
    fn master(pnls: &[f64]) -> Bot {
        let mut bot = Bot::new(BotId::from_raw("master"), BotConfig::default());
        for (i, &pnl) in pnls.iter().enumerate() {
            bot.push_trade(sample_trade(pnl, t0() + Duration::minutes(i as i64)));
        }
        bot
    }

    fn copy_at(amount: rust_decimal::Decimal, created_at: DateTime<Utc>) -> UserCopy {
        UserCopy::new("user-1".into(), BotId::from_raw("master"), amount, created_at)
    }

    #[test]
    fn test_scaled_total_counts_only_trades_after_creation() {
        let pnls = [10.0, -4.0, 25.0, 7.5, -12.0, 30.0];
        let bot = master(&pnls);
        let created = t0() + Duration::minutes(2);
        let copy = copy_at(dec!(2500), created);

        let stats = project(&copy, &bot);

        let ratio = 0.25;
        let expected: f64 = pnls[2..].iter().sum::<f64>() * ratio;
        assert!((stats.total_pnl - expected).abs() < 1e-9);
        assert_eq!(stats.total_trades, 4);
        assert!(stats.recent_trades.iter().all(|t| t.closed_at >= created));
        assert_eq!(stats.id, copy.id.as_str());
    }

    #[test]
    fn test_zero_capital_master_yields_zero_not_nan() {
        let mut bot = master(&[10.0, 20.0]);
        let mut config = bot.config().clone();
        config.invested_capital = 0.0;
        bot.replace_config(config);

        let stats = project(&copy_at(dec!(1000), t0()), &bot);
        assert_eq!(stats.total_pnl, 0.0);
        assert!(stats.avg_win.is_finite());
        assert!(stats.unrealized_pnl.is_finite());
    }

    #[test]
    fn test_ratio_guards() {
        let copy = copy_at(dec!(500), t0());
        assert_eq!(copy_ratio(&copy, 1000.0), 0.5);
        assert_eq!(copy_ratio(&copy, 0.0), 0.0);
        assert_eq!(copy_ratio(&copy, f64::NAN), 0.0);
        assert_eq!(copy_ratio(&copy_at(dec!(0), t0()), 1000.0), 0.0);
    }

    #[test]
    fn test_positions_filtered_by_lifecycle() {
        let mut bot = master(&[]);
        let mut before = sample_position(Side::Long, 100.0);
        before.opened_at = t0() - Duration::minutes(1);
        let mut after = sample_position(Side::Short, 100.0);
        after.opened_at = t0() + Duration::minutes(1);
        after.unrealized_pnl = 40.0;
        let mut late = sample_position(Side::Long, 100.0);
        late.opened_at = t0() + Duration::minutes(10);
        bot.push_position(before);
        bot.push_position(after);
        bot.push_position(late);

        let mut copy = copy_at(dec!(1000), t0());
        let stats = project(&copy, &bot);
        assert_eq!(stats.open_positions.len(), 2);

        copy.status = CopyStatus::Closing;
        copy.close_requested_at = Some(t0() + Duration::minutes(5));
        let stats = project(&copy, &bot);
        assert_eq!(stats.open_positions.len(), 1);
        assert!((stats.unrealized_pnl - 4.0).abs() < 1e-9);
        assert!((stats.open_positions[0].size - 10.0).abs() < 1e-9);

        copy.status = CopyStatus::Closed;
        copy.closed_at = Some(t0() + Duration::minutes(6));
        assert!(project(&copy, &bot).open_positions.is_empty());
    }

    #[test]
    fn test_closed_copy_freezes_ledger() {
        let bot = master(&[10.0, 10.0, 10.0, 10.0]);
        let mut copy = copy_at(dec!(10000), t0());
        copy.status = CopyStatus::Closed;
        copy.close_requested_at = Some(t0() + Duration::minutes(1));
        copy.closed_at = Some(t0() + Duration::minutes(1));

        let stats = project(&copy, &bot);
        assert_eq!(stats.total_trades, 2);
        assert!((stats.total_pnl - 20.0).abs() < 1e-9);
    }
}
