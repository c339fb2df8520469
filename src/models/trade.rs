//! Closed trade records. The ledger of a bot is built from these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::Side;
use super::entity::BotId;
use crate::guard::finite;

/// Simulated trading costs, each a signed percent of notional.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrictionBreakdown {
    pub slippage: f64,
    pub spread: f64,
    pub funding_rate: f64,
    pub commission: f64,
    pub total: f64,
}

/// Realized trade. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,

    /// Bot that produced the trade
    pub bot_id: BotId,

    pub pair: String,

    pub side: Side,

    pub leverage: f64,

    /// Margin in USD
    pub size: f64,

    pub entry_price: f64,

    pub exit_price: f64,

    /// Realized P&L in USD, net of friction
    pub pnl: f64,

    /// Realized P&L as percent of the bot's invested capital
    pub pnl_pct: f64,

    pub duration_secs: i64,

    pub opened_at: DateTime<Utc>,

    pub closed_at: DateTime<Utc>,

    pub friction: FrictionBreakdown,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }

    /// Scaled copy used by the copy projection. Prices and percentages are
    /// ratio-invariant; sizes and amounts are not.
    pub fn scaled(&self, ratio: f64) -> Trade {
        Trade {
            size: finite(self.size * ratio),
            pnl: finite(self.pnl * ratio),
            ..self.clone()
        }
    }
}
