//! User copies: proportional claims on a master bot's ledger.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::entity::{BotId, CopyId};

/// Lifecycle of a user copy. Moves strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CopyStatus {
    Active,
    Closing,
    Closed,
}

impl CopyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyStatus::Active => "ACTIVE",
            CopyStatus::Closing => "CLOSING",
            CopyStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(CopyStatus::Active),
            "CLOSING" => Some(CopyStatus::Closing),
            "CLOSED" => Some(CopyStatus::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Final P&L and value, captured when a copy closes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopySnapshot {
    pub final_pnl: Decimal,
    pub final_value: Decimal,
}

/// Lightweight record of one user's stake in a master bot.
///
/// Holds the master by id only and never runs a simulation of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCopy {
    pub id: CopyId,
    pub user_id: String,
    pub bot_id: BotId,
    pub invested_amount: Decimal,
    pub status: CopyStatus,
    pub created_at: DateTime<Utc>,

    /// Set when the copy enters CLOSING
    #[serde(default)]
    pub close_requested_at: Option<DateTime<Utc>>,

    /// Set when the copy enters CLOSED
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,

    /// Present only once CLOSED
    #[serde(default)]
    pub snapshot: Option<CopySnapshot>,
}

impl UserCopy {
    pub fn new(
        user_id: String,
        bot_id: BotId,
        invested_amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CopyId::generate(),
            user_id,
            bot_id,
            invested_amount,
            status: CopyStatus::Active,
            created_at,
            close_requested_at: None,
            closed_at: None,
            snapshot: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CopyStatus::Active
    }

    pub fn is_closed(&self) -> bool {
        self.status == CopyStatus::Closed
    }
}
