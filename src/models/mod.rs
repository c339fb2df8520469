//! Data models for bots, positions, trades, stats and user copies.

mod config;
mod entity;
mod position;
mod stats;
mod trade;
mod user_copy;

pub use config::{normalize_symbol, BotConfig, BotConfigPatch, Side};
pub use entity::{BotId, CopyId, EntityRef, COPY_ID_PREFIX};
pub use position::Position;
pub use stats::{AggregatedStats, BotStats};
pub use trade::{FrictionBreakdown, Trade};
pub use user_copy::{CopySnapshot, CopyStatus, UserCopy};

#[cfg(test)]
pub(crate) use position::sample_position;
