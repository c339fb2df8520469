//! Derived performance metrics for bots and projected user copies.

mod calculator;
mod projection;

pub use calculator::{MetricsCalculator, RECENT_TRADES_LIMIT};
pub use projection::{copy_ratio, project};
