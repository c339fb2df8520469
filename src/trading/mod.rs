//! Trading simulation: friction, P&L ranges, bot registry and user copies.

mod config;
mod copies;
mod friction;
mod pnl_range;
mod registry;

use rand::Rng;

pub use config::{CalculatorConfig, FrictionConfig, SimulatorConfig};
pub use copies::CopyBook;
pub use friction::{
    apply_friction_to_pnl, calculate_friction, expected_friction_cost, FrictionInput,
    PairCategory, VolatilityLevel,
};
pub use pnl_range::{
    base_sizes, calculate_expected_daily, calculate_range, range_for_mode,
    validate_configuration, BaseSizes, ConfigValidation, ExpectedDaily, PnlRange, RangeRequest,
    VarianceMode,
};
pub use registry::BotRegistry;

/// Uniform draw in `[lo, hi]` that tolerates `lo == hi` and swapped bounds.
pub(crate) fn uniform<R: Rng>(rng: &mut R, lo: f64, hi: f64) -> f64 {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    lo + (hi - lo) * rng.random::<f64>()
}
