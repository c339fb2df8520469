//! Simulated market friction: slippage, spread, funding and commission.
//!
//! There is no order book behind any of this. Costs come from coarse
//! buckets (pair category, volatility level) with a little random variance
//! so that identical trades do not cost exactly the same.

use rand::Rng;

use crate::models::{normalize_symbol, FrictionBreakdown, Side};

use super::config::FrictionConfig;
use super::uniform;

const QUOTE_ASSETS: [&str; 5] = ["USDT", "USDC", "BUSD", "USD", "PERP"];
const MAJORS: [&str; 2] = ["BTC", "ETH"];
const POPULAR_ALTS: [&str; 12] = [
    "SOL", "BNB", "XRP", "ADA", "DOGE", "AVAX", "LINK", "DOT", "MATIC", "LTC", "TRX", "TON",
];

/// Liquidity bucket of a trading pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairCategory {
    Major,
    PopularAlt,
    Exotic,
}

impl PairCategory {
    pub fn of(pair: &str) -> Self {
        let symbol = normalize_symbol(pair);
        let base = QUOTE_ASSETS
            .iter()
            .find_map(|quote| symbol.strip_suffix(quote))
            .unwrap_or(&symbol);

        if MAJORS.contains(&base) {
            PairCategory::Major
        } else if POPULAR_ALTS.contains(&base) {
            PairCategory::PopularAlt
        } else {
            PairCategory::Exotic
        }
    }
}

/// Volatility bucket derived from the std-dev of recent tick returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

impl VolatilityLevel {
    pub fn of(volatility_pct: f64, config: &FrictionConfig) -> Self {
        if !volatility_pct.is_finite() || volatility_pct < config.medium_volatility {
            VolatilityLevel::Low
        } else if volatility_pct < config.high_volatility {
            VolatilityLevel::Medium
        } else {
            VolatilityLevel::High
        }
    }

    fn multiplier(&self, config: &FrictionConfig) -> f64 {
        match self {
            VolatilityLevel::Low => 1.0,
            VolatilityLevel::Medium => config.medium_multiplier,
            VolatilityLevel::High => config.high_multiplier,
        }
    }
}

/// Inputs describing the position being charged.
#[derive(Debug, Clone, Copy)]
pub struct FrictionInput<'a> {
    pub pair: &'a str,
    /// Margin in USD
    pub position_size: f64,
    pub leverage: f64,
    pub side: Side,
    /// Std-dev of recent tick returns, percent
    pub volatility: f64,
    /// Slippage cap, percent of notional
    pub max_slippage: f64,
}

impl FrictionInput<'_> {
    fn notional(&self) -> f64 {
        let notional = self.position_size * self.leverage;
        if notional.is_finite() && notional > 0.0 {
            notional
        } else {
            0.0
        }
    }
}

fn base_slippage(category: PairCategory, config: &FrictionConfig) -> f64 {
    match category {
        PairCategory::Major => config.slippage_major,
        PairCategory::PopularAlt => config.slippage_alt,
        PairCategory::Exotic => config.slippage_exotic,
    }
}

fn base_spread(category: PairCategory, config: &FrictionConfig) -> f64 {
    match category {
        PairCategory::Major => config.spread_major,
        PairCategory::PopularAlt => config.spread_alt,
        PairCategory::Exotic => config.spread_exotic,
    }
}

fn jitter<R: Rng>(rng: &mut R, variance: f64) -> f64 {
    1.0 + uniform(rng, -variance, variance)
}

fn size_factor(input: &FrictionInput<'_>, config: &FrictionConfig) -> f64 {
    if config.slippage_size_scale <= 0.0 {
        return 1.0;
    }
    1.0 + (input.notional() / config.slippage_size_scale).min(1.0)
}

/// Draw the friction charged on one realized trade.
///
/// Every component is a signed percent of notional. Spread, slippage and
/// commission are costs (never positive); funding may go either way
/// depending on a per-call market bias and the position side.
pub fn calculate_friction<R: Rng>(
    input: &FrictionInput<'_>,
    config: &FrictionConfig,
    rng: &mut R,
) -> FrictionBreakdown {
    let category = PairCategory::of(input.pair);
    let vol_mult = VolatilityLevel::of(input.volatility, config).multiplier(config);
    let v = config.variance.abs();

    let raw_slippage = base_slippage(category, config) * vol_mult * size_factor(input, config);
    let slippage = -(raw_slippage * jitter(rng, v)).min(input.max_slippage.max(0.0));

    let spread = -(base_spread(category, config) * vol_mult * jitter(rng, v));

    let longs_pay = rng.random_bool(0.5);
    let funding_magnitude = config.funding_base * jitter(rng, v);
    let pays = (input.side == Side::Long) == longs_pay;
    let funding_rate = if pays {
        -funding_magnitude
    } else {
        funding_magnitude
    };

    let commission = -(config.commission * jitter(rng, v));

    FrictionBreakdown {
        slippage,
        spread,
        funding_rate,
        commission,
        total: slippage + spread + funding_rate + commission,
    }
}

/// Mean cost (positive, percent of notional) of a trade with these inputs.
/// Funding averages out to zero over the bias coin flip.
pub fn expected_friction_cost(input: &FrictionInput<'_>, config: &FrictionConfig) -> f64 {
    let category = PairCategory::of(input.pair);
    let vol_mult = VolatilityLevel::of(input.volatility, config).multiplier(config);

    let slippage = (base_slippage(category, config) * vol_mult * size_factor(input, config))
        .min(input.max_slippage.max(0.0));
    let spread = base_spread(category, config) * vol_mult;

    slippage + spread + config.commission
}

/// Net a raw P&L percent against friction. Apply exactly once per trade.
pub fn apply_friction_to_pnl(pnl_percent: f64, friction: &FrictionBreakdown) -> f64 {
    pnl_percent + friction.total
}
