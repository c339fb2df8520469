//! Tuning constants for the range calculator and friction model.

use serde::{Deserialize, Serialize};

/// Configuration of the P&L range calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatorConfig {
    /// Loss size relative to the win-rate-implied symmetric loss (< 1 means
    /// losses are deliberately smaller than wins)
    pub asymmetry_factor: f64,

    /// Probability of drawing the tight variance mode for a trade (0.0 to 1.0)
    pub tight_mode_percent: f64,

    /// Half-width of the tight band around the base values (0.3 = ±30%)
    pub tight_spread: f64,

    /// Multiplier band applied to wins in wide mode
    pub wide_win_min_mult: f64,
    pub wide_win_max_mult: f64,

    /// Multiplier band applied to losses in wide mode
    pub wide_loss_min_mult: f64,
    pub wide_loss_max_mult: f64,

    /// Overshoot (fraction of target) above which self-correction kicks in
    pub correction_threshold: f64,

    /// Share of the per-trade excess removed by self-correction
    pub correction_strength: f64,

    /// Also correct when running behind the pro-rata target
    pub correct_shortfall: bool,

    /// Lower bound of every range as a fraction of its base value
    pub floor_ratio: f64,

    /// Maximum relative deviation of expected daily P&L from target
    pub max_deviation: f64,

    /// Convergence score below which a configuration is flagged
    pub min_convergence_score: f64,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            asymmetry_factor: 0.7,
            tight_mode_percent: 0.8,     // 80% of trades in tight mode
            tight_spread: 0.3,
            wide_win_min_mult: 2.0,
            wide_win_max_mult: 4.0,
            wide_loss_min_mult: 1.5,
            wide_loss_max_mult: 2.5,
            correction_threshold: 0.2,   // fires 20% above target
            correction_strength: 0.5,
            correct_shortfall: false,
            floor_ratio: 0.1,
            max_deviation: 0.10,
            min_convergence_score: 0.8,
        }
    }
}

/// Configuration of the friction model. Base values are percent of notional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrictionConfig {
    /// Random variance applied to every component (0.2 = ±20%)
    pub variance: f64,

    pub slippage_major: f64,
    pub slippage_alt: f64,
    pub slippage_exotic: f64,

    pub spread_major: f64,
    pub spread_alt: f64,
    pub spread_exotic: f64,

    /// Funding paid or received over a typical holding period
    pub funding_base: f64,

    /// Round-trip taker commission
    pub commission: f64,

    /// Volatility (std-dev of tick returns, percent) separating low from medium
    pub medium_volatility: f64,

    /// Volatility separating medium from high
    pub high_volatility: f64,

    pub medium_multiplier: f64,
    pub high_multiplier: f64,

    /// Notional at which slippage doubles
    pub slippage_size_scale: f64,
}

impl Default for FrictionConfig {
    fn default() -> Self {
        Self {
            variance: 0.2,
            slippage_major: 0.01,
            slippage_alt: 0.03,
            slippage_exotic: 0.08,
            spread_major: 0.01,
            spread_alt: 0.025,
            spread_exotic: 0.06,
            funding_base: 0.01,
            commission: 0.08,            // 0.04% taker, in and out
            medium_volatility: 0.1,
            high_volatility: 0.5,
            medium_multiplier: 1.5,
            high_multiplier: 2.5,
            slippage_size_scale: 100_000.0,
        }
    }
}

/// Everything the simulation core reads besides per-bot configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub calculator: CalculatorConfig,
    pub friction: FrictionConfig,
}
