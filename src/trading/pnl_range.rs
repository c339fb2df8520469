//! P&L range calculator.
//!
//! For the next trade a bot opens, produces a win band and a loss band such
//! that sampling uniformly inside them and realizing wins at the configured
//! win rate gives an expected daily P&L equal to the daily target.
//!
//! Model, with win rate `w`, loss rate `l = 1 - w` and asymmetry `a`:
//!
//! ```text
//! per_trade  = daily_target / trades_per_day
//! base_win   = per_trade / (w - (l^2 / w) * a)
//! base_loss  = base_win * (l / w) * a
//! ```
//!
//! so `w * base_win - l * base_loss == per_trade`. Each trade then draws a
//! tight (±30%) or wide (spiky) band around the base values; both bands are
//! scaled by one normalization factor so the mixture keeps that identity.

use rand::Rng;
use tracing::warn;

use crate::error::SimError;
use crate::models::BotConfig;

use super::config::CalculatorConfig;
use super::uniform;

/// Variance regime of a single trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceMode {
    /// Narrow band around base values; drives convergence
    Tight,
    /// Multiplied band; produces visible spikes
    Wide,
}

/// Win/loss bands for one trade, in percent of bot capital.
///
/// Loss bounds are magnitudes (non-negative).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnlRange {
    pub win_min: f64,
    pub win_max: f64,
    pub loss_min: f64,
    pub loss_max: f64,
    pub mode: VarianceMode,
    pub base_win: f64,
    pub base_loss: f64,
    /// Expected value per trade of this band at the requested win rate
    pub expected_value: f64,
}

impl PnlRange {
    pub fn sample_win<R: Rng>(&self, rng: &mut R) -> f64 {
        uniform(rng, self.win_min, self.win_max)
    }

    pub fn sample_loss<R: Rng>(&self, rng: &mut R) -> f64 {
        uniform(rng, self.loss_min, self.loss_max)
    }

    #[cfg(test)]
    pub(crate) fn win_mid(&self) -> f64 {
        (self.win_min + self.win_max) / 2.0
    }
}

/// Inputs for one range request.
#[derive(Debug, Clone, Copy)]
pub struct RangeRequest {
    pub daily_target_pct: f64,
    pub trades_per_day: f64,
    pub win_rate: f64,
    /// Realized P&L so far today, percent of capital
    pub current_daily_pnl: f64,
    /// Trades still expected today (at least one is assumed)
    pub trades_remaining: f64,
    /// Expected friction per trade in percent of capital, added on top of
    /// the per-trade target so realized (net) P&L still converges
    pub cost_allowance_pct: f64,
}

impl RangeRequest {
    /// Request at the start of a day, with no friction allowance.
    pub fn fresh(daily_target_pct: f64, trades_per_day: f64, win_rate: f64) -> Self {
        Self {
            daily_target_pct,
            trades_per_day,
            win_rate,
            current_daily_pnl: 0.0,
            trades_remaining: trades_per_day,
            cost_allowance_pct: 0.0,
        }
    }

    pub fn for_config(config: &BotConfig) -> Self {
        Self::fresh(
            config.daily_target_percent,
            config.trades_per_day,
            config.win_rate,
        )
    }
}

/// Per-trade target and the asymmetric base sizes solved from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseSizes {
    pub per_trade: f64,
    pub base_win: f64,
    pub base_loss: f64,
}

/// Solve the base win/loss sizes. Fails when the win rate is too low for
/// the asymmetry factor to produce a positive expectation.
pub fn base_sizes(request: &RangeRequest, config: &CalculatorConfig) -> Result<BaseSizes, SimError> {
    let w = request.win_rate;
    if !(w > 0.0 && w < 1.0) {
        return Err(SimError::InvalidConfig(format!(
            "win rate must be in (0, 1), got {}",
            w
        )));
    }
    if !(request.trades_per_day > 0.0 && request.daily_target_pct > 0.0) {
        return Err(SimError::InvalidConfig(
            "daily target and trades per day must be positive".into(),
        ));
    }

    let l = 1.0 - w;
    let a = config.asymmetry_factor;
    let denominator = w - (l * l / w) * a;
    if !(denominator > 0.0) {
        return Err(SimError::InvalidConfig(format!(
            "win rate {} cannot reach a positive expectation with asymmetry {}",
            w, a
        )));
    }

    let per_trade =
        request.daily_target_pct / request.trades_per_day + request.cost_allowance_pct.max(0.0);
    let base_win = per_trade / denominator;
    let base_loss = base_win * (l / w) * a;

    Ok(BaseSizes {
        per_trade,
        base_win,
        base_loss,
    })
}

/// Factor applied to both modes so that the mixture's expected value per
/// trade equals the per-trade target.
fn mixture_scale(request: &RangeRequest, config: &CalculatorConfig, base: &BaseSizes) -> f64 {
    let w = request.win_rate;
    let l = 1.0 - w;
    let p_tight = config.tight_mode_percent.clamp(0.0, 1.0);
    let p_wide = 1.0 - p_tight;

    // Mean multipliers of each band
    let tight_mult = 1.0;
    let wide_win = (config.wide_win_min_mult + config.wide_win_max_mult) / 2.0;
    let wide_loss = (config.wide_loss_min_mult + config.wide_loss_max_mult) / 2.0;

    let ev_tight = w * base.base_win * tight_mult - l * base.base_loss * tight_mult;
    let ev_wide = w * base.base_win * wide_win - l * base.base_loss * wide_loss;
    let mixture = p_tight * ev_tight + p_wide * ev_wide;

    if mixture > 0.0 && mixture.is_finite() {
        base.per_trade / mixture
    } else {
        1.0
    }
}

/// Compute the range for an explicit variance mode. Deterministic.
pub fn range_for_mode(
    request: &RangeRequest,
    mode: VarianceMode,
    config: &CalculatorConfig,
) -> Result<PnlRange, SimError> {
    let base = base_sizes(request, config)?;
    let scale = mixture_scale(request, config, &base);
    let win = base.base_win * scale;
    let loss = base.base_loss * scale;

    let (mut win_min, mut win_max, mut loss_min, mut loss_max) = match mode {
        VarianceMode::Tight => {
            let s = config.tight_spread.abs();
            (win * (1.0 - s), win * (1.0 + s), loss * (1.0 - s), loss * (1.0 + s))
        }
        VarianceMode::Wide => (
            win * config.wide_win_min_mult,
            win * config.wide_win_max_mult,
            loss * config.wide_loss_min_mult,
            loss * config.wide_loss_max_mult,
        ),
    };

    let target = request.daily_target_pct;
    let remaining = request.trades_remaining.max(1.0);
    let current = if request.current_daily_pnl.is_finite() {
        request.current_daily_pnl
    } else {
        0.0
    };

    // Running ahead: shrink wins and fatten losses for the rest of the day
    if current > target * (1.0 + config.correction_threshold) {
        let adjustment = (current - target) / remaining * config.correction_strength;
        win_min -= adjustment;
        win_max -= adjustment;
        loss_min += adjustment;
        loss_max += adjustment;
    } else if config.correct_shortfall {
        let done = (request.trades_per_day - remaining).max(0.0);
        let expected_so_far = target * done / request.trades_per_day;
        let shortfall = expected_so_far - current;
        if shortfall > target * config.correction_threshold {
            let adjustment = shortfall / remaining * config.correction_strength;
            win_min += adjustment;
            win_max += adjustment;
            loss_min -= adjustment;
            loss_max -= adjustment;
        }
    }

    let win_floor = win * config.floor_ratio;
    let loss_floor = loss * config.floor_ratio;
    win_min = win_min.max(win_floor);
    win_max = win_max.max(win_min);
    loss_min = loss_min.max(loss_floor);
    loss_max = loss_max.max(loss_min);

    let w = request.win_rate;
    let expected_value = w * (win_min + win_max) / 2.0 - (1.0 - w) * (loss_min + loss_max) / 2.0;

    Ok(PnlRange {
        win_min,
        win_max,
        loss_min,
        loss_max,
        mode,
        base_win: win,
        base_loss: loss,
        expected_value,
    })
}

/// Draw a variance mode and compute the range for the next trade.
pub fn calculate_range<R: Rng>(
    request: &RangeRequest,
    config: &CalculatorConfig,
    rng: &mut R,
) -> Result<PnlRange, SimError> {
    let mode = if rng.random_bool(config.tight_mode_percent.clamp(0.0, 1.0)) {
        VarianceMode::Tight
    } else {
        VarianceMode::Wide
    };
    range_for_mode(request, mode, config)
}

/// Analytic replay of the range mixture over one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedDaily {
    pub target_pct: f64,
    /// Expected realized daily P&L, percent of capital
    pub expected_daily_pct: f64,
    /// |expected - target| / target
    pub deviation: f64,
    /// Standard deviation of one day's P&L, percent of capital
    pub daily_std_dev: f64,
    /// 1.0 means the expectation lands exactly on target
    pub convergence_score: f64,
}

fn uniform_second_moment(lo: f64, hi: f64) -> f64 {
    (lo * lo + lo * hi + hi * hi) / 3.0
}

/// Expected daily P&L of the range mixture for `request`.
pub fn calculate_expected_daily(
    request: &RangeRequest,
    config: &CalculatorConfig,
) -> Result<ExpectedDaily, SimError> {
    let tight = range_for_mode(request, VarianceMode::Tight, config)?;
    let wide = range_for_mode(request, VarianceMode::Wide, config)?;
    let p_tight = config.tight_mode_percent.clamp(0.0, 1.0);
    let p_wide = 1.0 - p_tight;
    let w = request.win_rate;
    let l = 1.0 - w;

    let ev_trade = p_tight * tight.expected_value + p_wide * wide.expected_value;
    let second_moment = [(p_tight, tight), (p_wide, wide)]
        .iter()
        .map(|(p, r)| {
            p * (w * uniform_second_moment(r.win_min, r.win_max)
                + l * uniform_second_moment(r.loss_min, r.loss_max))
        })
        .sum::<f64>();
    let variance = (second_moment - ev_trade * ev_trade).max(0.0);

    let net_trade = ev_trade - request.cost_allowance_pct.max(0.0);
    let expected_daily_pct = net_trade * request.trades_per_day;
    let target_pct = request.daily_target_pct;
    let deviation = ((expected_daily_pct - target_pct) / target_pct).abs();

    Ok(ExpectedDaily {
        target_pct,
        expected_daily_pct,
        deviation,
        daily_std_dev: (variance * request.trades_per_day).sqrt(),
        convergence_score: (1.0 - deviation).clamp(0.0, 1.0),
    })
}

/// Outcome of [`validate_configuration`].
#[derive(Debug, Clone)]
pub struct ConfigValidation {
    pub expected: ExpectedDaily,
    pub warnings: Vec<String>,
}

/// Reject configs whose expected daily P&L misses the target by more than
/// the allowed deviation; flag (but accept) a weak convergence score.
pub fn validate_configuration(
    bot: &BotConfig,
    config: &CalculatorConfig,
) -> Result<ConfigValidation, SimError> {
    bot.validate()?;

    let expected = calculate_expected_daily(&RangeRequest::for_config(bot), config)?;
    if expected.deviation > config.max_deviation {
        return Err(SimError::InvalidConfig(format!(
            "expected daily P&L {:.4}% deviates {:.1}% from target {:.4}%",
            expected.expected_daily_pct,
            expected.deviation * 100.0,
            expected.target_pct
        )));
    }

    let mut warnings = Vec::new();
    if expected.convergence_score < config.min_convergence_score {
        warn!(
            bot = %bot.name,
            score = expected.convergence_score,
            "Weak convergence score"
        );
        warnings.push(format!(
            "convergence score {:.2} is below {:.2}",
            expected.convergence_score, config.min_convergence_score
        ));
    }

    Ok(ConfigValidation { expected, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_base_sizes_hit_per_trade_target() {
        let config = CalculatorConfig::default();
        let request = RangeRequest::fresh(2.0, 20.0, 0.7);
        let base = base_sizes(&request, &config).unwrap();

        let ev = 0.7 * base.base_win - 0.3 * base.base_loss;
        assert!((ev - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_convergence_sweep() {
        let config = CalculatorConfig::default();

        for win_rate in [0.5, 0.55, 0.6, 0.65, 0.7, 0.75, 0.8, 0.85, 0.9, 0.95] {
            for trades in [5.0, 10.0, 20.0, 40.0, 80.0] {
                let request = RangeRequest::fresh(1.5, trades, win_rate);
                let expected = calculate_expected_daily(&request, &config).unwrap();

                assert!(
                    expected.deviation <= 0.10,
                    "win rate {} trades {}: deviation {}",
                    win_rate,
                    trades,
                    expected.deviation
                );
                assert!(expected.convergence_score >= 0.8);
            }
        }
    }

    #[test]
    fn test_losses_smaller_than_wins() {
        let config = CalculatorConfig::default();
        for win_rate in [0.51, 0.6, 0.75, 0.9] {
            let base = base_sizes(&RangeRequest::fresh(1.0, 10.0, win_rate), &config).unwrap();
            assert!(base.base_loss < base.base_win);
        }
    }

    #[test]
    fn test_self_correction_is_monotonic() {
        let config = CalculatorConfig::default();
        let target = 2.0;
        let mut previous: Option<PnlRange> = None;

        for current in [2.5, 2.6, 2.8, 3.0] {
            let request = RangeRequest {
                current_daily_pnl: current,
                trades_remaining: 10.0,
                ..RangeRequest::fresh(target, 20.0, 0.7)
            };
            let range = range_for_mode(&request, VarianceMode::Tight, &config).unwrap();

            if let Some(prev) = previous {
                assert!(range.win_max < prev.win_max);
                assert!(range.win_mid() < prev.win_mid());
                assert!(range.loss_min > prev.loss_min);
                assert!(range.loss_max > prev.loss_max);
            }
            previous = Some(range);
        }
    }

    #[test]
    fn test_no_correction_below_threshold() {
        let config = CalculatorConfig::default();
        let fresh = RangeRequest::fresh(2.0, 20.0, 0.7);
        let slightly_ahead = RangeRequest {
            current_daily_pnl: 2.3, // 15% above target
            trades_remaining: 5.0,
            ..fresh
        };

        let a = range_for_mode(&fresh, VarianceMode::Tight, &config).unwrap();
        let b = range_for_mode(&slightly_ahead, VarianceMode::Tight, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shortfall_correction_is_opt_in() {
        let request = RangeRequest {
            current_daily_pnl: -1.0,
            trades_remaining: 5.0,
            ..RangeRequest::fresh(2.0, 20.0, 0.7)
        };

        let off = CalculatorConfig::default();
        let on = CalculatorConfig {
            correct_shortfall: true,
            ..Default::default()
        };

        let plain = range_for_mode(&request, VarianceMode::Tight, &off).unwrap();
        let corrected = range_for_mode(&request, VarianceMode::Tight, &on).unwrap();
        assert_eq!(plain, range_for_mode(&RangeRequest::fresh(2.0, 20.0, 0.7), VarianceMode::Tight, &off).unwrap());
        assert!(corrected.win_max > plain.win_max);
        assert!(corrected.loss_max < plain.loss_max);
    }

    #[test]
    fn test_bounds_stay_ordered_and_non_negative() {
        let config = CalculatorConfig::default();
        let request = RangeRequest {
            current_daily_pnl: 500.0, // absurdly far ahead
            trades_remaining: 1.0,
            ..RangeRequest::fresh(1.0, 10.0, 0.6)
        };

        for mode in [VarianceMode::Tight, VarianceMode::Wide] {
            let r = range_for_mode(&request, mode, &config).unwrap();
            assert!(r.win_min >= 0.0 && r.win_min <= r.win_max);
            assert!(r.loss_min >= 0.0 && r.loss_min <= r.loss_max);
            assert!(r.win_min > 0.0, "floor should keep wins positive");
        }
    }

    #[test]
    fn test_low_win_rate_is_rejected() {
        let config = CalculatorConfig::default();
        let result = base_sizes(&RangeRequest::fresh(1.0, 10.0, 0.4), &config);
        assert!(matches!(result, Err(SimError::InvalidConfig(_))));
    }

    #[test]
    fn test_mode_mix_follows_tight_percent() {
        let config = CalculatorConfig::default();
        let mut rng = StdRng::seed_from_u64(11);
        let request = RangeRequest::fresh(1.0, 10.0, 0.7);

        let tight = (0..2000)
            .filter(|_| calculate_range(&request, &config, &mut rng).unwrap().mode == VarianceMode::Tight)
            .count();
        let share = tight as f64 / 2000.0;
        assert!(share > 0.75 && share < 0.85, "tight share {}", share);
    }

    #[test]
    fn test_validate_configuration_accepts_default() {
        let validation =
            validate_configuration(&BotConfig::default(), &CalculatorConfig::default()).unwrap();
        assert!(validation.warnings.is_empty());
        assert!(validation.expected.deviation < 1e-9);
    }
}
