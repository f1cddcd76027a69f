//! Risk and performance metrics over a valuation series.
//!
//! Every metric degrades to `0.0` instead of failing: fewer than two
//! observations, a zero denominator (no volatility, no drawdown, no losses)
//! or a non-positive starting value all yield the sentinel.

use serde::Serialize;

use super::portfolio::ValuationPoint;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Guards the `(1 - α)·n` bucket sizes against binary rounding (0.05 * 20 = 1.0000000000000009).
const BUCKET_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsConfig {
    pub periods_per_year: f64,
    /// Annual rate, as a fraction.
    pub risk_free_rate: f64,
    /// Annual Sortino target, as a fraction.
    pub target_return: f64,
    /// Annual Omega threshold, as a fraction.
    pub omega_threshold: f64,
    /// Tail confidence for VaR, CVaR and CDaR.
    pub confidence: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            periods_per_year: TRADING_DAYS_PER_YEAR,
            risk_free_rate: 0.0,
            target_return: 0.0,
            omega_threshold: 0.0,
            confidence: 0.95,
        }
    }
}

impl MetricsConfig {
    fn per_period(&self, annual: f64) -> f64 {
        if self.periods_per_year > 0.0 {
            annual / self.periods_per_year
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ReturnPercentiles {
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RiskMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    /// Longest run of consecutive steps spent below a prior peak.
    pub max_drawdown_duration: usize,
    pub cdar: f64,
    pub ulcer_index: f64,
    pub omega_ratio: f64,
    pub calmar_ratio: f64,
    /// Positive number meaning a loss.
    pub value_at_risk: f64,
    pub conditional_value_at_risk: f64,
    pub return_percentiles: ReturnPercentiles,
}

impl RiskMetrics {
    pub fn from_valuations(points: &[ValuationPoint], config: &MetricsConfig) -> Self {
        let values: Vec<f64> = points.iter().map(|p| p.total_value).collect();
        Self::compute(&values, config)
    }

    pub fn compute(values: &[f64], config: &MetricsConfig) -> Self {
        if values.len() < 2 {
            return RiskMetrics::default();
        }
        let initial = values[0];
        let last = values[values.len() - 1];
        if !values.iter().all(|v| v.is_finite()) || initial <= 0.0 {
            return RiskMetrics::default();
        }

        let returns = simple_returns(values);
        let n = returns.len() as f64;
        let ppy = config.periods_per_year.max(0.0);

        let total_return = last / initial - 1.0;
        let growth = last / initial;
        let annualized_return = if growth > 0.0 {
            growth.powf(ppy / n) - 1.0
        } else {
            -1.0
        };

        let mean = returns.iter().sum::<f64>() / n;
        let std = sample_std(&returns, mean);
        let annualized_volatility = std * ppy.sqrt();

        let sharpe_ratio = if std > 0.0 {
            (mean - config.per_period(config.risk_free_rate)) / std * ppy.sqrt()
        } else {
            0.0
        };

        let target = config.per_period(config.target_return);
        let downside = (returns.iter().map(|r| (r - target).min(0.0).powi(2)).sum::<f64>() / n).sqrt();
        let sortino_ratio = if downside > 0.0 {
            (mean - target) / downside * ppy.sqrt()
        } else {
            0.0
        };

        let dd = drawdown_series(values);
        let (max_drawdown, max_drawdown_duration) = max_drawdown(&dd);
        let cdar = conditional_drawdown(&dd, config.confidence);
        let ulcer_index = (dd.iter().map(|d| d * d).sum::<f64>() / dd.len() as f64).sqrt();

        let tau = config.per_period(config.omega_threshold);
        let gains: f64 = returns.iter().map(|r| (r - tau).max(0.0)).sum();
        let losses: f64 = returns.iter().map(|r| (tau - r).max(0.0)).sum();
        let omega_ratio = if losses > 0.0 { gains / losses } else { 0.0 };

        let calmar_ratio = if max_drawdown > 0.0 {
            annualized_return / max_drawdown
        } else {
            0.0
        };

        let mut sorted = returns.clone();
        sorted.sort_by(f64::total_cmp);
        let (value_at_risk, conditional_value_at_risk) = tail_risk(&sorted, config.confidence);

        RiskMetrics {
            total_return,
            annualized_return,
            annualized_volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            max_drawdown_duration,
            cdar,
            ulcer_index,
            omega_ratio,
            calmar_ratio,
            value_at_risk,
            conditional_value_at_risk,
            return_percentiles: ReturnPercentiles {
                p10: percentile(&sorted, 0.10),
                p25: percentile(&sorted, 0.25),
                p50: percentile(&sorted, 0.50),
                p75: percentile(&sorted, 0.75),
                p90: percentile(&sorted, 0.90),
            },
        }
    }
}

pub fn simple_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

fn sample_std(returns: &[f64], mean: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() as f64 - 1.0);
    var.sqrt()
}

/// Per-step drawdown from the running peak, as a fraction.
pub fn drawdown_series(values: &[f64]) -> Vec<f64> {
    let mut peak = f64::MIN;
    values
        .iter()
        .map(|&v| {
            peak = peak.max(v);
            if peak > 0.0 { (peak - v) / peak } else { 0.0 }
        })
        .collect()
}

fn max_drawdown(dd: &[f64]) -> (f64, usize) {
    let mut max_dd = 0.0_f64;
    let mut longest = 0usize;
    let mut current = 0usize;
    for &d in dd {
        max_dd = max_dd.max(d);
        if d > 0.0 {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    (max_dd, longest)
}

fn conditional_drawdown(dd: &[f64], confidence: f64) -> f64 {
    if dd.is_empty() {
        return 0.0;
    }
    let tail = ((1.0 - confidence) * dd.len() as f64 - BUCKET_EPSILON).ceil();
    let k = (tail.max(1.0) as usize).min(dd.len());
    let mut worst = dd.to_vec();
    worst.sort_by(|a, b| b.total_cmp(a));
    worst[..k].iter().sum::<f64>() / k as f64
}

/// Historical VaR and CVaR from ascending returns, as positive losses.
fn tail_risk(sorted: &[f64], confidence: f64) -> (f64, f64) {
    if sorted.is_empty() {
        return (0.0, 0.0);
    }
    let tail = ((1.0 - confidence) * sorted.len() as f64 + BUCKET_EPSILON).floor();
    let k = (tail.max(1.0) as usize).min(sorted.len());
    let var = -sorted[k - 1];
    let cvar = -(sorted[..k].iter().sum::<f64>() / k as f64);
    (var + 0.0, cvar + 0.0)
}

/// Linearly interpolated percentile of ascending `sorted`, with `p` in `[0, 1]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
