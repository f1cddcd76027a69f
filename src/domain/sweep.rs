//! Parallel independent runs over shared market data.
//!
//! Each run owns its portfolio and strategy state; only `&MarketData` is
//! shared. Results come back in input order regardless of scheduling.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

use super::backtest::{BacktestConfig, BacktestResult, CancellationToken, run_backtest_with_cancel};
use super::error::BacktestError;
use super::market_data::MarketData;
use super::strategy::AllocationStrategy;

/// One labelled strategy/config pair in a sweep.
#[derive(Debug, Clone)]
pub struct SweepCase<S> {
    pub label: String,
    pub strategy: S,
    pub config: BacktestConfig,
}

#[derive(Debug)]
pub struct SweepOutcome {
    pub label: String,
    pub result: Result<BacktestResult, BacktestError>,
}

pub fn run_sweep<S>(
    data: &MarketData,
    cases: &[SweepCase<S>],
    cancel: &CancellationToken,
) -> Vec<SweepOutcome>
where
    S: AllocationStrategy + Sync,
{
    tracing::info!(runs = cases.len(), "running sweep");
    cases
        .par_iter()
        .map(|case| SweepOutcome {
            label: case.label.clone(),
            result: run_backtest_with_cancel(data, &case.strategy, &case.config, cancel),
        })
        .collect()
}

/// Inclusive entry/exit dates for one Monte Carlo trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrialWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Draw `count` reproducible windows of at least `min_len` timeline steps.
pub fn random_windows(
    timeline: &[NaiveDate],
    count: usize,
    min_len: usize,
    seed: u64,
) -> Result<Vec<TrialWindow>, BacktestError> {
    if min_len < 2 {
        return Err(BacktestError::config_invalid(
            "sweep",
            "min_len",
            "windows need at least two steps",
        ));
    }
    if timeline.len() < min_len {
        return Err(BacktestError::config_invalid(
            "sweep",
            "min_len",
            format!("timeline has {} steps, windows need {min_len}", timeline.len()),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let last = timeline.len() - 1;
    Ok((0..count)
        .map(|_| {
            let start = rng.gen_range(0..=timeline.len() - min_len);
            let end = rng.gen_range(start + min_len - 1..=last);
            TrialWindow {
                start: timeline[start],
                end: timeline[end],
            }
        })
        .collect())
}

/// Run `strategy` once per window, in parallel, on top of `base`.
pub fn run_window_trials<S>(
    data: &MarketData,
    strategy: &S,
    base: &BacktestConfig,
    windows: &[TrialWindow],
    cancel: &CancellationToken,
) -> Vec<Result<BacktestResult, BacktestError>>
where
    S: AllocationStrategy + Sync,
{
    tracing::info!(trials = windows.len(), "running window trials");
    windows
        .par_iter()
        .map(|window| {
            let config = BacktestConfig {
                start_date: window.start,
                end_date: window.end,
                ..base.clone()
            };
            run_backtest_with_cancel(data, strategy, &config, cancel)
        })
        .collect()
}
