//! Property tests for the allocator, risk statistics and history windows.

mod common;

use chrono::Duration;
use common::*;
use portsim::domain::allocation::DiscreteAllocator;
use portsim::domain::causality::{CausalityWindowProvider, Lookback, WindowOutcome};
use portsim::domain::metrics::{drawdown_series, percentile};
use portsim::domain::strategy::TargetWeights;
use proptest::prelude::*;
use std::collections::BTreeMap;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn greedy_stays_within_budget_and_one_share_of_target(
        assets in prop::collection::vec((1.0f64..500.0, 1.0f64..100.0), 1..6),
        capital in 1_000.0f64..1_000_000.0,
    ) {
        let total: f64 = assets.iter().map(|(_, w)| w).sum();
        let weights: TargetWeights = assets
            .iter()
            .enumerate()
            .map(|(i, (_, w))| (format!("S{i}"), w / total * 100.0))
            .collect();
        let prices: BTreeMap<String, f64> = assets
            .iter()
            .enumerate()
            .map(|(i, (p, _))| (format!("S{i}"), *p))
            .collect();

        let allocation = DiscreteAllocator::greedy()
            .allocate(&weights, &prices, &BTreeMap::new(), capital)
            .unwrap();

        prop_assert!(allocation.leftover_cash >= -1e-6);
        let spent: f64 = allocation
            .target_shares
            .iter()
            .map(|(s, n)| n * prices[s])
            .sum();
        prop_assert!(spent <= capital + 1e-6);
        for (symbol, weight) in &weights {
            let held = allocation.target_shares.get(symbol).copied().unwrap_or(0.0);
            prop_assert!(held >= 0.0 && held.fract() == 0.0);
            let target = weight / 100.0 * capital;
            prop_assert!((target - held * prices[symbol]).abs() <= prices[symbol] + 1e-6);
        }
    }

    #[test]
    fn percentile_is_monotone_and_bounded(
        mut values in prop::collection::vec(-1.0f64..1.0, 1..50),
        a in 0.0f64..1.0,
        b in 0.0f64..1.0,
    ) {
        values.sort_by(f64::total_cmp);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let p_lo = percentile(&values, lo);
        let p_hi = percentile(&values, hi);
        prop_assert!(p_lo <= p_hi + 1e-12);
        prop_assert!(p_lo >= values[0] - 1e-12);
        prop_assert!(p_hi <= values[values.len() - 1] + 1e-12);
    }

    #[test]
    fn drawdowns_are_fractions(values in prop::collection::vec(0.01f64..1_000.0, 1..80)) {
        for d in drawdown_series(&values) {
            prop_assert!((0.0..1.0).contains(&d));
        }
    }

    #[test]
    fn windows_end_at_as_of_and_repeat_exactly(
        closes in prop::collection::vec(1.0f64..100.0, 2..60),
        offset in 0usize..60,
        records in prop::option::of(1usize..30),
    ) {
        let data = market(vec![daily_series("AAA", start(), &closes)]);
        let as_of = start() + Duration::days((offset % closes.len()) as i64);
        let provider = CausalityWindowProvider::new(&data, 1);
        let symbols = vec!["AAA".to_string()];
        let lookback = records.map(Lookback::Records);

        let first = provider.window(&symbols, as_of, lookback).unwrap();
        let second = provider.window(&symbols, as_of, lookback).unwrap();
        prop_assert_eq!(&first, &second);

        match first {
            WindowOutcome::Ready(window) => {
                let slice = window.records("AAA").unwrap();
                prop_assert!(slice.iter().all(|r| r.date <= as_of));
                prop_assert_eq!(slice.last().map(|r| r.date), Some(as_of));
                if let Some(n) = records {
                    prop_assert!(slice.len() <= n);
                }
            }
            other => prop_assert!(false, "unexpected outcome {:?}", other),
        }
    }
}
