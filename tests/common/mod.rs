#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use portsim::domain::backtest::BacktestConfig;
use portsim::domain::error::BacktestError;
use portsim::domain::market_data::{GapPolicy, MarketData};
use portsim::domain::price::PriceSeries;
use portsim::domain::schedule::RebalancePolicy;
use portsim::ports::data_port::PriceHistoryProvider;
use std::cell::Cell;
use std::collections::HashMap;

/// Provider that counts fetches and can be told to fail per symbol.
pub struct MockPriceProvider {
    pub data: HashMap<String, PriceSeries>,
    pub errors: HashMap<String, String>,
    pub fetches: Cell<usize>,
}

impl MockPriceProvider {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
            fetches: Cell::new(0),
        }
    }

    pub fn with_series(mut self, series: PriceSeries) -> Self {
        self.data.insert(series.symbol().to_string(), series);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl PriceHistoryProvider for MockPriceProvider {
    fn fetch_series(
        &self,
        symbol: &str,
        _start_date: NaiveDate,
        _end_date: NaiveDate,
    ) -> Result<PriceSeries, BacktestError> {
        self.fetches.set(self.fetches.get() + 1);
        if let Some(reason) = self.errors.get(symbol) {
            return Err(BacktestError::Data {
                symbol: symbol.to_string(),
                reason: reason.clone(),
            });
        }
        self.data.get(symbol).cloned().ok_or_else(|| BacktestError::Data {
            symbol: symbol.to_string(),
            reason: "not found".to_string(),
        })
    }

    fn list_symbols(&self) -> Result<Vec<String>, BacktestError> {
        let mut symbols: Vec<String> = self.data.keys().cloned().collect();
        symbols.sort();
        Ok(symbols)
    }
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn start() -> NaiveDate {
    date(2024, 1, 1)
}

/// Daily closes on consecutive calendar days from `first`.
pub fn daily_series(symbol: &str, first: NaiveDate, closes: &[f64]) -> PriceSeries {
    let pairs: Vec<(NaiveDate, f64)> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| (first + Duration::days(i as i64), *c))
        .collect();
    PriceSeries::from_closes(symbol, &pairs).unwrap()
}

/// A deterministic wavy path around `base`.
pub fn wave(base: f64, amplitude: f64, drift: f64, len: usize, phase: f64) -> Vec<f64> {
    (0..len)
        .map(|i| base + amplitude * (i as f64 * 0.37 + phase).sin() + drift * i as f64)
        .collect()
}

pub fn market(series: Vec<PriceSeries>) -> MarketData {
    MarketData::new(series, GapPolicy::ForwardFill).unwrap()
}

/// Three symbols over 120 days.
pub fn three_symbol_market() -> MarketData {
    market(vec![
        daily_series("AAA", start(), &wave(100.0, 8.0, 0.10, 120, 0.0)),
        daily_series("BBB", start(), &wave(50.0, 2.0, -0.05, 120, 1.3)),
        daily_series("CCC", start(), &wave(200.0, 25.0, 0.20, 120, 2.1)),
    ])
}

pub fn sample_config(days: i64, capital: f64) -> BacktestConfig {
    BacktestConfig {
        rebalance: RebalancePolicy::EveryStep,
        ..BacktestConfig::new(start(), start() + Duration::days(days - 1), capital)
    }
}
