//! Causality-safe history windows.
//!
//! A strategy deciding at date `t` only ever sees records dated `<= t`. The
//! provider slices [`MarketData`] without copying and can re-check every
//! exposed record before handing the window out.

use chrono::{Duration, NaiveDate};
use std::collections::BTreeMap;

use super::error::BacktestError;
use super::market_data::MarketData;
use super::price::PriceRecord;

/// Optional bound on how far back a window reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    /// Records dated on or after `as_of - n days`.
    CalendarDays(u32),
    /// The last `n` records.
    Records(usize),
}

/// Per-symbol history visible as of one date.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryWindow<'a> {
    as_of: NaiveDate,
    slices: BTreeMap<String, &'a [PriceRecord]>,
}

impl<'a> HistoryWindow<'a> {
    pub fn new(as_of: NaiveDate, slices: BTreeMap<String, &'a [PriceRecord]>) -> Self {
        HistoryWindow { as_of, slices }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.slices.keys().map(String::as_str)
    }

    pub fn records(&self, symbol: &str) -> Option<&'a [PriceRecord]> {
        self.slices.get(symbol).copied()
    }

    pub fn closes(&self, symbol: &str) -> Vec<f64> {
        self.records(symbol)
            .map(|records| records.iter().map(|r| r.close).collect())
            .unwrap_or_default()
    }

    pub fn last_close(&self, symbol: &str) -> Option<f64> {
        self.records(symbol)
            .and_then(|records| records.last())
            .map(|r| r.close)
    }
}

/// Result of a window request.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome<'a> {
    Ready(HistoryWindow<'a>),
    InsufficientHistory {
        symbol: String,
        available: usize,
        required: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct CausalityWindowProvider<'a> {
    data: &'a MarketData,
    min_history: usize,
    validate: bool,
}

impl<'a> CausalityWindowProvider<'a> {
    pub fn new(data: &'a MarketData, min_history: usize) -> Self {
        CausalityWindowProvider {
            data,
            min_history,
            validate: true,
        }
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub fn window(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
        lookback: Option<Lookback>,
    ) -> Result<WindowOutcome<'a>, BacktestError> {
        let mut slices = BTreeMap::new();

        for symbol in symbols {
            let series = self
                .data
                .series(symbol)
                .ok_or_else(|| BacktestError::data(symbol, "symbol is not tracked"))?;
            let records = series.records();
            let end = series.count_through(as_of);
            let start = match lookback {
                None => 0,
                Some(Lookback::Records(n)) => end.saturating_sub(n),
                Some(Lookback::CalendarDays(days)) => {
                    let earliest = as_of - Duration::days(i64::from(days));
                    records[..end].partition_point(|r| r.date < earliest)
                }
            };
            let slice = &records[start..end];

            if slice.len() < self.min_history {
                return Ok(WindowOutcome::InsufficientHistory {
                    symbol: symbol.clone(),
                    available: slice.len(),
                    required: self.min_history,
                });
            }
            slices.insert(symbol.clone(), slice);
        }

        let window = HistoryWindow::new(as_of, slices);
        if self.validate {
            validate_window(&window)?;
        }
        Ok(WindowOutcome::Ready(window))
    }
}

/// Fails with [`BacktestError::CausalityViolation`] if any record postdates the window's as-of date.
pub fn validate_window(window: &HistoryWindow<'_>) -> Result<(), BacktestError> {
    for (symbol, records) in &window.slices {
        if let Some(late) = records.iter().find(|r| r.date > window.as_of) {
            tracing::error!(%symbol, record_date = %late.date, as_of = %window.as_of, "look-ahead detected");
            return Err(BacktestError::CausalityViolation {
                symbol: symbol.clone(),
                record_date: late.date,
                as_of: window.as_of,
            });
        }
    }
    Ok(())
}
