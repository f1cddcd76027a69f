//! Price records and per-symbol price series.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

use super::error::BacktestError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceRecord {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceRecord {
    /// A bar where every price field is the close.
    pub fn from_close(date: NaiveDate, close: f64) -> Self {
        PriceRecord {
            date,
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }
}

/// Ascending, duplicate-free price history for one symbol.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    symbol: String,
    records: Vec<PriceRecord>,
    date_index: HashMap<NaiveDate, usize>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, records: Vec<PriceRecord>) -> Result<Self, BacktestError> {
        let symbol = symbol.into();

        for pair in records.windows(2) {
            if pair[1].date <= pair[0].date {
                return Err(BacktestError::data(
                    &symbol,
                    format!(
                        "records out of order or duplicated at {} after {}",
                        pair[1].date, pair[0].date
                    ),
                ));
            }
        }

        if let Some(bad) = records
            .iter()
            .find(|r| !r.close.is_finite() || r.close <= 0.0)
        {
            return Err(BacktestError::data(
                &symbol,
                format!("non-positive close {} on {}", bad.close, bad.date),
            ));
        }

        let date_index = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.date, i))
            .collect();

        Ok(PriceSeries {
            symbol,
            records,
            date_index,
        })
    }

    /// Build a close-only series from `(date, close)` pairs.
    pub fn from_closes(
        symbol: impl Into<String>,
        closes: &[(NaiveDate, f64)],
    ) -> Result<Self, BacktestError> {
        let records = closes
            .iter()
            .map(|&(date, close)| PriceRecord::from_close(date, close))
            .collect();
        Self::new(symbol, records)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn records(&self) -> &[PriceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.records.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.records.last().map(|r| r.date)
    }

    pub fn get(&self, date: NaiveDate) -> Option<&PriceRecord> {
        self.date_index.get(&date).map(|&i| &self.records[i])
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.date_index.contains_key(&date)
    }

    /// Number of records dated on or before `date`.
    pub fn count_through(&self, date: NaiveDate) -> usize {
        self.records.partition_point(|r| r.date <= date)
    }

    /// Most recent record dated on or before `date`.
    pub fn last_on_or_before(&self, date: NaiveDate) -> Option<&PriceRecord> {
        match self.count_through(date) {
            0 => None,
            n => Some(&self.records[n - 1]),
        }
    }

    /// Close-to-close simple returns.
    pub fn returns(&self) -> Vec<f64> {
        self.records
            .windows(2)
            .map(|w| w[1].close / w[0].close - 1.0)
            .collect()
    }
}
