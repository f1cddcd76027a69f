//! In-memory price history provider.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::domain::error::BacktestError;
use crate::domain::price::PriceSeries;
use crate::ports::data_port::PriceHistoryProvider;

/// Serves pre-built series, clipped to the requested date range.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceProvider {
    series: BTreeMap<String, PriceSeries>,
}

impl InMemoryPriceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, series: PriceSeries) -> Self {
        self.insert(series);
        self
    }

    /// Replaces any existing series for the same symbol.
    pub fn insert(&mut self, series: PriceSeries) {
        self.series.insert(series.symbol().to_string(), series);
    }
}

impl FromIterator<PriceSeries> for InMemoryPriceProvider {
    fn from_iter<I: IntoIterator<Item = PriceSeries>>(iter: I) -> Self {
        let mut provider = Self::new();
        for series in iter {
            provider.insert(series);
        }
        provider
    }
}

impl PriceHistoryProvider for InMemoryPriceProvider {
    fn fetch_series(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PriceSeries, BacktestError> {
        let series = self
            .series
            .get(symbol)
            .ok_or_else(|| BacktestError::data(symbol, "unknown symbol"))?;
        let records: Vec<_> = series
            .records()
            .iter()
            .filter(|r| r.date >= start_date && r.date <= end_date)
            .cloned()
            .collect();
        if records.is_empty() {
            return Err(BacktestError::data(
                symbol,
                format!("no prices between {start_date} and {end_date}"),
            ));
        }
        PriceSeries::new(symbol, records)
    }

    fn list_symbols(&self) -> Result<Vec<String>, BacktestError> {
        Ok(self.series.keys().cloned().collect())
    }
}
