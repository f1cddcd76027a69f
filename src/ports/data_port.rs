//! Price-history access port.

use crate::domain::error::BacktestError;
use crate::domain::price::PriceSeries;
use chrono::NaiveDate;

/// Supplies ascending price history per symbol. Called once per run while
/// building [`crate::domain::market_data::MarketData`], never from the day loop.
pub trait PriceHistoryProvider {
    fn fetch_series(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<PriceSeries, BacktestError>;

    fn list_symbols(&self) -> Result<Vec<String>, BacktestError>;
}
