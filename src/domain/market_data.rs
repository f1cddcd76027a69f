//! Load-once market context and unified timeline.
//!
//! [`MarketData`] owns every tracked [`PriceSeries`] for a run and is shared
//! read-only between the simulation loop, the causality window and, during
//! sweeps, between worker threads.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use super::error::BacktestError;
use super::price::PriceSeries;
use crate::ports::data_port::PriceHistoryProvider;

/// Symbol → price for a single date.
pub type PriceMap = BTreeMap<String, f64>;

/// How dates missing from some series are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GapPolicy {
    /// Timeline is the union of all dates; a missing price is the last known close.
    #[default]
    ForwardFill,
    /// Timeline is restricted to dates every series trades on.
    Skip,
}

#[derive(Debug, Clone)]
pub struct MarketData {
    series: BTreeMap<String, PriceSeries>,
    timeline: Vec<NaiveDate>,
    gap_policy: GapPolicy,
}

impl MarketData {
    pub fn new(series: Vec<PriceSeries>, gap_policy: GapPolicy) -> Result<Self, BacktestError> {
        if series.is_empty() {
            return Err(BacktestError::data("*", "no price series supplied"));
        }

        let mut by_symbol = BTreeMap::new();
        for s in series {
            if s.is_empty() {
                return Err(BacktestError::data(s.symbol(), "price series is empty"));
            }
            let symbol = s.symbol().to_string();
            if by_symbol.insert(symbol.clone(), s).is_some() {
                return Err(BacktestError::data(symbol, "duplicate price series"));
            }
        }

        let timeline = build_timeline(&by_symbol, gap_policy);

        Ok(MarketData {
            series: by_symbol,
            timeline,
            gap_policy,
        })
    }

    /// Fetch every symbol once from `provider` and build the context.
    pub fn load(
        provider: &dyn PriceHistoryProvider,
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
        gap_policy: GapPolicy,
    ) -> Result<Self, BacktestError> {
        let series = symbols
            .iter()
            .map(|symbol| provider.fetch_series(symbol, start_date, end_date))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(symbols = series.len(), "loaded price history");
        Self::new(series, gap_policy)
    }

    pub fn gap_policy(&self) -> GapPolicy {
        self.gap_policy
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.series.contains_key(symbol)
    }

    pub fn series(&self, symbol: &str) -> Option<&PriceSeries> {
        self.series.get(symbol)
    }

    pub fn timeline(&self) -> &[NaiveDate] {
        &self.timeline
    }

    /// Timeline dates within `[start, end]`.
    pub fn timeline_between(&self, start: NaiveDate, end: NaiveDate) -> &[NaiveDate] {
        let lo = self.timeline.partition_point(|d| *d < start);
        let hi = self.timeline.partition_point(|d| *d <= end);
        &self.timeline[lo..hi.max(lo)]
    }

    /// Price of `symbol` on `date` under the gap policy.
    pub fn price_on(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        let series = self.series.get(symbol)?;
        match self.gap_policy {
            GapPolicy::ForwardFill => series.last_on_or_before(date).map(|r| r.close),
            GapPolicy::Skip => series.get(date).map(|r| r.close),
        }
    }

    /// Point lookup of every symbol priced on `date`.
    pub fn prices_on(&self, date: NaiveDate) -> PriceMap {
        self.series
            .keys()
            .filter_map(|symbol| {
                self.price_on(symbol, date)
                    .map(|price| (symbol.clone(), price))
            })
            .collect()
    }
}

fn build_timeline(series: &BTreeMap<String, PriceSeries>, gap_policy: GapPolicy) -> Vec<NaiveDate> {
    let unique_dates: BTreeSet<NaiveDate> = series
        .values()
        .flat_map(|s| s.records().iter().map(|r| r.date))
        .collect();

    match gap_policy {
        GapPolicy::ForwardFill => unique_dates.into_iter().collect(),
        GapPolicy::Skip => unique_dates
            .into_iter()
            .filter(|date| series.values().all(|s| s.contains_date(*date)))
            .collect(),
    }
}
