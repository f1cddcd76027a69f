//! Synthetic daily-rebalanced leveraged instruments.

use super::cost::LeveragedInstrumentCost;
use super::error::BacktestError;
use super::price::{PriceRecord, PriceSeries};

/// Build a `leverage`× series from `underlying`, starting at `base_price`.
///
/// Each step multiplies the previous synthetic close by
/// `1 + leverage * r - drag`, where `r` is the underlying close-to-close
/// return and `drag` is the optional instrument cost spread over
/// `periods_per_year`. Open, high and low get the same leveraged move
/// measured from the previous underlying close.
pub fn synthetic_leveraged_series(
    underlying: &PriceSeries,
    symbol: &str,
    leverage: f64,
    base_price: f64,
    cost: Option<&LeveragedInstrumentCost>,
    periods_per_year: f64,
) -> Result<PriceSeries, BacktestError> {
    if !leverage.is_finite() {
        return Err(BacktestError::data(symbol, format!("invalid leverage {leverage}")));
    }
    if !base_price.is_finite() || base_price <= 0.0 {
        return Err(BacktestError::data(symbol, format!("invalid base price {base_price}")));
    }
    if !periods_per_year.is_finite() || periods_per_year <= 0.0 {
        return Err(BacktestError::data(
            symbol,
            format!("invalid periods per year {periods_per_year}"),
        ));
    }

    let source = underlying.records();
    let Some(first) = source.first() else {
        return Err(BacktestError::data(symbol, "underlying series is empty"));
    };

    let scale = base_price / first.close;
    let mut records = Vec::with_capacity(source.len());
    records.push(PriceRecord {
        date: first.date,
        open: first.open * scale,
        high: first.high * scale,
        low: first.low * scale,
        close: base_price,
        volume: first.volume,
    });

    let mut prev_close = base_price;
    for pair in source.windows(2) {
        let (before, today) = (&pair[0], &pair[1]);
        let drag = cost
            .map(|c| c.annual_pct(today.date) / 100.0 / periods_per_year)
            .unwrap_or(0.0);
        let level = |price: f64| prev_close * (1.0 + leverage * (price / before.close - 1.0) - drag);

        let close = level(today.close);
        if !close.is_finite() || close <= 0.0 {
            tracing::warn!(%symbol, date = %today.date, leverage, "synthetic instrument wiped out");
            return Err(BacktestError::data(
                symbol,
                format!("synthetic price wiped out on {} ({close:.4})", today.date),
            ));
        }
        let open = level(today.open).max(0.0);
        let (a, b) = (level(today.high).max(0.0), level(today.low).max(0.0));
        records.push(PriceRecord {
            date: today.date,
            open,
            high: a.max(b).max(open).max(close),
            low: a.min(b).min(open).min(close),
            close,
            volume: today.volume,
        });
        prev_close = close;
    }

    PriceSeries::new(symbol, records)
}
