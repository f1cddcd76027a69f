//! Configuration loading and validation.
//!
//! Builds a [`BacktestConfig`] from any [`ConfigPort`]. Missing optional keys
//! take their defaults; present but malformed values are rejected.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::allocation::{
    AllocationMethod, DiscreteAllocator, IntegerAllocationSolver, NeighborhoodSearchSolver,
    ShareMode,
};
use crate::domain::backtest::BacktestConfig;
use crate::domain::causality::Lookback;
use crate::domain::cost::{
    CostModel, EraBracket, EraCostTable, HoldingCost, LeveragedInstrumentCost, TransactionCost,
};
use crate::domain::error::BacktestError;
use crate::domain::execution::ExecutionConfig;
use crate::domain::metrics::{MetricsConfig, TRADING_DAYS_PER_YEAR};
use crate::domain::schedule::RebalancePolicy;
use crate::ports::config_port::ConfigPort;

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, BacktestError> {
    let start_date = read_date(config, "start_date")?;
    let end_date = read_date(config, "end_date")?;
    require(config, "backtest", "initial_capital")?;

    let timeout = match config.get_string("backtest", "timeout_secs") {
        Some(_) => {
            let secs = non_negative(config, "backtest", "timeout_secs", 0.0)?;
            let timeout = Duration::try_from_secs_f64(secs).map_err(|_| {
                BacktestError::config_invalid(
                    "backtest",
                    "timeout_secs",
                    format!("{secs} seconds is not a representable timeout"),
                )
            })?;
            Some(timeout)
        }
        None => None,
    };

    let execution = ExecutionConfig {
        slippage_pct: read_f64(config, "backtest", "slippage_pct", 0.0)?,
        allow_shorting: config.get_bool("backtest", "allow_shorting", false),
    };

    let config_out = BacktestConfig {
        start_date,
        end_date,
        initial_capital: read_f64(config, "backtest", "initial_capital", 0.0)?,
        rebalance: rebalance_policy(config)?,
        lookback: lookback(config)?,
        min_history: read_usize(config, "rebalance", "min_history", 1)?,
        allocator: allocator(config)?,
        costs: cost_model(config)?,
        execution,
        weight_tolerance_pct: read_f64(config, "backtest", "weight_tolerance_pct", 1.0)?,
        cash_buffer_pct: read_f64(config, "backtest", "cash_buffer_pct", 0.0)?,
        strict: config.get_bool("backtest", "strict", false),
        validate_causality: config.get_bool("backtest", "validate_causality", true),
        metrics: metrics_config(config)?,
        timeout,
    };
    config_out.validate()?;
    Ok(config_out)
}

fn require(config: &dyn ConfigPort, section: &str, key: &str) -> Result<String, BacktestError> {
    match config.get_string(section, key) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(BacktestError::ConfigMissing {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

fn read_date(config: &dyn ConfigPort, key: &str) -> Result<NaiveDate, BacktestError> {
    let value = require(config, "backtest", key)?;
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| {
        BacktestError::config_invalid(
            "backtest",
            key,
            format!("invalid {key} format, expected YYYY-MM-DD"),
        )
    })
}

/// A present value must parse; the port's typed getter supplies the default.
fn read_f64(config: &dyn ConfigPort, section: &str, key: &str, default: f64) -> Result<f64, BacktestError> {
    if let Some(raw) = config.get_string(section, key) {
        let parsed = raw.trim().parse::<f64>();
        if !matches!(parsed, Ok(v) if v.is_finite()) {
            return Err(BacktestError::config_invalid(
                section,
                key,
                format!("{key} must be a number, got {raw:?}"),
            ));
        }
    }
    Ok(config.get_double(section, key, default))
}

fn read_usize(config: &dyn ConfigPort, section: &str, key: &str, default: usize) -> Result<usize, BacktestError> {
    if let Some(raw) = config.get_string(section, key) {
        if raw.trim().parse::<usize>().is_err() {
            return Err(BacktestError::config_invalid(
                section,
                key,
                format!("{key} must be a non-negative integer, got {raw:?}"),
            ));
        }
    }
    let value = config.get_int(section, key, default as i64);
    usize::try_from(value).map_err(|_| {
        BacktestError::config_invalid(section, key, format!("{key} must be a non-negative integer"))
    })
}

fn non_negative(config: &dyn ConfigPort, section: &str, key: &str, default: f64) -> Result<f64, BacktestError> {
    let value = read_f64(config, section, key, default)?;
    if value < 0.0 {
        return Err(BacktestError::config_invalid(
            section,
            key,
            format!("{key} must be non-negative"),
        ));
    }
    Ok(value)
}

fn positive_usize(config: &dyn ConfigPort, section: &str, key: &str, default: usize) -> Result<usize, BacktestError> {
    let value = read_usize(config, section, key, default)?;
    if value == 0 {
        return Err(BacktestError::config_invalid(
            section,
            key,
            format!("{key} must be at least 1"),
        ));
    }
    Ok(value)
}

fn rebalance_policy(config: &dyn ConfigPort) -> Result<RebalancePolicy, BacktestError> {
    let frequency = config
        .get_string("rebalance", "frequency")
        .map(|f| f.trim().to_lowercase())
        .unwrap_or_else(|| "monthly".to_string());
    match frequency.as_str() {
        "every_step" | "daily" => Ok(RebalancePolicy::EveryStep),
        "weekly" => Ok(RebalancePolicy::Weekly),
        "monthly" => Ok(RebalancePolicy::Monthly),
        "quarterly" => Ok(RebalancePolicy::Quarterly),
        "yearly" | "annual" => Ok(RebalancePolicy::Yearly),
        "every_n_days" => {
            require(config, "rebalance", "every_n_days")?;
            Ok(RebalancePolicy::EveryNDays(positive_usize(
                config,
                "rebalance",
                "every_n_days",
                1,
            )?))
        }
        other => Err(BacktestError::config_invalid(
            "rebalance",
            "frequency",
            format!("unknown frequency {other:?}"),
        )),
    }
}

fn lookback(config: &dyn ConfigPort) -> Result<Option<Lookback>, BacktestError> {
    let days = config.get_string("rebalance", "lookback_days").is_some();
    let records = config.get_string("rebalance", "lookback_records").is_some();
    match (days, records) {
        (true, true) => Err(BacktestError::config_invalid(
            "rebalance",
            "lookback_days",
            "set lookback_days or lookback_records, not both",
        )),
        (true, false) => {
            let n = positive_usize(config, "rebalance", "lookback_days", 1)?;
            let n = u32::try_from(n).map_err(|_| {
                BacktestError::config_invalid("rebalance", "lookback_days", "lookback_days is too large")
            })?;
            Ok(Some(Lookback::CalendarDays(n)))
        }
        (false, true) => Ok(Some(Lookback::Records(positive_usize(
            config,
            "rebalance",
            "lookback_records",
            1,
        )?))),
        (false, false) => Ok(None),
    }
}

fn allocator(config: &dyn ConfigPort) -> Result<DiscreteAllocator, BacktestError> {
    let share_mode = match config
        .get_string("allocation", "share_mode")
        .map(|m| m.trim().to_lowercase())
        .as_deref()
    {
        None | Some("whole") => ShareMode::Whole,
        Some("fractional") => ShareMode::Fractional,
        Some(other) => {
            return Err(BacktestError::config_invalid(
                "allocation",
                "share_mode",
                format!("unknown share mode {other:?}"),
            ));
        }
    };

    let method = match config
        .get_string("allocation", "method")
        .map(|m| m.trim().to_lowercase())
        .as_deref()
    {
        None | Some("greedy") => AllocationMethod::Greedy,
        Some("optimal") => {
            let defaults = NeighborhoodSearchSolver::default();
            let radius = read_usize(config, "allocation", "search_radius", defaults.radius as usize)?;
            let solver: Arc<dyn IntegerAllocationSolver> = Arc::new(NeighborhoodSearchSolver {
                radius: u32::try_from(radius).map_err(|_| {
                    BacktestError::config_invalid("allocation", "search_radius", "search_radius is too large")
                })?,
                max_nodes: positive_usize(
                    config,
                    "allocation",
                    "max_search_nodes",
                    defaults.max_nodes as usize,
                )? as u64,
            });
            AllocationMethod::Optimal(Some(solver))
        }
        Some(other) => {
            return Err(BacktestError::config_invalid(
                "allocation",
                "method",
                format!("unknown allocation method {other:?}"),
            ));
        }
    };

    Ok(DiscreteAllocator { method, share_mode })
}

fn cost_model(config: &dyn ConfigPort) -> Result<CostModel, BacktestError> {
    let mut model = CostModel::zero();

    let per_trade = read_f64(config, "costs", "commission_per_trade", 0.0)?;
    let pct = read_f64(config, "costs", "commission_pct", 0.0)?;
    let impact = read_f64(config, "costs", "impact_coefficient", 0.0)?;
    let transaction = TransactionCost::new(per_trade, pct, impact)?;
    if per_trade > 0.0 || pct > 0.0 || impact > 0.0 {
        model = model.with(transaction);
    }

    let holding_pct = read_f64(config, "costs", "holding_annual_pct", 0.0)?;
    let holding = HoldingCost::new(holding_pct)?;
    if holding_pct > 0.0 {
        model = model.with(holding);
    }

    let symbols: Vec<String> = config
        .get_string("leveraged", "symbols")
        .map(|s| {
            s.split(',')
                .map(|sym| sym.trim().to_string())
                .filter(|sym| !sym.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if !symbols.is_empty() {
        let eras = EraCostTable::new(
            parse_eras(config.get_string("leveraged", "eras").as_deref().unwrap_or(""))?,
            read_f64(config, "leveraged", "default_excess_pct", 0.0)?,
        )?;
        model = model.with(LeveragedInstrumentCost::new(
            symbols,
            read_f64(config, "leveraged", "base_expense_pct", 0.0)?,
            eras,
        )?);
    }

    Ok(model)
}

/// Parse `1990-1999:1.5, 2000-2009:0.8`.
pub fn parse_eras(value: &str) -> Result<Vec<EraBracket>, BacktestError> {
    let invalid = |entry: &str| {
        BacktestError::config_invalid(
            "leveraged",
            "eras",
            format!("expected START-END:PCT, got {entry:?}"),
        )
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<EraBracket, BacktestError> {
            let (years, pct) = entry.split_once(':').ok_or_else(|| invalid(entry))?;
            let (start, end) = years.split_once('-').ok_or_else(|| invalid(entry))?;
            Ok(EraBracket {
                start_year: start.trim().parse().map_err(|_| invalid(entry))?,
                end_year: end.trim().parse().map_err(|_| invalid(entry))?,
                excess_pct: pct.trim().parse().map_err(|_| invalid(entry))?,
            })
        })
        .collect()
}

fn metrics_config(config: &dyn ConfigPort) -> Result<MetricsConfig, BacktestError> {
    let risk_free_rate = read_f64(config, "metrics", "risk_free_rate", 0.0)?;
    if !(0.0..1.0).contains(&risk_free_rate) {
        return Err(BacktestError::config_invalid(
            "metrics",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    let periods_per_year = read_f64(config, "metrics", "periods_per_year", TRADING_DAYS_PER_YEAR)?;
    if periods_per_year <= 0.0 {
        return Err(BacktestError::config_invalid(
            "metrics",
            "periods_per_year",
            "periods_per_year must be positive",
        ));
    }
    let confidence = read_f64(config, "metrics", "confidence", 0.95)?;
    if confidence <= 0.0 || confidence >= 1.0 {
        return Err(BacktestError::config_invalid(
            "metrics",
            "confidence",
            "confidence must be strictly between 0 and 1",
        ));
    }
    Ok(MetricsConfig {
        periods_per_year,
        risk_free_rate,
        target_return: read_f64(config, "metrics", "target_return", 0.0)?,
        omega_threshold: read_f64(config, "metrics", "omega_threshold", 0.0)?,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapConfig(HashMap<(String, String), String>);

    impl MapConfig {
        fn new(entries: &[(&str, &str, &str)]) -> Self {
            MapConfig(
                entries
                    .iter()
                    .map(|(s, k, v)| ((s.to_string(), k.to_string()), v.to_string()))
                    .collect(),
            )
        }
    }

    impl ConfigPort for MapConfig {
        fn get_string(&self, section: &str, key: &str) -> Option<String> {
            self.0.get(&(section.to_string(), key.to_string())).cloned()
        }

        fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
            self.get_string(section, key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
            self.get_string(section, key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
            match self.get_string(section, key).as_deref() {
                Some("true") => true,
                Some("false") => false,
                _ => default,
            }
        }
    }

    fn base() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("backtest", "start_date", "2020-01-01"),
            ("backtest", "end_date", "2020-12-31"),
            ("backtest", "initial_capital", "100000"),
        ]
    }

    fn with(extra: &[(&'static str, &'static str, &'static str)]) -> MapConfig {
        let mut entries = base();
        entries.extend_from_slice(extra);
        MapConfig::new(&entries)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let c = build_backtest_config(&with(&[])).unwrap();
        assert_eq!(c.start_date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(c.initial_capital, 100_000.0);
        assert_eq!(c.rebalance, RebalancePolicy::Monthly);
        assert_eq!(c.lookback, None);
        assert_eq!(c.min_history, 1);
        assert!(matches!(c.allocator.method, AllocationMethod::Greedy));
        assert!(c.costs.is_empty());
        assert_eq!(c.metrics, MetricsConfig::default());
        assert!(c.validate_causality);
        assert_eq!(c.timeout, None);
    }

    #[test]
    fn timeout_is_read_in_seconds() {
        let c = build_backtest_config(&with(&[("backtest", "timeout_secs", "2.5")])).unwrap();
        assert_eq!(c.timeout, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn oversized_timeout_is_invalid() {
        for secs in ["1e30", "inf"] {
            let err = build_backtest_config(&with(&[("backtest", "timeout_secs", secs)])).unwrap_err();
            assert!(
                matches!(err, BacktestError::ConfigInvalid { ref key, .. } if key == "timeout_secs"),
                "{secs} gave {err:?}"
            );
        }
    }

    #[test]
    fn missing_required_keys() {
        let err = build_backtest_config(&MapConfig::new(&[("backtest", "start_date", "2020-01-01")]))
            .unwrap_err();
        assert!(matches!(err, BacktestError::ConfigMissing { ref key, .. } if key == "end_date"));

        let err = build_backtest_config(&MapConfig::new(&[
            ("backtest", "start_date", "2020-01-01"),
            ("backtest", "end_date", "2020-12-31"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BacktestError::ConfigMissing { ref key, .. } if key == "initial_capital"));
    }

    #[test]
    fn malformed_values_are_invalid() {
        for extra in [
            ("backtest", "initial_capital", "lots"),
            ("backtest", "cash_buffer_pct", "-1"),
            ("rebalance", "frequency", "hourly"),
            ("rebalance", "min_history", "-3"),
            ("allocation", "method", "magic"),
            ("costs", "commission_pct", "-0.1"),
            ("metrics", "confidence", "1.5"),
            ("metrics", "risk_free_rate", "2"),
        ] {
            let mut entries = base();
            entries.retain(|(s, k, _)| !(*s == extra.0 && *k == extra.1));
            entries.push(extra);
            let err = build_backtest_config(&MapConfig::new(&entries)).unwrap_err();
            assert!(err.is_configuration(), "{extra:?} gave {err:?}");
        }
    }

    #[test]
    fn reversed_dates_rejected() {
        let err = build_backtest_config(&MapConfig::new(&[
            ("backtest", "start_date", "2021-01-01"),
            ("backtest", "end_date", "2020-01-01"),
            ("backtest", "initial_capital", "1000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, BacktestError::ConfigInvalid { .. }));
    }

    #[test]
    fn rebalance_section() {
        let c = build_backtest_config(&with(&[
            ("rebalance", "frequency", "every_n_days"),
            ("rebalance", "every_n_days", "21"),
            ("rebalance", "min_history", "60"),
            ("rebalance", "lookback_records", "120"),
        ]))
        .unwrap();
        assert_eq!(c.rebalance, RebalancePolicy::EveryNDays(21));
        assert_eq!(c.min_history, 60);
        assert_eq!(c.lookback, Some(Lookback::Records(120)));

        let err = build_backtest_config(&with(&[("rebalance", "frequency", "every_n_days")])).unwrap_err();
        assert!(matches!(err, BacktestError::ConfigMissing { .. }));

        let err = build_backtest_config(&with(&[
            ("rebalance", "lookback_days", "30"),
            ("rebalance", "lookback_records", "30"),
        ]))
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn optimal_allocation_section() {
        let c = build_backtest_config(&with(&[
            ("allocation", "method", "optimal"),
            ("allocation", "share_mode", "whole"),
            ("allocation", "search_radius", "3"),
            ("allocation", "max_search_nodes", "5000"),
        ]))
        .unwrap();
        match c.allocator.method {
            AllocationMethod::Optimal(Some(_)) => {}
            other => panic!("unexpected method {other:?}"),
        }
        assert_eq!(c.allocator.share_mode, ShareMode::Whole);
    }

    #[test]
    fn cost_sections_build_components() {
        let c = build_backtest_config(&with(&[
            ("costs", "commission_per_trade", "1"),
            ("costs", "holding_annual_pct", "0.1"),
            ("leveraged", "symbols", "SSO, UPRO"),
            ("leveraged", "base_expense_pct", "0.9"),
            ("leveraged", "eras", "1990-1999:1.5, 2000-2009:0.8"),
        ]))
        .unwrap();
        let names: Vec<&str> = c.costs.components().map(|c| c.name()).collect();
        assert_eq!(names, vec!["transaction", "holding", "leveraged"]);
    }

    #[test]
    fn era_parsing() {
        let eras = parse_eras("1990-1999:1.5, 2000-2009:0.8").unwrap();
        assert_eq!(eras.len(), 2);
        assert_eq!(eras[1].start_year, 2000);
        assert_eq!(eras[1].excess_pct, 0.8);
        assert!(parse_eras("").unwrap().is_empty());
        assert!(parse_eras("1990:1.5").unwrap_err().is_configuration());
        assert!(parse_eras("1990-1999").unwrap_err().is_configuration());

        let err = build_backtest_config(&with(&[
            ("leveraged", "symbols", "SSO"),
            ("leveraged", "eras", "1990-2000:1, 2000-2010:1"),
        ]))
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn metrics_section() {
        let c = build_backtest_config(&with(&[
            ("metrics", "risk_free_rate", "0.04"),
            ("metrics", "periods_per_year", "12"),
            ("metrics", "confidence", "0.99"),
        ]))
        .unwrap();
        assert_eq!(c.metrics.risk_free_rate, 0.04);
        assert_eq!(c.metrics.periods_per_year, 12.0);
        assert_eq!(c.metrics.confidence, 0.99);
    }
}
