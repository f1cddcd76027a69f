//! Composable trading and holding cost model.
//!
//! Each [`CostComponent`] is a pure policy; [`CostModel`] sums whatever
//! components are configured. Rates are in percent, matching the config file.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

use super::error::BacktestError;

const DAYS_PER_YEAR: f64 = 365.0;

/// A single executed (or proposed) trade being priced.
#[derive(Debug, Clone, Copy)]
pub struct TradeCostInput<'a> {
    pub symbol: &'a str,
    pub notional: f64,
    pub date: NaiveDate,
}

/// A position held for `days` calendar days ending on `date`.
#[derive(Debug, Clone, Copy)]
pub struct HoldingCostInput<'a> {
    pub symbol: &'a str,
    pub value: f64,
    pub days: f64,
    pub date: NaiveDate,
}

pub trait CostComponent: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn trade_cost(&self, _trade: &TradeCostInput<'_>) -> f64 {
        0.0
    }

    fn holding_cost(&self, _holding: &HoldingCostInput<'_>) -> f64 {
        0.0
    }
}

fn require_rate(section: &str, key: &str, value: f64) -> Result<(), BacktestError> {
    if !value.is_finite() || value < 0.0 {
        return Err(BacktestError::config_invalid(
            section,
            key,
            format!("{key} must be a non-negative number, got {value}"),
        ));
    }
    Ok(())
}

/// Commission plus an optional square-root market-impact term.
///
/// cost = per_trade + |notional| * pct / 100 + impact_coefficient * sqrt(|notional|)
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionCost {
    per_trade: f64,
    pct: f64,
    impact_coefficient: f64,
}

impl TransactionCost {
    pub fn new(per_trade: f64, pct: f64, impact_coefficient: f64) -> Result<Self, BacktestError> {
        require_rate("costs", "commission_per_trade", per_trade)?;
        require_rate("costs", "commission_pct", pct)?;
        require_rate("costs", "impact_coefficient", impact_coefficient)?;
        Ok(TransactionCost {
            per_trade,
            pct,
            impact_coefficient,
        })
    }
}

impl CostComponent for TransactionCost {
    fn name(&self) -> &'static str {
        "transaction"
    }

    fn trade_cost(&self, trade: &TradeCostInput<'_>) -> f64 {
        let notional = trade.notional.abs();
        if notional == 0.0 {
            return 0.0;
        }
        self.per_trade + notional * self.pct / 100.0 + self.impact_coefficient * notional.sqrt()
    }
}

/// Custody/maintenance fee on time-weighted position value.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingCost {
    annual_pct: f64,
}

impl HoldingCost {
    pub fn new(annual_pct: f64) -> Result<Self, BacktestError> {
        require_rate("costs", "holding_annual_pct", annual_pct)?;
        Ok(HoldingCost { annual_pct })
    }
}

impl CostComponent for HoldingCost {
    fn name(&self) -> &'static str {
        "holding"
    }

    fn holding_cost(&self, holding: &HoldingCostInput<'_>) -> f64 {
        holding.value.abs() * self.annual_pct / 100.0 * holding.days / DAYS_PER_YEAR
    }
}

/// Inclusive calendar-year bracket with its excess cost rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EraBracket {
    pub start_year: i32,
    pub end_year: i32,
    pub excess_pct: f64,
}

/// Excess financing cost by calendar year for leveraged instruments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EraCostTable {
    brackets: Vec<EraBracket>,
    default_excess_pct: f64,
}

impl EraCostTable {
    pub fn new(mut brackets: Vec<EraBracket>, default_excess_pct: f64) -> Result<Self, BacktestError> {
        require_rate("leveraged", "default_excess_pct", default_excess_pct)?;
        for b in &brackets {
            require_rate("leveraged", "eras", b.excess_pct)?;
            if b.end_year < b.start_year {
                return Err(BacktestError::config_invalid(
                    "leveraged",
                    "eras",
                    format!("bracket {}-{} ends before it starts", b.start_year, b.end_year),
                ));
            }
        }
        brackets.sort_by_key(|b| b.start_year);
        for pair in brackets.windows(2) {
            if pair[1].start_year <= pair[0].end_year {
                return Err(BacktestError::config_invalid(
                    "leveraged",
                    "eras",
                    format!(
                        "brackets {}-{} and {}-{} overlap",
                        pair[0].start_year, pair[0].end_year, pair[1].start_year, pair[1].end_year
                    ),
                ));
            }
        }
        Ok(EraCostTable {
            brackets,
            default_excess_pct,
        })
    }

    pub fn excess_pct(&self, year: i32) -> f64 {
        self.brackets
            .iter()
            .find(|b| b.start_year <= year && year <= b.end_year)
            .map(|b| b.excess_pct)
            .unwrap_or(self.default_excess_pct)
    }
}

/// Expense ratio plus era-specific excess cost, charged on listed leveraged holdings only.
#[derive(Debug, Clone, PartialEq)]
pub struct LeveragedInstrumentCost {
    symbols: BTreeSet<String>,
    base_expense_pct: f64,
    eras: EraCostTable,
}

impl LeveragedInstrumentCost {
    pub fn new(
        symbols: impl IntoIterator<Item = String>,
        base_expense_pct: f64,
        eras: EraCostTable,
    ) -> Result<Self, BacktestError> {
        require_rate("leveraged", "base_expense_pct", base_expense_pct)?;
        Ok(LeveragedInstrumentCost {
            symbols: symbols.into_iter().collect(),
            base_expense_pct,
            eras,
        })
    }

    pub fn applies_to(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    /// Total annual rate in percent for `date`.
    pub fn annual_pct(&self, date: NaiveDate) -> f64 {
        self.base_expense_pct + self.eras.excess_pct(date.year())
    }
}

impl CostComponent for LeveragedInstrumentCost {
    fn name(&self) -> &'static str {
        "leveraged"
    }

    fn holding_cost(&self, holding: &HoldingCostInput<'_>) -> f64 {
        if !self.applies_to(holding.symbol) {
            return 0.0;
        }
        holding.value.abs() * self.annual_pct(holding.date) / 100.0 * holding.days / DAYS_PER_YEAR
    }
}

/// Additive set of cost components.
#[derive(Debug, Clone, Default)]
pub struct CostModel {
    components: Vec<Arc<dyn CostComponent>>,
}

impl CostModel {
    /// A model that never charges anything.
    pub fn zero() -> Self {
        CostModel::default()
    }

    pub fn with(mut self, component: impl CostComponent + 'static) -> Self {
        self.components.push(Arc::new(component));
        self
    }

    pub fn components(&self) -> impl Iterator<Item = &dyn CostComponent> {
        self.components.iter().map(|c| c.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn trade_cost(&self, trade: &TradeCostInput<'_>) -> f64 {
        self.components.iter().map(|c| c.trade_cost(trade)).sum()
    }

    /// Per-component holding costs, skipping zero contributions.
    pub fn holding_costs(&self, holding: &HoldingCostInput<'_>) -> Vec<(&'static str, f64)> {
        self.components
            .iter()
            .map(|c| (c.name(), c.holding_cost(holding)))
            .filter(|(_, cost)| *cost > 0.0)
            .collect()
    }

    pub fn holding_cost(&self, holding: &HoldingCostInput<'_>) -> f64 {
        self.holding_costs(holding).iter().map(|(_, cost)| cost).sum()
    }
}
