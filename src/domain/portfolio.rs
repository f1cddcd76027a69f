//! Portfolio state, valuation and the transaction audit trail.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use super::error::BacktestError;
use super::market_data::PriceMap;
use super::position::Position;
use super::transaction::{HoldingCharge, Transaction};

/// Cash shortfalls smaller than this are floating-point noise and clamp to zero.
pub const CASH_EPSILON: f64 = 1e-6;

/// One point of the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValuationPoint {
    pub date: NaiveDate,
    pub total_value: f64,
    pub cash: f64,
    pub positions: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: BTreeMap<String, Position>,
    pub transactions: Vec<Transaction>,
    pub holding_charges: Vec<HoldingCharge>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            transactions: Vec::new(),
            holding_charges: Vec::new(),
        }
    }

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn shares_of(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map(|p| p.shares).unwrap_or(0.0)
    }

    /// Current share counts keyed by symbol.
    pub fn holdings(&self) -> BTreeMap<String, f64> {
        self.positions
            .iter()
            .map(|(symbol, pos)| (symbol.clone(), pos.shares))
            .collect()
    }

    fn position_values(&self, prices: &PriceMap) -> Result<BTreeMap<String, f64>, BacktestError> {
        self.positions
            .values()
            .map(|pos| {
                prices
                    .get(&pos.symbol)
                    .map(|&price| (pos.symbol.clone(), pos.market_value(price)))
                    .ok_or_else(|| BacktestError::data(&pos.symbol, "no price for held position"))
            })
            .collect()
    }

    /// `cash + Σ shares × price`. Fails if a held symbol has no price.
    pub fn total_value(&self, prices: &PriceMap) -> Result<f64, BacktestError> {
        let positions: f64 = self.position_values(prices)?.values().sum();
        Ok(self.cash + positions)
    }

    pub fn valuation(&self, date: NaiveDate, prices: &PriceMap) -> Result<ValuationPoint, BacktestError> {
        let positions = self.position_values(prices)?;
        let total_value = self.cash + positions.values().sum::<f64>();
        Ok(ValuationPoint {
            date,
            total_value,
            cash: self.cash,
            positions,
        })
    }

    /// Current weights in percent of total value.
    pub fn weights(&self, prices: &PriceMap) -> Result<BTreeMap<String, f64>, BacktestError> {
        let values = self.position_values(prices)?;
        let total = self.cash + values.values().sum::<f64>();
        if total <= 0.0 {
            return Ok(BTreeMap::new());
        }
        Ok(values
            .into_iter()
            .map(|(symbol, value)| (symbol, value / total * 100.0))
            .collect())
    }

    pub(crate) fn next_transaction_id(&self) -> u64 {
        self.transactions.last().map(|t| t.id + 1).unwrap_or(1)
    }

    /// Append a transaction and apply it to cash and positions.
    pub(crate) fn record_transaction(&mut self, transaction: Transaction) {
        self.cash += transaction.cash_delta();
        if self.cash < 0.0 && self.cash > -CASH_EPSILON {
            self.cash = 0.0;
        }

        let delta = transaction.signed_shares();
        let flat = {
            let position = self
                .positions
                .entry(transaction.symbol.clone())
                .or_insert_with(|| {
                    Position::open(&transaction.symbol, 0.0, transaction.price, transaction.date)
                });
            position.apply_fill(delta, transaction.price, transaction.date);
            position.is_flat()
        };
        if flat {
            self.positions.remove(&transaction.symbol);
        }

        self.transactions.push(transaction);
    }

    /// Deduct a holding-period cost, capped at available cash. Returns the unpaid remainder.
    pub(crate) fn charge_holding_cost(&mut self, charge: HoldingCharge) -> f64 {
        let paid = charge.amount.min(self.cash).max(0.0);
        let unpaid = charge.amount - paid;
        self.cash -= paid;
        if paid > 0.0 {
            self.holding_charges.push(HoldingCharge {
                amount: paid,
                ..charge
            });
        }
        unpaid
    }

    /// Rebuild portfolio state from the audit trail.
    pub fn replay(
        initial_capital: f64,
        transactions: &[Transaction],
        holding_charges: &[HoldingCharge],
    ) -> Self {
        let mut portfolio = Portfolio::new(initial_capital);
        let mut charges = holding_charges.iter().peekable();

        for transaction in transactions {
            // Holding costs for a date are charged before that date's trades.
            while let Some(charge) = charges.next_if(|c| c.date <= transaction.date) {
                portfolio.cash -= charge.amount;
                portfolio.holding_charges.push(charge.clone());
            }
            portfolio.record_transaction(transaction.clone());
        }
        for charge in charges {
            portfolio.cash -= charge.amount;
            portfolio.holding_charges.push(charge.clone());
        }
        portfolio
    }
}
