//! Position tracking with weighted-average cost basis.

use chrono::NaiveDate;
use serde::Serialize;

/// Share counts below this magnitude are treated as flat.
pub const SHARE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub symbol: String,
    pub shares: f64,
    pub avg_cost: f64,
    pub opened_at: NaiveDate,
    pub updated_at: NaiveDate,
}

impl Position {
    pub fn open(symbol: impl Into<String>, shares: f64, price: f64, date: NaiveDate) -> Self {
        Position {
            symbol: symbol.into(),
            shares,
            avg_cost: price,
            opened_at: date,
            updated_at: date,
        }
    }

    pub fn is_long(&self) -> bool {
        self.shares > SHARE_EPSILON
    }

    pub fn is_short(&self) -> bool {
        self.shares < -SHARE_EPSILON
    }

    pub fn is_flat(&self) -> bool {
        self.shares.abs() < SHARE_EPSILON
    }

    /// Signed value at `price`; shorts are negative.
    pub fn market_value(&self, price: f64) -> f64 {
        self.shares * price
    }

    pub fn cost_basis(&self) -> f64 {
        self.shares * self.avg_cost
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.shares * (price - self.avg_cost)
    }

    /// Apply a signed share change at `price`.
    ///
    /// Growing the position's magnitude re-weights the average cost; shrinking
    /// it leaves the cost untouched. Crossing through zero opens the remainder
    /// at `price`.
    pub fn apply_fill(&mut self, delta: f64, price: f64, date: NaiveDate) {
        let before = self.shares;
        let after = before + delta;

        if before.abs() < SHARE_EPSILON || before.signum() == delta.signum() {
            let total = before.abs() + delta.abs();
            if total > SHARE_EPSILON {
                self.avg_cost = (before.abs() * self.avg_cost + delta.abs() * price) / total;
            }
        } else if after.abs() > SHARE_EPSILON && after.signum() != before.signum() {
            self.avg_cost = price;
        }

        self.shares = if after.abs() < SHARE_EPSILON { 0.0 } else { after };
        self.updated_at = date;
    }
}
