//! Immutable trade records.

use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub id: u64,
    pub date: NaiveDate,
    pub symbol: String,
    pub side: Side,
    /// Always positive; direction comes from `side`.
    pub shares: f64,
    pub price: f64,
    pub cost: f64,
}

impl Transaction {
    pub fn notional(&self) -> f64 {
        self.shares * self.price
    }

    pub fn signed_shares(&self) -> f64 {
        self.side.sign() * self.shares
    }

    /// Change in cash caused by this transaction, costs included.
    pub fn cash_delta(&self) -> f64 {
        -self.side.sign() * self.notional() - self.cost
    }
}

/// A holding-period cost deducted from cash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HoldingCharge {
    pub date: NaiveDate,
    pub symbol: String,
    pub component: &'static str,
    pub amount: f64,
}
