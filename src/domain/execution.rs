//! Trade execution against the portfolio.
//!
//! A rebalance batch is validated as a whole before anything is mutated, so a
//! failed batch leaves the portfolio exactly as it was.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::cost::{CostModel, TradeCostInput};
use super::error::BacktestError;
use super::portfolio::{CASH_EPSILON, Portfolio};
use super::position::SHARE_EPSILON;
use super::transaction::{Side, Transaction};

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    pub slippage_pct: f64,
    pub allow_shorting: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            slippage_pct: 0.0,
            allow_shorting: false,
        }
    }
}

/// A desired trade at the day's market price.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeOrder {
    pub symbol: String,
    pub side: Side,
    pub shares: f64,
    pub price: f64,
}

/// Buys fill above market, sells below.
/// Buy: market_price * (1 + slippage_pct / 100)
/// Sell: market_price * (1 - slippage_pct / 100)
pub fn apply_slippage(market_price: f64, side: Side, slippage_pct: f64) -> f64 {
    market_price * (1.0 + side.sign() * slippage_pct / 100.0)
}

/// Cash a batch would consume: buy notional plus all costs, less sell
/// proceeds, at slipped fill prices. Negative when the batch frees cash.
pub fn net_cash_required(
    orders: &[TradeOrder],
    costs: &CostModel,
    date: NaiveDate,
    config: &ExecutionConfig,
) -> f64 {
    orders
        .iter()
        .map(|order| {
            let fill_price = apply_slippage(order.price, order.side, config.slippage_pct);
            let notional = order.shares * fill_price;
            let cost = costs.trade_cost(&TradeCostInput {
                symbol: &order.symbol,
                notional,
                date,
            });
            order.side.sign() * notional + cost
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub transaction_ids: Vec<u64>,
    pub total_cost: f64,
    pub cash_before: f64,
    pub cash_after: f64,
}

struct PricedOrder<'a> {
    order: &'a TradeOrder,
    fill_price: f64,
    cost: f64,
}

/// Execute a rebalance batch atomically.
///
/// Steps:
/// 1. Reject orders with non-positive or non-finite shares/prices
/// 2. Price every order (slippage, then cost model on fill notional)
/// 3. Check net sells per symbol against held shares (unless shorting)
/// 4. Check cash + sell proceeds covers buys plus all costs
/// 5. Only then record transactions (sells first), update cash and positions
pub fn execute_batch(
    portfolio: &mut Portfolio,
    orders: &[TradeOrder],
    costs: &CostModel,
    date: NaiveDate,
    config: &ExecutionConfig,
) -> Result<ExecutionReport, BacktestError> {
    let cash_before = portfolio.cash;

    let mut priced = Vec::with_capacity(orders.len());
    for order in orders {
        if !order.shares.is_finite() || order.shares <= 0.0 {
            return Err(BacktestError::invalid_allocation(format!(
                "order for {} has invalid share count {}",
                order.symbol, order.shares
            )));
        }
        if !order.price.is_finite() || order.price <= 0.0 {
            return Err(BacktestError::data(
                &order.symbol,
                format!("invalid execution price {}", order.price),
            ));
        }
        let fill_price = apply_slippage(order.price, order.side, config.slippage_pct);
        let cost = costs.trade_cost(&TradeCostInput {
            symbol: &order.symbol,
            notional: order.shares * fill_price,
            date,
        });
        priced.push(PricedOrder {
            order,
            fill_price,
            cost,
        });
    }

    if !config.allow_shorting {
        let mut net_sells: BTreeMap<&str, f64> = BTreeMap::new();
        for p in &priced {
            *net_sells.entry(p.order.symbol.as_str()).or_insert(0.0) -=
                p.order.side.sign() * p.order.shares;
        }
        for (symbol, sold) in net_sells {
            let held = portfolio.shares_of(symbol);
            if sold > held + SHARE_EPSILON {
                return Err(BacktestError::InsufficientShares {
                    symbol: symbol.to_string(),
                    requested: sold,
                    held,
                });
            }
        }
    }

    let total_cost: f64 = priced.iter().map(|p| p.cost).sum();
    let buys: f64 = priced
        .iter()
        .filter(|p| p.order.side == Side::Buy)
        .map(|p| p.order.shares * p.fill_price)
        .sum();
    let proceeds: f64 = priced
        .iter()
        .filter(|p| p.order.side == Side::Sell)
        .map(|p| p.order.shares * p.fill_price)
        .sum();
    let available = portfolio.cash + proceeds;
    let required = buys + total_cost;
    if available - required < -CASH_EPSILON {
        return Err(BacktestError::InsufficientFunds {
            required,
            available,
        });
    }

    // Sells settle first so cash never dips below zero mid-batch.
    priced.sort_by_key(|p| p.order.side == Side::Buy);

    let mut transaction_ids = Vec::with_capacity(priced.len());
    for p in priced {
        let id = portfolio.next_transaction_id();
        portfolio.record_transaction(Transaction {
            id,
            date,
            symbol: p.order.symbol.clone(),
            side: p.order.side,
            shares: p.order.shares,
            price: p.fill_price,
            cost: p.cost,
        });
        transaction_ids.push(id);
    }
    if portfolio.cash < 0.0 {
        portfolio.cash = 0.0;
    }

    Ok(ExecutionReport {
        transaction_ids,
        total_cost,
        cash_before,
        cash_after: portfolio.cash,
    })
}
