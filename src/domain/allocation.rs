//! Discrete allocation: continuous target weights to whole-share trades.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use super::error::BacktestError;
use super::execution::TradeOrder;
use super::market_data::PriceMap;
use super::position::SHARE_EPSILON;
use super::strategy::{CASH_SYMBOL, TargetWeights};
use super::transaction::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShareMode {
    #[default]
    Whole,
    Fractional,
}

/// One symbol's share of the allocation problem.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationTarget {
    pub symbol: String,
    pub price: f64,
    pub target_value: f64,
}

/// Minimise Σ (target_value − shares·price)² subject to Σ shares·price ≤ capital.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationProblem {
    pub capital: f64,
    pub targets: Vec<AllocationTarget>,
}

impl AllocationProblem {
    pub fn objective(&self, shares: &[f64]) -> f64 {
        self.targets
            .iter()
            .zip(shares)
            .map(|(t, n)| (t.target_value - n * t.price).powi(2))
            .sum()
    }

    pub fn spend(&self, shares: &[f64]) -> f64 {
        self.targets.iter().zip(shares).map(|(t, n)| n * t.price).sum()
    }
}

/// Pluggable integer-program solver. `None` means "no answer", and the
/// allocator falls back to the greedy algorithm.
pub trait IntegerAllocationSolver: Debug + Send + Sync {
    fn solve(&self, problem: &AllocationProblem) -> Option<Vec<f64>>;
}

/// Exact branch-and-bound over `[floor(x) − radius, ceil(x)]` shares per
/// symbol, where `x` is the continuous share count. Gives up when the search
/// space exceeds `max_nodes`.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborhoodSearchSolver {
    pub radius: u32,
    pub max_nodes: u64,
}

impl Default for NeighborhoodSearchSolver {
    fn default() -> Self {
        NeighborhoodSearchSolver {
            radius: 2,
            max_nodes: 1_000_000,
        }
    }
}

struct Search<'a> {
    problem: &'a AllocationProblem,
    ranges: Vec<(f64, f64)>,
    /// Best achievable squared deviation for symbols `i..`, ignoring the budget.
    tail_bound: Vec<f64>,
    /// Cheapest spend for symbols `i..`.
    tail_min_spend: Vec<f64>,
    current: Vec<f64>,
    best: Option<(f64, Vec<f64>)>,
}

impl Search<'_> {
    fn descend(&mut self, i: usize, spent: f64, deviation: f64) {
        if let Some((best, _)) = &self.best {
            if deviation + self.tail_bound[i] >= *best {
                return;
            }
        }
        if spent + self.tail_min_spend[i] > self.problem.capital + 1e-9 {
            return;
        }
        if i == self.ranges.len() {
            self.best = Some((deviation, self.current.clone()));
            return;
        }

        let problem = self.problem;
        let target = &problem.targets[i];
        let (lo, hi) = self.ranges[i];
        // Try the share counts closest to the continuous optimum first.
        let mut candidates: Vec<f64> = (lo as u64..=hi as u64).map(|n| n as f64).collect();
        candidates.sort_by(|a, b| {
            let da = (target.target_value - a * target.price).abs();
            let db = (target.target_value - b * target.price).abs();
            da.total_cmp(&db)
        });

        for n in candidates {
            let d = (target.target_value - n * target.price).powi(2);
            self.current[i] = n;
            self.descend(i + 1, spent + n * target.price, deviation + d);
        }
        self.current[i] = 0.0;
    }
}

impl IntegerAllocationSolver for NeighborhoodSearchSolver {
    fn solve(&self, problem: &AllocationProblem) -> Option<Vec<f64>> {
        let mut ranges = Vec::with_capacity(problem.targets.len());
        let mut nodes: u64 = 1;
        for t in &problem.targets {
            let x = (t.target_value / t.price).max(0.0);
            let lo = (x.floor() - f64::from(self.radius)).max(0.0);
            let hi = x.ceil();
            nodes = nodes.saturating_mul((hi - lo) as u64 + 1);
            if nodes > self.max_nodes {
                tracing::debug!(nodes, limit = self.max_nodes, "allocation search space too large");
                return None;
            }
            ranges.push((lo, hi));
        }

        let n = ranges.len();
        let mut tail_bound = vec![0.0; n + 1];
        let mut tail_min_spend = vec![0.0; n + 1];
        for i in (0..n).rev() {
            let t = &problem.targets[i];
            let (lo, hi) = ranges[i];
            let best_here = (lo as u64..=hi as u64)
                .map(|k| (t.target_value - k as f64 * t.price).powi(2))
                .fold(f64::INFINITY, f64::min);
            tail_bound[i] = tail_bound[i + 1] + best_here;
            tail_min_spend[i] = tail_min_spend[i + 1] + lo * t.price;
        }

        let mut search = Search {
            problem,
            ranges,
            tail_bound,
            tail_min_spend,
            current: vec![0.0; n],
            best: None,
        };
        search.descend(0, 0.0, 0.0);
        search.best.map(|(_, shares)| shares)
    }
}

#[derive(Debug, Clone, Default)]
pub enum AllocationMethod {
    #[default]
    Greedy,
    /// Solver-backed allocation; `None` behaves like `Greedy`.
    Optimal(Option<Arc<dyn IntegerAllocationSolver>>),
}

/// Output of one allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteAllocation {
    pub target_shares: BTreeMap<String, f64>,
    /// Sells first, then buys; each group in symbol order.
    pub trades: Vec<TradeOrder>,
    pub leftover_cash: f64,
    /// Root-sum-of-squares of (target − realised) weight, in percentage points.
    pub tracking_error: f64,
    pub realized_weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct DiscreteAllocator {
    pub method: AllocationMethod,
    pub share_mode: ShareMode,
}

impl DiscreteAllocator {
    pub fn greedy() -> Self {
        DiscreteAllocator::default()
    }

    pub fn optimal(solver: Option<Arc<dyn IntegerAllocationSolver>>) -> Self {
        DiscreteAllocator {
            method: AllocationMethod::Optimal(solver),
            share_mode: ShareMode::Whole,
        }
    }

    pub fn with_share_mode(mut self, share_mode: ShareMode) -> Self {
        self.share_mode = share_mode;
        self
    }

    /// Convert `targets` (percent of `capital`) into share counts and the
    /// trades that move `holdings` there. Held symbols without a target are
    /// sold in full.
    pub fn allocate(
        &self,
        targets: &TargetWeights,
        prices: &PriceMap,
        holdings: &BTreeMap<String, f64>,
        capital: f64,
    ) -> Result<DiscreteAllocation, BacktestError> {
        if !capital.is_finite() || capital <= 0.0 {
            return Err(BacktestError::invalid_allocation(format!(
                "cannot allocate non-positive capital {capital:.2}"
            )));
        }

        let problem = build_problem(targets, prices, capital)?;

        let shares = match self.share_mode {
            ShareMode::Fractional => problem
                .targets
                .iter()
                .map(|t| t.target_value / t.price)
                .collect(),
            ShareMode::Whole => match &self.method {
                AllocationMethod::Greedy | AllocationMethod::Optimal(None) => greedy(&problem),
                AllocationMethod::Optimal(Some(solver)) => match solver.solve(&problem) {
                    Some(shares) if is_feasible(&problem, &shares) => shares,
                    _ => {
                        tracing::debug!("solver gave no feasible allocation, using greedy");
                        greedy(&problem)
                    }
                },
            },
        };

        let mut target_shares: BTreeMap<String, f64> = problem
            .targets
            .iter()
            .zip(&shares)
            .map(|(t, &n)| (t.symbol.clone(), n))
            .collect();
        for symbol in holdings.keys() {
            target_shares.entry(symbol.clone()).or_insert(0.0);
        }

        let leftover_cash = (capital - problem.spend(&shares)).max(0.0);

        let mut realized_weights = BTreeMap::new();
        let mut squared = 0.0;
        for (symbol, &n) in &target_shares {
            let price = price_for(prices, symbol)?;
            let realized = n * price / capital * 100.0;
            let target = problem
                .targets
                .iter()
                .find(|t| &t.symbol == symbol)
                .map(|t| t.target_value / capital * 100.0)
                .unwrap_or(0.0);
            squared += (target - realized).powi(2);
            realized_weights.insert(symbol.clone(), realized);
        }

        let trades = build_trades(&target_shares, holdings, prices)?;

        Ok(DiscreteAllocation {
            target_shares,
            trades,
            leftover_cash,
            tracking_error: squared.sqrt(),
            realized_weights,
        })
    }
}

fn price_for(prices: &PriceMap, symbol: &str) -> Result<f64, BacktestError> {
    match prices.get(symbol) {
        Some(&p) if p.is_finite() && p > 0.0 => Ok(p),
        Some(&p) => Err(BacktestError::data(symbol, format!("invalid price {p}"))),
        None => Err(BacktestError::data(symbol, "no price available")),
    }
}

fn build_problem(
    targets: &TargetWeights,
    prices: &PriceMap,
    capital: f64,
) -> Result<AllocationProblem, BacktestError> {
    let invested: f64 = targets
        .iter()
        .filter(|(symbol, _)| symbol.as_str() != CASH_SYMBOL)
        .map(|(_, w)| *w)
        .sum();
    // Tolerated over-allocation is scaled back to exactly 100%.
    let scale = if invested > 100.0 { 100.0 / invested } else { 1.0 };

    let mut problem = AllocationProblem {
        capital,
        targets: Vec::with_capacity(targets.len()),
    };
    for (symbol, &weight) in targets {
        if symbol == CASH_SYMBOL {
            continue;
        }
        if !weight.is_finite() || weight < 0.0 {
            return Err(BacktestError::invalid_allocation(format!(
                "weight {weight} for {symbol} is not a non-negative number"
            )));
        }
        let price = prices.get(symbol).copied().ok_or_else(|| {
            BacktestError::invalid_allocation(format!("no price for target symbol {symbol}"))
        })?;
        if !price.is_finite() || price <= 0.0 {
            return Err(BacktestError::data(symbol, format!("invalid price {price}")));
        }
        problem.targets.push(AllocationTarget {
            symbol: symbol.clone(),
            price,
            target_value: capital * weight * scale / 100.0,
        });
    }
    Ok(problem)
}

/// Floor every target, then hand out single shares to whichever symbol is
/// furthest below target, as long as the share is affordable and reduces
/// that symbol's squared deviation. Ties resolve in symbol order.
fn greedy(problem: &AllocationProblem) -> Vec<f64> {
    let mut shares: Vec<f64> = problem
        .targets
        .iter()
        .map(|t| (t.target_value / t.price).floor().max(0.0))
        .collect();
    let mut remaining = problem.capital - problem.spend(&shares);

    loop {
        let mut best: Option<(usize, f64)> = None;
        for (i, t) in problem.targets.iter().enumerate() {
            if t.price > remaining + 1e-9 {
                continue;
            }
            let deficit = t.target_value - shares[i] * t.price;
            if deficit <= t.price / 2.0 {
                continue;
            }
            if best.is_none_or(|(_, d)| deficit > d) {
                best = Some((i, deficit));
            }
        }
        match best {
            Some((i, _)) => {
                shares[i] += 1.0;
                remaining -= problem.targets[i].price;
            }
            None => break,
        }
    }
    shares
}

fn is_feasible(problem: &AllocationProblem, shares: &[f64]) -> bool {
    shares.len() == problem.targets.len()
        && shares.iter().all(|n| n.is_finite() && *n >= 0.0)
        && problem.spend(shares) <= problem.capital + 1e-9
}

fn build_trades(
    target_shares: &BTreeMap<String, f64>,
    holdings: &BTreeMap<String, f64>,
    prices: &PriceMap,
) -> Result<Vec<TradeOrder>, BacktestError> {
    let mut sells = Vec::new();
    let mut buys = Vec::new();
    for (symbol, &target) in target_shares {
        let held = holdings.get(symbol).copied().unwrap_or(0.0);
        let delta = target - held;
        if delta.abs() < SHARE_EPSILON {
            continue;
        }
        let order = TradeOrder {
            symbol: symbol.clone(),
            side: if delta > 0.0 { Side::Buy } else { Side::Sell },
            shares: delta.abs(),
            price: price_for(prices, symbol)?,
        };
        if delta > 0.0 {
            buys.push(order);
        } else {
            sells.push(order);
        }
    }
    sells.extend(buys);
    Ok(sells)
}
