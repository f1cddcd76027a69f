//! Backtest engine and event loop.
//!
//! One run walks the market timeline in date order. Each step, in order:
//! resolve prices, charge holding costs for the elapsed days, rebalance if
//! due, then record the valuation. Recoverable failures skip the rebalance
//! and leave a [`Warning`]; the skipped rebalance stays due on the following
//! steps. In strict mode recoverable failures abort the run instead.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::allocation::DiscreteAllocator;
use super::causality::{CausalityWindowProvider, Lookback, WindowOutcome};
use super::cost::{CostModel, HoldingCostInput};
use super::error::BacktestError;
use super::execution::{ExecutionConfig, execute_batch, net_cash_required};
use super::market_data::{MarketData, PriceMap};
use super::metrics::{MetricsConfig, RiskMetrics};
use super::portfolio::{CASH_EPSILON, Portfolio, ValuationPoint};
use super::schedule::{RebalancePolicy, RebalanceScheduler};
use super::strategy::{AllocationDecision, AllocationRequest, AllocationStrategy, CASH_SYMBOL, TargetWeights};
use super::transaction::{HoldingCharge, Side, Transaction};

/// Re-allocation attempts when trades plus costs overshoot available cash.
const MAX_FIT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub rebalance: RebalancePolicy,
    pub lookback: Option<Lookback>,
    pub min_history: usize,
    pub allocator: DiscreteAllocator,
    pub costs: CostModel,
    pub execution: ExecutionConfig,
    /// Allowed distance of the weight sum from 100, in percentage points.
    pub weight_tolerance_pct: f64,
    /// Share of total value kept out of the allocation, in percent.
    pub cash_buffer_pct: f64,
    pub strict: bool,
    pub validate_causality: bool,
    pub metrics: MetricsConfig,
    /// Wall-clock budget for one run.
    pub timeout: Option<Duration>,
}

impl BacktestConfig {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, initial_capital: f64) -> Self {
        BacktestConfig {
            start_date,
            end_date,
            initial_capital,
            rebalance: RebalancePolicy::default(),
            lookback: None,
            min_history: 1,
            allocator: DiscreteAllocator::default(),
            costs: CostModel::zero(),
            execution: ExecutionConfig::default(),
            weight_tolerance_pct: 1.0,
            cash_buffer_pct: 0.0,
            strict: false,
            validate_causality: true,
            metrics: MetricsConfig::default(),
            timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.start_date > self.end_date {
            return Err(BacktestError::config_invalid(
                "backtest",
                "end_date",
                format!("end_date {} is before start_date {}", self.end_date, self.start_date),
            ));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(BacktestError::config_invalid(
                "backtest",
                "initial_capital",
                "initial_capital must be positive",
            ));
        }
        if !self.weight_tolerance_pct.is_finite() || self.weight_tolerance_pct < 0.0 {
            return Err(BacktestError::config_invalid(
                "backtest",
                "weight_tolerance_pct",
                "weight_tolerance_pct must be a non-negative number",
            ));
        }
        if !(0.0..100.0).contains(&self.cash_buffer_pct) {
            return Err(BacktestError::config_invalid(
                "backtest",
                "cash_buffer_pct",
                "cash_buffer_pct must be in [0, 100)",
            ));
        }
        if !self.execution.slippage_pct.is_finite() || self.execution.slippage_pct < 0.0 {
            return Err(BacktestError::config_invalid(
                "backtest",
                "slippage_pct",
                "slippage_pct must be a non-negative number",
            ));
        }
        Ok(())
    }
}

/// Shared cancel flag plus an optional absolute deadline. Clones observe the
/// same flag, so one `cancel()` stops every run holding a clone.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn check(&self, run_deadline: Option<Instant>) -> Result<(), BacktestError> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(BacktestError::Cancelled {
                reason: "cancellation requested".into(),
            });
        }
        let now = Instant::now();
        if self.deadline.is_some_and(|d| now >= d) || run_deadline.is_some_and(|d| now >= d) {
            return Err(BacktestError::Cancelled {
                reason: "deadline exceeded".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WarningKind {
    InvalidAllocation,
    InsufficientFunds,
    InsufficientShares,
    InsufficientHistory,
    UnpaidHoldingCost,
}

impl WarningKind {
    fn from_error(err: &BacktestError) -> Option<Self> {
        match err {
            BacktestError::InvalidAllocation { .. } => Some(WarningKind::InvalidAllocation),
            BacktestError::InsufficientFunds { .. } => Some(WarningKind::InsufficientFunds),
            BacktestError::InsufficientShares { .. } => Some(WarningKind::InsufficientShares),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub date: NaiveDate,
    pub kind: WarningKind,
    pub message: String,
}

/// Summary of one executed rebalance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceRecord {
    pub date: NaiveDate,
    pub tracking_error: f64,
    pub leftover_cash: f64,
    pub trade_count: usize,
    pub total_cost: f64,
    /// Allocation passes needed to fit the cash budget.
    pub attempts: usize,
}

/// One row of the equity curve export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityCurveRecord {
    pub date: NaiveDate,
    pub total_value: f64,
    pub cash: f64,
    /// `SYMBOL=value` pairs separated by `;`.
    pub positions: String,
}

/// One row of the trade ledger export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRecord {
    pub id: u64,
    pub date: NaiveDate,
    pub symbol: String,
    pub side: Side,
    pub shares: f64,
    pub price: f64,
    pub cost: f64,
}

impl From<&Transaction> for LedgerRecord {
    fn from(t: &Transaction) -> Self {
        LedgerRecord {
            id: t.id,
            date: t.date,
            symbol: t.symbol.clone(),
            side: t.side,
            shares: t.shares,
            price: t.price,
            cost: t.cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub initial_capital: f64,
    pub valuations: Vec<ValuationPoint>,
    pub transactions: Vec<Transaction>,
    pub holding_charges: Vec<HoldingCharge>,
    pub rebalances: Vec<RebalanceRecord>,
    pub metrics: RiskMetrics,
    pub warnings: Vec<Warning>,
    pub final_portfolio: Portfolio,
}

impl BacktestResult {
    /// True when the run finished without recording a single warning.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn final_value(&self) -> f64 {
        self.valuations
            .last()
            .map(|p| p.total_value)
            .unwrap_or(self.initial_capital)
    }

    pub fn equity_curve_records(&self) -> Vec<EquityCurveRecord> {
        self.valuations
            .iter()
            .map(|p| EquityCurveRecord {
                date: p.date,
                total_value: p.total_value,
                cash: p.cash,
                positions: p
                    .positions
                    .iter()
                    .map(|(symbol, value)| format!("{symbol}={value:.2}"))
                    .collect::<Vec<_>>()
                    .join(";"),
            })
            .collect()
    }

    pub fn ledger_records(&self) -> Vec<LedgerRecord> {
        self.transactions.iter().map(LedgerRecord::from).collect()
    }
}

/// Check strategy output before it reaches the allocator.
///
/// Every weight must be finite and non-negative, every symbol other than
/// [`CASH_SYMBOL`] must be tracked and priced today, and the weights must sum
/// to 100 within `tolerance_pct`.
pub fn validate_weights(
    weights: &TargetWeights,
    data: &MarketData,
    prices: &PriceMap,
    tolerance_pct: f64,
) -> Result<(), BacktestError> {
    if weights.is_empty() {
        return Err(BacktestError::invalid_allocation("no target weights"));
    }
    for (symbol, &weight) in weights {
        if !weight.is_finite() || weight < 0.0 {
            return Err(BacktestError::invalid_allocation(format!(
                "weight {weight} for {symbol} is not a non-negative number"
            )));
        }
        if symbol == CASH_SYMBOL {
            continue;
        }
        if !data.contains(symbol) {
            return Err(BacktestError::invalid_allocation(format!(
                "{symbol} is not a tracked symbol"
            )));
        }
        if !prices.contains_key(symbol) {
            return Err(BacktestError::invalid_allocation(format!(
                "{symbol} has no price on this date"
            )));
        }
    }
    let sum: f64 = weights.values().sum();
    if (sum - 100.0).abs() > tolerance_pct {
        return Err(BacktestError::invalid_allocation(format!(
            "weights sum to {sum:.4}, expected 100 ± {tolerance_pct}"
        )));
    }
    Ok(())
}

pub fn run_backtest<S: AllocationStrategy>(
    data: &MarketData,
    strategy: &S,
    config: &BacktestConfig,
) -> Result<BacktestResult, BacktestError> {
    run_backtest_with_cancel(data, strategy, config, &CancellationToken::new())
}

pub fn run_backtest_with_cancel<S: AllocationStrategy>(
    data: &MarketData,
    strategy: &S,
    config: &BacktestConfig,
    cancel: &CancellationToken,
) -> Result<BacktestResult, BacktestError> {
    config.validate()?;
    let symbols = strategy.symbols();
    if let Some(missing) = symbols.iter().find(|s| !data.contains(s)) {
        return Err(BacktestError::data(missing, "strategy symbol has no price history"));
    }

    let timeline = data.timeline_between(config.start_date, config.end_date);
    let run_deadline = config.timeout.map(|t| Instant::now() + t);
    tracing::info!(
        strategy = strategy.name(),
        start = %config.start_date,
        end = %config.end_date,
        steps = timeline.len(),
        "backtest started"
    );

    let mut run = Run {
        data,
        config,
        provider: CausalityWindowProvider::new(data, config.min_history)
            .with_validation(config.validate_causality),
        symbols,
        portfolio: Portfolio::new(config.initial_capital),
        warnings: Vec::new(),
        rebalances: Vec::new(),
    };
    let mut scheduler = RebalanceScheduler::new(config.rebalance);
    let mut state = S::State::default();
    let mut valuations = Vec::with_capacity(timeline.len());
    let mut prev_date: Option<NaiveDate> = None;

    for (index, &date) in timeline.iter().enumerate() {
        if let Err(err) = cancel.check(run_deadline) {
            tracing::warn!(strategy = strategy.name(), %date, %err, "backtest stopped");
            return Err(err);
        }

        let prices = data.prices_on(date);
        if let Some(prev) = prev_date {
            run.charge_holding_costs(&prices, prev, date)?;
        }

        if scheduler.is_due(index, date, prev_date) {
            match run.rebalance(strategy, &mut state, date, &prices) {
                Ok(Step::Executed) | Ok(Step::Held) => scheduler.mark_rebalanced(index),
                Ok(Step::Deferred) => scheduler.defer(),
                Err(err) if err.is_recoverable() && !config.strict => {
                    scheduler.defer();
                    if let Some(kind) = WarningKind::from_error(&err) {
                        run.warn(date, kind, err.to_string());
                    }
                }
                Err(err) => {
                    tracing::error!(strategy = strategy.name(), %date, %err, "backtest aborted");
                    return Err(err);
                }
            }
        }

        valuations.push(run.portfolio.valuation(date, &prices)?);
        prev_date = Some(date);
    }

    let metrics = RiskMetrics::from_valuations(&valuations, &config.metrics);
    let Run {
        portfolio,
        warnings,
        rebalances,
        ..
    } = run;
    tracing::info!(
        strategy = strategy.name(),
        final_value = valuations.last().map(|p| p.total_value).unwrap_or(config.initial_capital),
        rebalances = rebalances.len(),
        warnings = warnings.len(),
        "backtest finished"
    );

    Ok(BacktestResult {
        strategy: strategy.name().to_string(),
        initial_capital: config.initial_capital,
        valuations,
        transactions: portfolio.transactions.clone(),
        holding_charges: portfolio.holding_charges.clone(),
        rebalances,
        metrics,
        warnings,
        final_portfolio: portfolio,
    })
}

enum Step {
    Executed,
    Held,
    Deferred,
}

/// Mutable state of a single run.
struct Run<'a> {
    data: &'a MarketData,
    config: &'a BacktestConfig,
    provider: CausalityWindowProvider<'a>,
    symbols: Vec<String>,
    portfolio: Portfolio,
    warnings: Vec<Warning>,
    rebalances: Vec<RebalanceRecord>,
}

impl Run<'_> {
    fn warn(&mut self, date: NaiveDate, kind: WarningKind, message: String) {
        tracing::warn!(%date, ?kind, %message, "simulation warning");
        self.warnings.push(Warning {
            date,
            kind,
            message,
        });
    }

    fn charge_holding_costs(
        &mut self,
        prices: &PriceMap,
        prev: NaiveDate,
        date: NaiveDate,
    ) -> Result<(), BacktestError> {
        if self.config.costs.is_empty() || self.portfolio.positions.is_empty() {
            return Ok(());
        }
        let days = (date - prev).num_days() as f64;
        let holdings = self.portfolio.holdings();

        for (symbol, shares) in holdings {
            let price = prices
                .get(&symbol)
                .copied()
                .ok_or_else(|| BacktestError::data(&symbol, "no price for held position"))?;
            let input = HoldingCostInput {
                symbol: &symbol,
                value: shares * price,
                days,
                date,
            };
            for (component, amount) in self.config.costs.holding_costs(&input) {
                let unpaid = self.portfolio.charge_holding_cost(HoldingCharge {
                    date,
                    symbol: symbol.clone(),
                    component,
                    amount,
                });
                if unpaid > CASH_EPSILON {
                    self.warn(
                        date,
                        WarningKind::UnpaidHoldingCost,
                        format!("{component} cost on {symbol} short by {unpaid:.2}"),
                    );
                }
            }
        }
        Ok(())
    }

    fn rebalance<S: AllocationStrategy>(
        &mut self,
        strategy: &S,
        state: &mut S::State,
        date: NaiveDate,
        prices: &PriceMap,
    ) -> Result<Step, BacktestError> {
        let window = match self.provider.window(&self.symbols, date, self.config.lookback)? {
            WindowOutcome::Ready(window) => window,
            WindowOutcome::InsufficientHistory {
                symbol,
                available,
                required,
            } => {
                self.warn(
                    date,
                    WarningKind::InsufficientHistory,
                    format!("{symbol} has {available} records, {required} required"),
                );
                return Ok(Step::Deferred);
            }
        };

        let request = AllocationRequest {
            as_of: date,
            history: &window,
            portfolio: &self.portfolio,
            prices,
        };
        let weights = match strategy.compute_target_allocation(&request, state)? {
            AllocationDecision::Hold => return Ok(Step::Held),
            AllocationDecision::Rebalance(weights) => weights,
        };
        validate_weights(&weights, self.data, prices, self.config.weight_tolerance_pct)?;

        let total_value = self.portfolio.total_value(prices)?;
        let mut capital = total_value * (1.0 - self.config.cash_buffer_pct / 100.0);
        let holdings = self.portfolio.holdings();

        let mut attempts = 0;
        let allocation = loop {
            attempts += 1;
            let allocation = self
                .config
                .allocator
                .allocate(&weights, prices, &holdings, capital)?;
            let need = net_cash_required(
                &allocation.trades,
                &self.config.costs,
                date,
                &self.config.execution,
            );
            let shortfall = need - self.portfolio.cash;
            if shortfall <= CASH_EPSILON || attempts == MAX_FIT_ATTEMPTS || capital - shortfall <= 0.0 {
                break allocation;
            }
            tracing::debug!(%date, attempts, shortfall, "allocation over budget, shrinking capital");
            capital -= shortfall;
        };

        let report = execute_batch(
            &mut self.portfolio,
            &allocation.trades,
            &self.config.costs,
            date,
            &self.config.execution,
        )?;
        tracing::debug!(
            %date,
            trades = report.transaction_ids.len(),
            cost = report.total_cost,
            tracking_error = allocation.tracking_error,
            "rebalanced"
        );
        self.rebalances.push(RebalanceRecord {
            date,
            tracking_error: allocation.tracking_error,
            leftover_cash: allocation.leftover_cash,
            trade_count: report.transaction_ids.len(),
            total_cost: report.total_cost,
            attempts,
        });
        Ok(Step::Executed)
    }
}
