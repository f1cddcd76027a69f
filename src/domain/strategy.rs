//! Allocation strategies.
//!
//! A strategy is an immutable value. Anything it needs to remember between
//! rebalances lives in its associated `State`, which the simulation loop owns
//! and threads through every call, so one strategy value can drive many
//! concurrent runs.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::causality::HistoryWindow;
use super::error::BacktestError;
use super::market_data::PriceMap;
use super::portfolio::Portfolio;

/// Reserved symbol meaning "hold as cash".
pub const CASH_SYMBOL: &str = "CASH";

/// Symbol → weight in percent of portfolio value.
pub type TargetWeights = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq)]
pub enum AllocationDecision {
    Rebalance(TargetWeights),
    /// Keep current holdings.
    Hold,
}

/// Everything a strategy may look at when deciding. The history window never
/// contains records after `as_of`.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    pub as_of: NaiveDate,
    pub history: &'a HistoryWindow<'a>,
    pub portfolio: &'a Portfolio,
    pub prices: &'a PriceMap,
}

pub trait AllocationStrategy {
    type State: Default;

    fn name(&self) -> &str;

    /// Symbols whose history the strategy reads. The loop fetches exactly these.
    fn symbols(&self) -> Vec<String>;

    fn compute_target_allocation(
        &self,
        request: &AllocationRequest<'_>,
        state: &mut Self::State,
    ) -> Result<AllocationDecision, BacktestError>;
}

fn weights_from(pairs: impl IntoIterator<Item = (impl Into<String>, f64)>) -> TargetWeights {
    pairs.into_iter().map(|(s, w)| (s.into(), w)).collect()
}

fn tradable_symbols(weights: &TargetWeights) -> Vec<String> {
    weights
        .keys()
        .filter(|s| s.as_str() != CASH_SYMBOL)
        .cloned()
        .collect()
}

/// True when the portfolio holds exactly the non-cash symbols `weights`
/// asks for. Strategies that trade only on a signal change use it so a
/// switch that failed to execute is requested again.
fn holds_exactly(portfolio: &Portfolio, weights: &TargetWeights) -> bool {
    let wanted = weights
        .iter()
        .filter(|(s, w)| s.as_str() != CASH_SYMBOL && **w > 0.0)
        .map(|(s, _)| s);
    portfolio.positions.keys().eq(wanted)
}

fn all_cash() -> TargetWeights {
    weights_from([(CASH_SYMBOL, 100.0)])
}

/// Equal split of 100% across `symbols`, or all cash when empty.
fn equal_weights(symbols: &[String]) -> TargetWeights {
    if symbols.is_empty() {
        return all_cash();
    }
    let w = 100.0 / symbols.len() as f64;
    symbols.iter().map(|s| (s.clone(), w)).collect()
}

/// Simple return over the last `lookback` periods.
fn trailing_return(closes: &[f64], lookback: usize) -> Option<f64> {
    if lookback == 0 || closes.len() <= lookback {
        return None;
    }
    let last = closes[closes.len() - 1];
    let first = closes[closes.len() - 1 - lookback];
    (first > 0.0).then(|| last / first - 1.0)
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

fn simple_returns(closes: &[f64]) -> Vec<f64> {
    closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Invest once at the target weights, then never trade again.
#[derive(Debug, Clone, PartialEq)]
pub struct BuyAndHold {
    pub weights: TargetWeights,
}

impl BuyAndHold {
    pub fn new(weights: impl IntoIterator<Item = (impl Into<String>, f64)>) -> Self {
        BuyAndHold {
            weights: weights_from(weights),
        }
    }
}

impl AllocationStrategy for BuyAndHold {
    type State = ();

    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn symbols(&self) -> Vec<String> {
        tradable_symbols(&self.weights)
    }

    fn compute_target_allocation(
        &self,
        request: &AllocationRequest<'_>,
        _state: &mut (),
    ) -> Result<AllocationDecision, BacktestError> {
        if request.portfolio.position_count() == 0 {
            Ok(AllocationDecision::Rebalance(self.weights.clone()))
        } else {
            Ok(AllocationDecision::Hold)
        }
    }
}

/// Constant mix: restore the same weights at every rebalance.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedWeights {
    pub weights: TargetWeights,
}

impl FixedWeights {
    pub fn new(weights: impl IntoIterator<Item = (impl Into<String>, f64)>) -> Self {
        FixedWeights {
            weights: weights_from(weights),
        }
    }
}

impl AllocationStrategy for FixedWeights {
    type State = ();

    fn name(&self) -> &str {
        "fixed_weights"
    }

    fn symbols(&self) -> Vec<String> {
        tradable_symbols(&self.weights)
    }

    fn compute_target_allocation(
        &self,
        _request: &AllocationRequest<'_>,
        _state: &mut (),
    ) -> Result<AllocationDecision, BacktestError> {
        Ok(AllocationDecision::Rebalance(self.weights.clone()))
    }
}

/// Equal-weight the `top_n` symbols with the best positive trailing return.
/// With no positive return anywhere the portfolio goes to cash. Holds while
/// the picks are unchanged and already held.
#[derive(Debug, Clone, PartialEq)]
pub struct Momentum {
    pub universe: Vec<String>,
    pub lookback: usize,
    pub top_n: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MomentumState {
    pub last_picks: Option<Vec<String>>,
}

impl Momentum {
    pub fn new(universe: impl IntoIterator<Item = impl Into<String>>, lookback: usize, top_n: usize) -> Self {
        Momentum {
            universe: universe.into_iter().map(Into::into).collect(),
            lookback,
            top_n,
        }
    }

    fn picks(&self, history: &HistoryWindow<'_>) -> Vec<String> {
        let mut scored: Vec<(String, f64)> = self
            .universe
            .iter()
            .filter_map(|s| {
                trailing_return(&history.closes(s), self.lookback)
                    .filter(|r| *r > 0.0)
                    .map(|r| (s.clone(), r))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let mut picks: Vec<String> = scored.into_iter().take(self.top_n).map(|(s, _)| s).collect();
        picks.sort();
        picks
    }
}

impl AllocationStrategy for Momentum {
    type State = MomentumState;

    fn name(&self) -> &str {
        "momentum"
    }

    fn symbols(&self) -> Vec<String> {
        self.universe.clone()
    }

    fn compute_target_allocation(
        &self,
        request: &AllocationRequest<'_>,
        state: &mut MomentumState,
    ) -> Result<AllocationDecision, BacktestError> {
        let picks = self.picks(request.history);
        let weights = equal_weights(&picks);
        if state.last_picks.as_ref() == Some(&picks) && holds_exactly(request.portfolio, &weights) {
            return Ok(AllocationDecision::Hold);
        }
        state.last_picks = Some(picks);
        Ok(AllocationDecision::Rebalance(weights))
    }
}

/// Naive risk parity: weight each symbol by the inverse of its return
/// volatility over the window.
#[derive(Debug, Clone, PartialEq)]
pub struct InverseVolatility {
    pub universe: Vec<String>,
}

impl InverseVolatility {
    pub fn new(universe: impl IntoIterator<Item = impl Into<String>>) -> Self {
        InverseVolatility {
            universe: universe.into_iter().map(Into::into).collect(),
        }
    }
}

impl AllocationStrategy for InverseVolatility {
    type State = ();

    fn name(&self) -> &str {
        "inverse_volatility"
    }

    fn symbols(&self) -> Vec<String> {
        self.universe.clone()
    }

    fn compute_target_allocation(
        &self,
        request: &AllocationRequest<'_>,
        _state: &mut (),
    ) -> Result<AllocationDecision, BacktestError> {
        let inverse: Vec<(String, f64)> = self
            .universe
            .iter()
            .filter_map(|s| {
                sample_std(&simple_returns(&request.history.closes(s)))
                    .filter(|v| *v > 0.0)
                    .map(|v| (s.clone(), 1.0 / v))
            })
            .collect();

        // Not enough movement to estimate risk: split evenly.
        if inverse.len() < self.universe.len() {
            return Ok(AllocationDecision::Rebalance(equal_weights(&self.universe)));
        }

        let total: f64 = inverse.iter().map(|(_, v)| v).sum();
        Ok(AllocationDecision::Rebalance(
            inverse
                .into_iter()
                .map(|(s, v)| (s, v / total * 100.0))
                .collect(),
        ))
    }
}

/// Move into `weights` in `tranches` equal steps, one per rebalance. The
/// part not yet deployed stays in cash. A tranche that did not land is
/// requested again before advancing.
#[derive(Debug, Clone, PartialEq)]
pub struct DollarCostAveraging {
    pub weights: TargetWeights,
    pub tranches: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DcaState {
    /// Tranches requested so far.
    pub deployed: usize,
}

impl DollarCostAveraging {
    pub fn new(weights: impl IntoIterator<Item = (impl Into<String>, f64)>, tranches: usize) -> Self {
        DollarCostAveraging {
            weights: weights_from(weights),
            tranches: tranches.max(1),
        }
    }

    /// Target weights with `level` of `tranches` invested.
    fn at_level(&self, level: usize) -> TargetWeights {
        let fraction = level.min(self.tranches) as f64 / self.tranches as f64;
        let mut weights: TargetWeights = self
            .weights
            .iter()
            .filter(|(s, _)| s.as_str() != CASH_SYMBOL)
            .map(|(s, w)| (s.clone(), w * fraction))
            .collect();
        let cash = 100.0 - weights.values().sum::<f64>();
        if cash > 1e-9 {
            weights.insert(CASH_SYMBOL.to_string(), cash);
        }
        weights
    }
}

impl AllocationStrategy for DollarCostAveraging {
    type State = DcaState;

    fn name(&self) -> &str {
        "dollar_cost_averaging"
    }

    fn symbols(&self) -> Vec<String> {
        tradable_symbols(&self.weights)
    }

    fn compute_target_allocation(
        &self,
        request: &AllocationRequest<'_>,
        state: &mut DcaState,
    ) -> Result<AllocationDecision, BacktestError> {
        let invested: f64 = request.portfolio.weights(request.prices)?.values().sum();
        let target: f64 = self
            .weights
            .iter()
            .filter(|(s, _)| s.as_str() != CASH_SYMBOL)
            .map(|(_, w)| w)
            .sum();
        let step = target / self.tranches as f64;

        let landed = state.deployed == 0 || invested >= step * state.deployed as f64 - step / 2.0;
        if landed {
            if state.deployed >= self.tranches {
                return Ok(AllocationDecision::Hold);
            }
            state.deployed += 1;
        }
        tracing::debug!(
            tranche = state.deployed,
            of = self.tranches,
            invested,
            "dollar cost averaging"
        );
        Ok(AllocationDecision::Rebalance(self.at_level(state.deployed)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    RiskOn,
    RiskOff,
}

/// Switch between two allocations depending on whether `signal` closes above
/// its simple moving average. Trades when the regime changes, or when the
/// portfolio does not yet hold the current regime's symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct RegimeAware {
    pub signal: String,
    pub sma_period: usize,
    pub risk_on: TargetWeights,
    pub risk_off: TargetWeights,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegimeState {
    pub regime: Option<Regime>,
}

impl RegimeAware {
    pub fn new(
        signal: impl Into<String>,
        sma_period: usize,
        risk_on: impl IntoIterator<Item = (impl Into<String>, f64)>,
        risk_off: impl IntoIterator<Item = (impl Into<String>, f64)>,
    ) -> Self {
        RegimeAware {
            signal: signal.into(),
            sma_period,
            risk_on: weights_from(risk_on),
            risk_off: weights_from(risk_off),
        }
    }

    pub fn regime(&self, history: &HistoryWindow<'_>) -> Option<Regime> {
        let closes = history.closes(&self.signal);
        if self.sma_period == 0 || closes.len() < self.sma_period {
            return None;
        }
        let tail = &closes[closes.len() - self.sma_period..];
        let sma = tail.iter().sum::<f64>() / self.sma_period as f64;
        let last = closes[closes.len() - 1];
        Some(if last > sma { Regime::RiskOn } else { Regime::RiskOff })
    }
}

impl AllocationStrategy for RegimeAware {
    type State = RegimeState;

    fn name(&self) -> &str {
        "regime_aware"
    }

    fn symbols(&self) -> Vec<String> {
        let mut symbols = tradable_symbols(&self.risk_on);
        symbols.extend(tradable_symbols(&self.risk_off));
        symbols.push(self.signal.clone());
        symbols.sort();
        symbols.dedup();
        symbols
    }

    fn compute_target_allocation(
        &self,
        request: &AllocationRequest<'_>,
        state: &mut RegimeState,
    ) -> Result<AllocationDecision, BacktestError> {
        let Some(regime) = self.regime(request.history) else {
            return Ok(AllocationDecision::Hold);
        };
        let weights = match regime {
            Regime::RiskOn => &self.risk_on,
            Regime::RiskOff => &self.risk_off,
        };
        if state.regime == Some(regime) && holds_exactly(request.portfolio, weights) {
            return Ok(AllocationDecision::Hold);
        }
        state.regime = Some(regime);
        Ok(AllocationDecision::Rebalance(weights.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::PriceSeries;
    use crate::domain::transaction::{Side, Transaction};
    use approx::assert_relative_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn series(symbol: &str, closes: &[f64]) -> PriceSeries {
        let pairs: Vec<(NaiveDate, f64)> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| (d(i as u32 + 1), *c))
            .collect();
        PriceSeries::from_closes(symbol, &pairs).unwrap()
    }

    fn window<'a>(series: &'a [PriceSeries]) -> HistoryWindow<'a> {
        let as_of = series
            .iter()
            .filter_map(|s| s.last_date())
            .max()
            .unwrap();
        HistoryWindow::new(
            as_of,
            series
                .iter()
                .map(|s| (s.symbol().to_string(), s.records()))
                .collect(),
        )
    }

    fn decide<S: AllocationStrategy>(
        strategy: &S,
        history: &HistoryWindow<'_>,
        portfolio: &Portfolio,
        state: &mut S::State,
    ) -> AllocationDecision {
        decide_at(strategy, history, portfolio, &PriceMap::new(), state)
    }

    fn decide_at<S: AllocationStrategy>(
        strategy: &S,
        history: &HistoryWindow<'_>,
        portfolio: &Portfolio,
        prices: &PriceMap,
        state: &mut S::State,
    ) -> AllocationDecision {
        let request = AllocationRequest {
            as_of: history.as_of(),
            history,
            portfolio,
            prices,
        };
        strategy.compute_target_allocation(&request, state).unwrap()
    }

    fn buy(portfolio: &mut Portfolio, symbol: &str, shares: f64, price: f64) {
        let id = portfolio.next_transaction_id();
        portfolio.record_transaction(Transaction {
            id,
            date: d(1),
            symbol: symbol.into(),
            side: Side::Buy,
            shares,
            price,
            cost: 0.0,
        });
    }

    fn weights_of(decision: AllocationDecision) -> TargetWeights {
        match decision {
            AllocationDecision::Rebalance(w) => w,
            AllocationDecision::Hold => panic!("expected a rebalance"),
        }
    }

    #[test]
    fn buy_and_hold_invests_once() {
        let data = vec![series("SPY", &[100.0, 101.0])];
        let history = window(&data);
        let strategy = BuyAndHold::new([("SPY", 100.0)]);

        let mut portfolio = Portfolio::new(1_000.0);
        let first = decide(&strategy, &history, &portfolio, &mut ());
        assert_eq!(weights_of(first)["SPY"], 100.0);

        portfolio.record_transaction(Transaction {
            id: 1,
            date: d(2),
            symbol: "SPY".into(),
            side: Side::Buy,
            shares: 9.0,
            price: 101.0,
            cost: 0.0,
        });
        assert_eq!(
            decide(&strategy, &history, &portfolio, &mut ()),
            AllocationDecision::Hold
        );
    }

    #[test]
    fn fixed_weights_always_rebalances() {
        let data = vec![series("SPY", &[100.0]), series("TLT", &[50.0])];
        let history = window(&data);
        let strategy = FixedWeights::new([("SPY", 60.0), ("TLT", 40.0)]);
        let portfolio = Portfolio::new(1_000.0);

        let w = weights_of(decide(&strategy, &history, &portfolio, &mut ()));
        assert_eq!(w["SPY"], 60.0);
        assert_eq!(w["TLT"], 40.0);
        assert_eq!(strategy.symbols(), vec!["SPY".to_string(), "TLT".to_string()]);
    }

    #[test]
    fn cash_is_not_a_history_symbol() {
        let strategy = FixedWeights::new([("SPY", 60.0), (CASH_SYMBOL, 40.0)]);
        assert_eq!(strategy.symbols(), vec!["SPY".to_string()]);
    }

    #[test]
    fn momentum_picks_best_positive_returns() {
        let data = vec![
            series("A", &[100.0, 105.0, 110.0]),
            series("B", &[100.0, 102.0, 120.0]),
            series("C", &[100.0, 95.0, 90.0]),
        ];
        let history = window(&data);
        let strategy = Momentum::new(["A", "B", "C"], 2, 2);
        let mut portfolio = Portfolio::new(1_000.0);
        let mut state = MomentumState::default();

        let w = weights_of(decide(&strategy, &history, &portfolio, &mut state));
        assert_eq!(w.len(), 2);
        assert_relative_eq!(w["A"], 50.0);
        assert_relative_eq!(w["B"], 50.0);
        assert_eq!(state.last_picks, Some(vec!["A".to_string(), "B".to_string()]));

        // Same picks, already held: nothing to do.
        buy(&mut portfolio, "A", 4.0, 110.0);
        buy(&mut portfolio, "B", 4.0, 120.0);
        assert_eq!(
            decide(&strategy, &history, &portfolio, &mut state),
            AllocationDecision::Hold
        );
    }

    #[test]
    fn momentum_retries_picks_that_were_never_bought() {
        let data = vec![series("A", &[100.0, 105.0, 110.0]), series("B", &[100.0, 95.0, 90.0])];
        let history = window(&data);
        let strategy = Momentum::new(["A", "B"], 2, 1);
        let mut portfolio = Portfolio::new(1_000.0);
        buy(&mut portfolio, "B", 5.0, 90.0);
        let mut state = MomentumState {
            last_picks: Some(vec!["A".to_string()]),
        };

        // The switch to A did not execute; B is still held.
        let w = weights_of(decide(&strategy, &history, &portfolio, &mut state));
        assert_eq!(w.keys().collect::<Vec<_>>(), vec!["A"]);
    }

    #[test]
    fn momentum_goes_to_cash_when_nothing_rises() {
        let data = vec![series("A", &[100.0, 99.0]), series("B", &[100.0, 90.0])];
        let history = window(&data);
        let strategy = Momentum::new(["A", "B"], 1, 1);
        let w = weights_of(decide(
            &strategy,
            &history,
            &Portfolio::new(1_000.0),
            &mut MomentumState::default(),
        ));
        assert_eq!(w, all_cash());
    }

    #[test]
    fn momentum_ignores_symbols_with_short_history() {
        let data = vec![series("A", &[100.0, 110.0])];
        let history = window(&data);
        let strategy = Momentum::new(["A"], 5, 1);
        let w = weights_of(decide(
            &strategy,
            &history,
            &Portfolio::new(1_000.0),
            &mut MomentumState::default(),
        ));
        assert_eq!(w, all_cash());
    }

    #[test]
    fn inverse_volatility_favours_calm_assets() {
        let data = vec![
            series("CALM", &[100.0, 101.0, 100.0, 101.0, 100.0]),
            series("WILD", &[100.0, 110.0, 100.0, 110.0, 100.0]),
        ];
        let history = window(&data);
        let strategy = InverseVolatility::new(["CALM", "WILD"]);
        let w = weights_of(decide(&strategy, &history, &Portfolio::new(1_000.0), &mut ()));

        assert!(w["CALM"] > w["WILD"]);
        assert_relative_eq!(w.values().sum::<f64>(), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn inverse_volatility_falls_back_to_equal_weights() {
        let data = vec![series("FLAT", &[100.0, 100.0, 100.0]), series("B", &[1.0, 2.0, 1.0])];
        let history = window(&data);
        let strategy = InverseVolatility::new(["FLAT", "B"]);
        let w = weights_of(decide(&strategy, &history, &Portfolio::new(1_000.0), &mut ()));
        assert_relative_eq!(w["FLAT"], 50.0);
        assert_relative_eq!(w["B"], 50.0);
    }

    #[test]
    fn regime_switches_only_on_change() {
        let strategy = RegimeAware::new("SPY", 3, [("SPY", 100.0)], [(CASH_SYMBOL, 100.0)]);
        let mut portfolio = Portfolio::new(1_000.0);
        let mut state = RegimeState::default();

        let rising = vec![series("SPY", &[100.0, 101.0, 105.0])];
        let history = window(&rising);
        assert_eq!(strategy.regime(&history), Some(Regime::RiskOn));
        let w = weights_of(decide(&strategy, &history, &portfolio, &mut state));
        assert_eq!(w["SPY"], 100.0);
        buy(&mut portfolio, "SPY", 9.0, 105.0);
        assert_eq!(
            decide(&strategy, &history, &portfolio, &mut state),
            AllocationDecision::Hold
        );

        let falling = vec![series("SPY", &[100.0, 101.0, 105.0, 90.0])];
        let history = window(&falling);
        let w = weights_of(decide(&strategy, &history, &portfolio, &mut state));
        assert_eq!(w[CASH_SYMBOL], 100.0);
        assert_eq!(state.regime, Some(Regime::RiskOff));
    }

    #[test]
    fn regime_switch_is_requested_until_held() {
        let strategy = RegimeAware::new("SPY", 2, [("SPY", 100.0)], [("TLT", 100.0)]);
        let falling = vec![series("SPY", &[100.0, 90.0]), series("TLT", &[50.0, 50.0])];
        let history = window(&falling);
        let mut portfolio = Portfolio::new(1_000.0);
        buy(&mut portfolio, "SPY", 9.0, 100.0);
        let mut state = RegimeState::default();

        let w = weights_of(decide(&strategy, &history, &portfolio, &mut state));
        assert_eq!(w["TLT"], 100.0);
        // The move to TLT was skipped: ask again rather than hold SPY.
        let w = weights_of(decide(&strategy, &history, &portfolio, &mut state));
        assert_eq!(w["TLT"], 100.0);

        let mut moved = Portfolio::new(1_000.0);
        buy(&mut moved, "TLT", 18.0, 50.0);
        assert_eq!(
            decide(&strategy, &history, &moved, &mut state),
            AllocationDecision::Hold
        );
    }

    #[test]
    fn dca_deploys_in_tranches() {
        let data = vec![series("SPY", &[100.0]), series("TLT", &[50.0])];
        let history = window(&data);
        let prices: PriceMap = [("SPY".to_string(), 100.0), ("TLT".to_string(), 50.0)]
            .into_iter()
            .collect();
        let strategy = DollarCostAveraging::new([("SPY", 60.0), ("TLT", 40.0)], 4);
        assert_eq!(strategy.name(), "dollar_cost_averaging");
        assert_eq!(strategy.symbols(), vec!["SPY".to_string(), "TLT".to_string()]);
        let mut portfolio = Portfolio::new(10_000.0);
        let mut state = DcaState::default();

        let w = weights_of(decide_at(&strategy, &history, &portfolio, &prices, &mut state));
        assert_relative_eq!(w["SPY"], 15.0);
        assert_relative_eq!(w["TLT"], 10.0);
        assert_relative_eq!(w[CASH_SYMBOL], 75.0);
        assert_eq!(state.deployed, 1);

        // Nothing bought yet: the first tranche is requested again.
        let w = weights_of(decide_at(&strategy, &history, &portfolio, &prices, &mut state));
        assert_relative_eq!(w[CASH_SYMBOL], 75.0);
        assert_eq!(state.deployed, 1);

        // A quarter invested: advance to half.
        buy(&mut portfolio, "SPY", 15.0, 100.0);
        buy(&mut portfolio, "TLT", 20.0, 50.0);
        let w = weights_of(decide_at(&strategy, &history, &portfolio, &prices, &mut state));
        assert_relative_eq!(w["SPY"], 30.0);
        assert_relative_eq!(w["TLT"], 20.0);
        assert_relative_eq!(w[CASH_SYMBOL], 50.0);
        assert_eq!(state.deployed, 2);
    }

    #[test]
    fn dca_holds_once_fully_deployed() {
        let data = vec![series("SPY", &[100.0])];
        let history = window(&data);
        let prices: PriceMap = [("SPY".to_string(), 100.0)].into_iter().collect();
        let strategy = DollarCostAveraging::new([("SPY", 100.0)], 2);
        let mut portfolio = Portfolio::new(1_000.0);
        buy(&mut portfolio, "SPY", 10.0, 100.0);
        let mut state = DcaState { deployed: 2 };

        assert_eq!(
            decide_at(&strategy, &history, &portfolio, &prices, &mut state),
            AllocationDecision::Hold
        );
        assert_eq!(strategy.at_level(2), weights_from([("SPY", 100.0)]));
        assert_eq!(DollarCostAveraging::new([("SPY", 100.0)], 0).tranches, 1);
    }

    #[test]
    fn regime_holds_until_enough_history() {
        let strategy = RegimeAware::new("SPY", 10, [("SPY", 100.0)], [(CASH_SYMBOL, 100.0)]);
        let data = vec![series("SPY", &[100.0, 101.0])];
        let history = window(&data);
        assert_eq!(
            decide(&strategy, &history, &Portfolio::new(1_000.0), &mut RegimeState::default()),
            AllocationDecision::Hold
        );
        assert_eq!(strategy.symbols(), vec!["SPY".to_string()]);
    }

    #[test]
    fn trailing_return_and_std_helpers() {
        assert_relative_eq!(trailing_return(&[100.0, 110.0, 121.0], 2).unwrap(), 0.21, epsilon = 1e-12);
        assert!(trailing_return(&[100.0], 1).is_none());
        assert!(sample_std(&[1.0]).is_none());
        assert_relative_eq!(sample_std(&[1.0, 3.0]).unwrap(), 2.0_f64.sqrt());
    }
}
