//! Result export port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::BacktestError;
use std::path::Path;

/// Port for writing a finished run to an external tabular/structured format.
pub trait ExportPort {
    fn write_equity_curve(&self, result: &BacktestResult, path: &Path) -> Result<(), BacktestError>;

    fn write_ledger(&self, result: &BacktestResult, path: &Path) -> Result<(), BacktestError>;

    fn write_warnings(&self, result: &BacktestResult, path: &Path) -> Result<(), BacktestError>;

    /// Default implementation: writes all three exports into `dir` under fixed names.
    fn write_all(&self, result: &BacktestResult, dir: &Path) -> Result<(), BacktestError> {
        self.write_equity_curve(result, &dir.join("equity_curve.csv"))?;
        self.write_ledger(result, &dir.join("ledger.csv"))?;
        self.write_warnings(result, &dir.join("warnings.csv"))
    }
}
