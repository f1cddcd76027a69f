//! CSV export of a finished run.

use std::path::Path;

use serde::Serialize;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::BacktestError;
use crate::ports::export_port::ExportPort;

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvExportAdapter;

impl CsvExportAdapter {
    pub fn new() -> Self {
        CsvExportAdapter
    }

    fn write_rows<T: Serialize>(rows: &[T], path: &Path) -> Result<(), BacktestError> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        tracing::debug!(path = %path.display(), rows = rows.len(), "wrote csv export");
        Ok(())
    }
}

impl ExportPort for CsvExportAdapter {
    fn write_equity_curve(&self, result: &BacktestResult, path: &Path) -> Result<(), BacktestError> {
        Self::write_rows(&result.equity_curve_records(), path)
    }

    fn write_ledger(&self, result: &BacktestResult, path: &Path) -> Result<(), BacktestError> {
        Self::write_rows(&result.ledger_records(), path)
    }

    fn write_warnings(&self, result: &BacktestResult, path: &Path) -> Result<(), BacktestError> {
        Self::write_rows(&result.warnings, path)
    }
}
