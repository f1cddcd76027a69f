//! Domain error types.
//!
//! Fatal errors abort a run. Recoverable ones (see [`BacktestError::is_recoverable`])
//! skip the offending rebalance and are recorded as warnings.

use chrono::NaiveDate;

/// Top-level error type for portsim.
#[derive(Debug, thiserror::Error)]
pub enum BacktestError {
    #[error("data error for {symbol}: {reason}")]
    Data { symbol: String, reason: String },

    #[error("causality violation: {symbol} record dated {record_date} exposed as of {as_of}")]
    CausalityViolation {
        symbol: String,
        record_date: NaiveDate,
        as_of: NaiveDate,
    },

    #[error("invalid allocation: {reason}")]
    InvalidAllocation { reason: String },

    #[error("insufficient funds: need {required:.2}, have {available:.2}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("insufficient shares of {symbol}: selling {requested}, holding {held}")]
    InsufficientShares {
        symbol: String,
        requested: f64,
        held: f64,
    },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("run cancelled: {reason}")]
    Cancelled { reason: String },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BacktestError {
    pub(crate) fn data(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        BacktestError::Data {
            symbol: symbol.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_allocation(reason: impl Into<String>) -> Self {
        BacktestError::InvalidAllocation {
            reason: reason.into(),
        }
    }

    pub(crate) fn config_invalid(
        section: impl Into<String>,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        BacktestError::ConfigInvalid {
            section: section.into(),
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Strategy and execution failures that only invalidate one rebalance.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BacktestError::InvalidAllocation { .. }
                | BacktestError::InsufficientFunds { .. }
                | BacktestError::InsufficientShares { .. }
        )
    }

    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BacktestError::ConfigParse { .. }
                | BacktestError::ConfigMissing { .. }
                | BacktestError::ConfigInvalid { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(BacktestError::invalid_allocation("sum is 80").is_recoverable());
        assert!(
            BacktestError::InsufficientFunds {
                required: 10.0,
                available: 5.0
            }
            .is_recoverable()
        );
        assert!(
            BacktestError::InsufficientShares {
                symbol: "SPY".into(),
                requested: 3.0,
                held: 1.0
            }
            .is_recoverable()
        );
        assert!(!BacktestError::data("SPY", "no records").is_recoverable());
        assert!(
            !BacktestError::CausalityViolation {
                symbol: "SPY".into(),
                record_date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                as_of: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            }
            .is_recoverable()
        );
        assert!(
            !BacktestError::Cancelled {
                reason: "timeout".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn configuration_classification() {
        let err = BacktestError::config_invalid("costs", "commission_pct", "must be non-negative");
        assert!(err.is_configuration());
        assert!(!err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "invalid config value [costs] commission_pct: must be non-negative"
        );
    }

    #[test]
    fn funds_message_formats_amounts() {
        let err = BacktestError::InsufficientFunds {
            required: 1234.5,
            available: 1000.0,
        };
        assert_eq!(
            err.to_string(),
            "insufficient funds: need 1234.50, have 1000.00"
        );
    }
}
