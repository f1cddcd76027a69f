//! Core domain types and simulation logic.

pub mod allocation;
pub mod backtest;
pub mod causality;
pub mod config;
pub mod cost;
pub mod error;
pub mod execution;
pub mod leveraged;
pub mod market_data;
pub mod metrics;
pub mod portfolio;
pub mod position;
pub mod price;
pub mod schedule;
pub mod strategy;
pub mod sweep;
pub mod transaction;
