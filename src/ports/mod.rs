//! Port traits at the engine boundary.

pub mod config_port;
pub mod data_port;
pub mod export_port;
