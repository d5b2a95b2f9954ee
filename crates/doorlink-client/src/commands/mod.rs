//! CLI command implementations.

pub mod config;
pub mod device;
pub mod history;
