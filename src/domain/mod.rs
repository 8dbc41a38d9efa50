//! Core domain types and logic.

pub mod ohlcv;
pub mod signal;
pub mod position;
pub mod portfolio;
pub mod execution;
pub mod risk;
pub mod indicator;
pub mod technical;
pub mod market;
pub mod strategy;
pub mod backtest;
pub mod metrics;
pub mod config;
pub mod live;
pub mod orchestrator;
pub mod error;
