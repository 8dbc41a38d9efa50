//! Port traits the domain talks through. Implementations live in
//! [`crate::adapters`].

pub mod config_port;
pub mod data_port;
pub mod portfolio_store;
pub mod report_port;
