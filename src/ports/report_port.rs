//! Report output port.

use crate::domain::backtest::BacktestResult;
use crate::domain::config::PortfolioConfig;
use crate::domain::error::CoreError;

pub trait ReportSink {
    fn write(
        &self,
        result: &BacktestResult,
        config: &PortfolioConfig,
        destination: &str,
    ) -> Result<(), CoreError>;
}
