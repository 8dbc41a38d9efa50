//! Market data port.

use crate::domain::error::CoreError;
use crate::domain::ohlcv::Bar;
use chrono::NaiveDate;

/// Source of daily bars. Failures surface as data errors; retrying is the
/// implementation's business.
pub trait MarketDataFeed: Send + Sync {
    /// Bars for `instrument_id` dated within `[start_date, end_date]`,
    /// ascending by date.
    fn get_history(
        &self,
        instrument_id: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, CoreError>;

    /// Latest available bar.
    fn get_quote(&self, instrument_id: &str) -> Result<Bar, CoreError>;

    fn list_instruments(&self) -> Result<Vec<String>, CoreError>;
}
