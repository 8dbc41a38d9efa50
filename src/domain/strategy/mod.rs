//! Trading strategies.
//!
//! A strategy turns a point-in-time [`MarketView`] into per-instrument
//! signals. It may keep memory between calls; `reset` clears it before each
//! run so repeated runs over the same data produce the same signals.

pub mod ai_picker;
pub mod moving_average;

use chrono::NaiveDate;

use crate::domain::indicator::IndicatorType;
use crate::domain::market::MarketView;
use crate::domain::signal::Signal;

pub use ai_picker::{AiStockPicker, FactorScores, FactorWeights, ScoreBand, ScoringModel, WeightedSum};
pub use moving_average::{AverageKind, EntryFilters, ExitDirection, MovingAverageStrategy};

pub trait Strategy: Send {
    fn id(&self) -> &str;

    /// Indicators the engine must compute before the first call.
    fn required_indicators(&self) -> Vec<IndicatorType>;

    fn reset(&mut self);

    /// Signals for `universe` (instruments with a bar on `as_of`), in the
    /// order they should be processed.
    fn generate_signals(
        &mut self,
        as_of: NaiveDate,
        universe: &[String],
        history: &MarketView<'_>,
    ) -> Vec<Signal>;
}
