//! Multi-factor stock picker.
//!
//! Factors are scored 0-100 from an instrument's visible history:
//!
//! - momentum: mean of the last five ROC(5) values × 10 + 50
//! - trend: price above SMA(5)/SMA(20)/SMA(60) and bullish alignment
//! - volume: 5-day vs 20-day average volume
//! - volatility: VOLATILITY(20), moderate (2-4 %) scores best
//! - technical: the MA/MACD/RSI grade of [`TechnicalSnapshot`]
//!
//! A [`ScoringModel`] combines them into one score. Instruments are ranked
//! descending by score (ties by instrument id) and the top K are held. The
//! default weights leave the technical factor out.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::Strategy;
use crate::domain::indicator::IndicatorType;
use crate::domain::market::{InstrumentView, MarketView};
use crate::domain::signal::{Direction, Signal};
use crate::domain::technical::{self, TechnicalSnapshot, MA_LONG, MA_MID, MA_SHORT};

pub const DEFAULT_MIN_HISTORY: usize = 30;
/// Return window shared with the moving-average volatility filter.
pub const VOLATILITY: IndicatorType = IndicatorType::Volatility(20);

const NEUTRAL: f64 = 50.0;
const MOMENTUM: IndicatorType = IndicatorType::Roc(5);
const MOMENTUM_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub momentum: f64,
    pub trend: f64,
    pub volume: f64,
    pub volatility: f64,
    pub technical: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub momentum: f64,
    pub trend: f64,
    pub volume: f64,
    pub volatility: f64,
    #[serde(default)]
    pub technical: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        FactorWeights {
            momentum: 0.3,
            trend: 0.3,
            volume: 0.2,
            volatility: 0.2,
            technical: 0.0,
        }
    }
}

impl FactorWeights {
    pub fn parts(&self) -> [f64; 5] {
        [self.momentum, self.trend, self.volume, self.volatility, self.technical]
    }

    pub fn sum(&self) -> f64 {
        self.parts().iter().sum()
    }

    /// Scale to sum 1. Weights that are negative, non-finite, or sum to zero
    /// fall back to the defaults.
    pub fn normalized(&self) -> FactorWeights {
        let total = self.sum();
        if self.parts().iter().any(|w| !w.is_finite() || *w < 0.0) || total <= 0.0 {
            return FactorWeights::default().normalized();
        }
        FactorWeights {
            momentum: self.momentum / total,
            trend: self.trend / total,
            volume: self.volume / total,
            volatility: self.volatility / total,
            technical: self.technical / total,
        }
    }
}

/// Pure function from factors to a score.
pub trait ScoringModel: Send + Sync {
    fn score(&self, factors: &FactorScores) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSum {
    weights: FactorWeights,
}

impl WeightedSum {
    pub fn new(weights: FactorWeights) -> Self {
        WeightedSum {
            weights: weights.normalized(),
        }
    }

    pub fn weights(&self) -> &FactorWeights {
        &self.weights
    }
}

impl Default for WeightedSum {
    fn default() -> Self {
        WeightedSum::new(FactorWeights::default())
    }
}

impl ScoringModel for WeightedSum {
    fn score(&self, f: &FactorScores) -> f64 {
        let w = &self.weights;
        f.momentum * w.momentum
            + f.trend * w.trend
            + f.volume * w.volume
            + f.volatility * w.volatility
            + f.technical * w.technical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreBand {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl ScoreBand {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            ScoreBand::StrongBuy
        } else if score >= 65.0 {
            ScoreBand::Buy
        } else if score >= 50.0 {
            ScoreBand::Hold
        } else if score >= 35.0 {
            ScoreBand::Sell
        } else {
            ScoreBand::StrongSell
        }
    }
}

impl fmt::Display for ScoreBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ScoreBand::StrongBuy => "strong buy",
            ScoreBand::Buy => "buy",
            ScoreBand::Hold => "hold",
            ScoreBand::Sell => "sell",
            ScoreBand::StrongSell => "strong sell",
        };
        f.write_str(text)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

/// `roc` holds the latest 5-day rates of change in percent; fewer than
/// five is neutral.
pub fn momentum_score(roc: &[f64]) -> f64 {
    if roc.len() < MOMENTUM_SAMPLES {
        return NEUTRAL;
    }
    (mean(tail(roc, MOMENTUM_SAMPLES)) * 10.0 + 50.0).clamp(0.0, 100.0)
}

/// `ma_long` falls back to `ma_mid` when there is not enough history for it.
pub fn trend_score(price: f64, ma_short: f64, ma_mid: f64, ma_long: Option<f64>) -> f64 {
    let ma_long = ma_long.unwrap_or(ma_mid);
    let mut score = NEUTRAL;
    if price > ma_short {
        score += 10.0;
    }
    if price > ma_mid {
        score += 15.0;
    }
    if price > ma_long {
        score += 15.0;
    }
    if ma_short > ma_mid && ma_mid > ma_long {
        score += 10.0;
    }
    score.min(100.0)
}

pub fn volume_score(volumes: &[f64]) -> f64 {
    if volumes.len() < 10 {
        return NEUTRAL;
    }
    let recent = mean(tail(volumes, 5));
    let average = mean(tail(volumes, 20));
    let ratio = if average > 0.0 { recent / average } else { 1.0 };
    let score = if (0.8..=2.0).contains(&ratio) {
        70.0 + (ratio - 1.0) * 20.0
    } else if ratio < 0.8 {
        50.0 + ratio * 25.0
    } else {
        (90.0 - (ratio - 2.0) * 10.0).min(90.0)
    };
    score.clamp(0.0, 100.0)
}

/// `volatility` is the daily return stddev in percent, `None` while the
/// window is filling.
pub fn volatility_score(volatility: Option<f64>) -> f64 {
    let Some(volatility) = volatility else {
        return NEUTRAL;
    };
    if (2.0..=4.0).contains(&volatility) {
        80.0
    } else if volatility < 2.0 {
        60.0 + volatility * 10.0
    } else {
        (80.0 - (volatility - 4.0) * 10.0).max(40.0)
    }
}

pub fn compute_factors(view: &InstrumentView<'_>) -> FactorScores {
    let volumes: Vec<f64> = view.bars().iter().map(|b| b.volume).collect();
    let trend = match (
        view.last_bar(),
        view.latest(&MA_SHORT),
        view.latest(&MA_MID),
    ) {
        (Some(bar), Some(short), Some(mid)) => {
            trend_score(bar.close, short, mid, view.latest(&MA_LONG))
        }
        _ => NEUTRAL,
    };
    // Oldest first; stops at the first sample still warming up.
    let mut roc: Vec<f64> = (0..MOMENTUM_SAMPLES)
        .map_while(|back| view.value_back(&MOMENTUM, back))
        .collect();
    roc.reverse();
    FactorScores {
        momentum: momentum_score(&roc),
        trend,
        volume: volume_score(&volumes),
        volatility: volatility_score(view.latest(&VOLATILITY)),
        technical: TechnicalSnapshot::from_view(view).map_or(NEUTRAL, |s| s.score),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedInstrument {
    pub instrument_id: String,
    pub score: f64,
    pub band: ScoreBand,
    pub factors: FactorScores,
}

pub struct AiStockPicker {
    id: String,
    top_k: usize,
    min_history: usize,
    rebalance_every: usize,
    model: Box<dyn ScoringModel>,
    ticks: usize,
    held: Vec<String>,
}

impl AiStockPicker {
    pub fn new(top_k: usize, min_history: usize, rebalance_every: usize, model: Box<dyn ScoringModel>) -> Self {
        AiStockPicker {
            id: format!("ai_picker_top{top_k}"),
            top_k,
            min_history,
            rebalance_every: rebalance_every.max(1),
            model,
            ticks: 0,
            held: Vec::new(),
        }
    }

    pub fn with_weights(top_k: usize, weights: FactorWeights) -> Self {
        Self::new(top_k, DEFAULT_MIN_HISTORY, 1, Box::new(WeightedSum::new(weights)))
    }

    /// Instruments currently held by the picker, in selection order.
    pub fn held(&self) -> &[String] {
        &self.held
    }

    /// Score and rank the instruments of `universe` that have a bar on
    /// `as_of` and at least `min_history` bars.
    pub fn rank(&self, as_of: NaiveDate, universe: &[String], history: &MarketView<'_>) -> Vec<RankedInstrument> {
        let mut ranked: Vec<RankedInstrument> = universe
            .iter()
            .filter_map(|id| history.get(id))
            .filter(|view| view.len() >= self.min_history)
            .filter(|view| view.last_bar().map(|b| b.date) == Some(as_of))
            .filter_map(|view| {
                let factors = compute_factors(view);
                let score = self.model.score(&factors);
                score.is_finite().then(|| RankedInstrument {
                    instrument_id: view.instrument_id().to_string(),
                    score,
                    band: ScoreBand::from_score(score),
                    factors,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.instrument_id.cmp(&b.instrument_id))
        });
        ranked
    }
}

impl Strategy for AiStockPicker {
    fn id(&self) -> &str {
        &self.id
    }

    fn required_indicators(&self) -> Vec<IndicatorType> {
        vec![
            MA_SHORT,
            MA_MID,
            MA_LONG,
            MOMENTUM,
            VOLATILITY,
            technical::MACD,
            technical::RSI,
        ]
    }

    fn reset(&mut self) {
        self.ticks = 0;
        self.held.clear();
    }

    fn generate_signals(
        &mut self,
        as_of: NaiveDate,
        universe: &[String],
        history: &MarketView<'_>,
    ) -> Vec<Signal> {
        let tick = self.ticks;
        self.ticks += 1;
        if tick % self.rebalance_every != 0 {
            return Vec::new();
        }

        let ranked = self.rank(as_of, universe, history);
        let top: Vec<&RankedInstrument> = ranked.iter().take(self.top_k).collect();
        let in_top = |id: &str| top.iter().any(|r| r.instrument_id == id);
        let in_universe = |id: &str| universe.iter().any(|u| u == id);

        let mut signals = Vec::new();
        for id in self.held.iter().filter(|id| in_universe(id.as_str()) && !in_top(id.as_str())) {
            signals.push(Signal::new(
                id,
                as_of,
                Direction::Flat,
                0.0,
                &self.id,
                "dropped out of top-k",
            ));
        }
        for (rank, r) in top.iter().enumerate() {
            signals.push(Signal::new(
                &r.instrument_id,
                as_of,
                Direction::Long,
                (r.score - 50.0) / 50.0,
                &self.id,
                format!("rank {} score {:.1} ({})", rank + 1, r.score, r.band),
            ));
        }

        // Holdings without a bar today are carried until they can be re-ranked.
        let carried: Vec<String> = self
            .held
            .iter()
            .filter(|id| !in_universe(id.as_str()))
            .cloned()
            .collect();
        self.held = top.iter().map(|r| r.instrument_id.clone()).collect();
        self.held.extend(carried);
        signals
    }
}
