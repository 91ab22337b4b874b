// Momentum strategy module
pub mod aggregator;
pub mod momentum;

use crate::models::{Candle, Signal};

pub use aggregator::{AggregateSignal, SignalPipeline};
pub use momentum::{
    BollingerBreakout, EmaCrossover, MacdCrossover, RocMomentum, RsiReversal, SmaCrossover,
    VolumeMomentum,
};

/// One strategy's opinion on the current market
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyVote {
    pub signal: Signal,
    pub confidence: f64,
}

impl StrategyVote {
    pub fn hold() -> Self {
        Self {
            signal: Signal::Hold,
            confidence: 0.0,
        }
    }
}

/// Base trait for all momentum strategies
///
/// Strategies are pure functions over the candle window; a strategy that
/// does not have enough history votes hold with zero confidence.
pub trait Strategy: Send + Sync {
    fn evaluate(&self, candles: &[Candle]) -> StrategyVote;

    fn name(&self) -> &str;
}

/// Extract close prices, oldest first
pub(crate) fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}
