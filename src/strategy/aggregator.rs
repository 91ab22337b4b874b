use super::{Strategy, StrategyVote};
use crate::models::{Candle, Signal};

/// Combined verdict of the whole strategy set
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSignal {
    pub signal: Signal,
    pub confidence: f64,
}

/// Weighted vote aggregation over a set of momentum strategies
///
/// Buy votes count +1, sell votes -1, hold 0, each scaled by the vote's
/// confidence and the strategy's weight. The sign of the weighted score
/// decides the final signal; its confidence is the winning side's weighted
/// confidence normalized by total weight, capped at 1.0.
pub struct SignalPipeline {
    strategies: Vec<Box<dyn Strategy>>,
    weights: Vec<f64>,
}

impl SignalPipeline {
    /// Equal-weight pipeline
    pub fn new(strategies: Vec<Box<dyn Strategy>>) -> Self {
        let weights = vec![1.0; strategies.len()];
        Self {
            strategies,
            weights,
        }
    }

    /// Pipeline with one weight per strategy
    pub fn with_weights(
        strategies: Vec<Box<dyn Strategy>>,
        weights: Vec<f64>,
    ) -> anyhow::Result<Self> {
        if strategies.len() != weights.len() {
            anyhow::bail!(
                "weights and strategies length mismatch: {} != {}",
                weights.len(),
                strategies.len()
            );
        }
        Ok(Self {
            strategies,
            weights,
        })
    }

    /// The full momentum strategy set with default parameters
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(super::SmaCrossover::default()),
            Box::new(super::RocMomentum::default()),
            Box::new(super::EmaCrossover::default()),
            Box::new(super::MacdCrossover::default()),
            Box::new(super::RsiReversal::default()),
            Box::new(super::BollingerBreakout::default()),
            Box::new(super::VolumeMomentum::default()),
        ])
    }

    pub fn evaluate(&self, candles: &[Candle]) -> AggregateSignal {
        let mut weighted_score = 0.0;
        let mut total_weight = 0.0;
        let mut buy_confidence = 0.0;
        let mut sell_confidence = 0.0;
        let mut hold_confidence = 0.0;

        for (strategy, &weight) in self.strategies.iter().zip(self.weights.iter()) {
            let StrategyVote { signal, confidence } = strategy.evaluate(candles);

            tracing::debug!(
                strategy = strategy.name(),
                ?signal,
                confidence,
                "strategy vote"
            );

            let direction = match signal {
                Signal::Buy => 1.0,
                Signal::Sell => -1.0,
                Signal::Hold => 0.0,
            };

            weighted_score += direction * confidence * weight;
            match signal {
                Signal::Buy => buy_confidence += confidence * weight,
                Signal::Sell => sell_confidence += confidence * weight,
                Signal::Hold => hold_confidence += confidence * weight,
            }
            total_weight += weight;
        }

        let (signal, winning_confidence) = if weighted_score > 0.0 {
            (Signal::Buy, buy_confidence)
        } else if weighted_score < 0.0 {
            (Signal::Sell, sell_confidence)
        } else {
            (Signal::Hold, hold_confidence)
        };

        let confidence = if total_weight > 0.0 {
            (winning_confidence / total_weight).min(1.0)
        } else {
            0.0
        };

        AggregateSignal { signal, confidence }
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
