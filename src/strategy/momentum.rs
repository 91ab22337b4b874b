use super::{closes, Strategy, StrategyVote};
use crate::indicators::{ema, ema_series, rsi, sma, std_dev};
use crate::models::{Candle, Signal};

/// SMA crossover: buy when the short average crosses above the long one,
/// sell on the opposite cross. Only the crossing candle votes.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    pub short_window: usize,
    pub long_window: usize,
}

impl Default for SmaCrossover {
    fn default() -> Self {
        Self {
            short_window: 10,
            long_window: 50,
        }
    }
}

impl Strategy for SmaCrossover {
    fn evaluate(&self, candles: &[Candle]) -> StrategyVote {
        let prices = closes(candles);
        if prices.len() < self.long_window + 1 {
            return StrategyVote::hold();
        }

        let prev = &prices[..prices.len() - 1];
        let (Some(short), Some(long), Some(prev_short), Some(prev_long)) = (
            sma(&prices, self.short_window),
            sma(&prices, self.long_window),
            sma(prev, self.short_window),
            sma(prev, self.long_window),
        ) else {
            return StrategyVote::hold();
        };

        if prev_short <= prev_long && short > long {
            StrategyVote {
                signal: Signal::Buy,
                confidence: 0.9,
            }
        } else if prev_short >= prev_long && short < long {
            StrategyVote {
                signal: Signal::Sell,
                confidence: 0.9,
            }
        } else {
            StrategyVote::hold()
        }
    }

    fn name(&self) -> &str {
        "sma_crossover"
    }
}

/// Rate-of-change momentum: buy while positive momentum is accelerating,
/// sell while negative momentum is accelerating.
#[derive(Debug, Clone)]
pub struct RocMomentum {
    pub period: usize,
}

impl Default for RocMomentum {
    fn default() -> Self {
        Self { period: 14 }
    }
}

impl Strategy for RocMomentum {
    fn evaluate(&self, candles: &[Candle]) -> StrategyVote {
        let prices = closes(candles);
        let n = prices.len();
        if n < self.period + 2 {
            return StrategyVote::hold();
        }

        let base_now = prices[n - 1 - self.period];
        let base_prev = prices[n - 2 - self.period];
        if base_now == 0.0 || base_prev == 0.0 {
            return StrategyVote::hold();
        }

        let roc_now = (prices[n - 1] - base_now) / base_now;
        let roc_prev = (prices[n - 2] - base_prev) / base_prev;

        if roc_now > 0.0 && roc_now > roc_prev {
            StrategyVote {
                signal: Signal::Buy,
                confidence: roc_now.abs(),
            }
        } else if roc_now < 0.0 && roc_now < roc_prev {
            StrategyVote {
                signal: Signal::Sell,
                confidence: roc_now.abs(),
            }
        } else {
            StrategyVote::hold()
        }
    }

    fn name(&self) -> &str {
        "roc_momentum"
    }
}

/// EMA trend filter: long while the fast EMA sits above the slow EMA.
#[derive(Debug, Clone)]
pub struct EmaCrossover {
    pub short_period: usize,
    pub long_period: usize,
}

impl Default for EmaCrossover {
    fn default() -> Self {
        Self {
            short_period: 12,
            long_period: 26,
        }
    }
}

impl Strategy for EmaCrossover {
    fn evaluate(&self, candles: &[Candle]) -> StrategyVote {
        let prices = closes(candles);
        let (Some(short), Some(long)) = (
            ema(&prices, self.short_period),
            ema(&prices, self.long_period),
        ) else {
            return StrategyVote::hold();
        };

        if short > long {
            StrategyVote {
                signal: Signal::Buy,
                confidence: 0.9,
            }
        } else if short < long {
            StrategyVote {
                signal: Signal::Sell,
                confidence: 0.9,
            }
        } else {
            StrategyVote::hold()
        }
    }

    fn name(&self) -> &str {
        "ema_crossover"
    }
}

/// MACD line / signal line crossover
#[derive(Debug, Clone)]
pub struct MacdCrossover {
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
}

impl Default for MacdCrossover {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

impl Strategy for MacdCrossover {
    fn evaluate(&self, candles: &[Candle]) -> StrategyVote {
        let prices = closes(candles);
        let (Some(fast), Some(slow)) = (
            ema_series(&prices, self.fast_period),
            ema_series(&prices, self.slow_period),
        ) else {
            return StrategyVote::hold();
        };

        let macd_line: Vec<f64> = fast.iter().zip(slow.iter()).map(|(f, s)| f - s).collect();
        let Some(signal_line) = ema_series(&macd_line, self.signal_period) else {
            return StrategyVote::hold();
        };

        if macd_line.len() < 2 || signal_line.len() < 2 {
            return StrategyVote::hold();
        }

        let n = macd_line.len();
        let divergence = (macd_line[n - 1] - signal_line[n - 1]).abs();

        if macd_line[n - 2] <= signal_line[n - 2] && macd_line[n - 1] > signal_line[n - 1] {
            StrategyVote {
                signal: Signal::Buy,
                confidence: divergence,
            }
        } else if macd_line[n - 2] >= signal_line[n - 2] && macd_line[n - 1] < signal_line[n - 1] {
            StrategyVote {
                signal: Signal::Sell,
                confidence: divergence,
            }
        } else {
            StrategyVote::hold()
        }
    }

    fn name(&self) -> &str {
        "macd_crossover"
    }
}

/// RSI mean reversion: sell overbought, buy oversold
#[derive(Debug, Clone)]
pub struct RsiReversal {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl Default for RsiReversal {
    fn default() -> Self {
        Self {
            period: 14,
            overbought: 70.0,
            oversold: 30.0,
        }
    }
}

impl Strategy for RsiReversal {
    fn evaluate(&self, candles: &[Candle]) -> StrategyVote {
        let prices = closes(candles);
        let Some(value) = rsi(&prices, self.period) else {
            return StrategyVote::hold();
        };

        if value > self.overbought {
            StrategyVote {
                signal: Signal::Sell,
                confidence: (value - self.overbought) / (100.0 - self.overbought),
            }
        } else if value < self.oversold {
            StrategyVote {
                signal: Signal::Buy,
                confidence: (self.oversold - value) / self.oversold,
            }
        } else {
            StrategyVote::hold()
        }
    }

    fn name(&self) -> &str {
        "rsi_reversal"
    }
}

/// Bollinger band breakout: a close outside the band is treated as a
/// momentum continuation in the breakout direction.
#[derive(Debug, Clone)]
pub struct BollingerBreakout {
    pub window: usize,
    pub num_std: f64,
}

impl Default for BollingerBreakout {
    fn default() -> Self {
        Self {
            window: 20,
            num_std: 2.0,
        }
    }
}

impl Strategy for BollingerBreakout {
    fn evaluate(&self, candles: &[Candle]) -> StrategyVote {
        let prices = closes(candles);
        let (Some(mid), Some(sd)) = (sma(&prices, self.window), std_dev(&prices, self.window))
        else {
            return StrategyVote::hold();
        };

        let upper = mid + self.num_std * sd;
        let lower = mid - self.num_std * sd;
        let last = match prices.last() {
            Some(p) => *p,
            None => return StrategyVote::hold(),
        };

        if last > upper && upper > 0.0 {
            StrategyVote {
                signal: Signal::Buy,
                confidence: ((last - upper) / upper).min(1.0),
            }
        } else if last < lower && lower > 0.0 {
            StrategyVote {
                signal: Signal::Sell,
                confidence: ((lower - last) / lower).min(1.0),
            }
        } else {
            StrategyVote::hold()
        }
    }

    fn name(&self) -> &str {
        "bollinger_breakout"
    }
}

/// Price momentum confirmed by above-average volume
#[derive(Debug, Clone)]
pub struct VolumeMomentum {
    pub momentum_period: usize,
    pub volume_period: usize,
}

impl Default for VolumeMomentum {
    fn default() -> Self {
        Self {
            momentum_period: 20,
            volume_period: 20,
        }
    }
}

impl Strategy for VolumeMomentum {
    fn evaluate(&self, candles: &[Candle]) -> StrategyVote {
        let prices = closes(candles);
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        if prices.len() < self.momentum_period || volumes.len() < self.volume_period {
            return StrategyVote::hold();
        }

        let price_change = prices[prices.len() - 1] - prices[prices.len() - self.momentum_period];

        let avg_volume = volumes.iter().rev().take(self.volume_period).sum::<f64>()
            / self.volume_period as f64;
        let current_volume = volumes[volumes.len() - 1];
        let volume_ratio = if avg_volume > 0.0 {
            current_volume / avg_volume
        } else {
            0.0
        };

        // Confidence capped at 1.0 (ratio of 2x average volume or more)
        let confidence = volume_ratio.min(2.0) / 2.0;

        if price_change > 0.0 && volume_ratio > 1.0 {
            StrategyVote {
                signal: Signal::Buy,
                confidence,
            }
        } else if price_change < 0.0 && volume_ratio > 1.0 {
            StrategyVote {
                signal: Signal::Sell,
                confidence,
            }
        } else {
            StrategyVote::hold()
        }
    }

    fn name(&self) -> &str {
        "volume_momentum"
    }
}
