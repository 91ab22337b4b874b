// Technical indicator primitives shared by the momentum strategies.
// All helpers take a price slice ordered oldest-first and return None
// when there is not enough history.

/// Simple Moving Average over the most recent `period` prices
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Full Exponential Moving Average series, seeded with the first price
///
/// Each element i is the EMA of prices[..=i].
pub fn ema_series(prices: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || prices.is_empty() {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut series = Vec::with_capacity(prices.len());
    let mut prev = prices[0];
    series.push(prev);

    for price in &prices[1..] {
        prev = price * k + prev * (1.0 - k);
        series.push(prev);
    }

    Some(series)
}

/// Latest Exponential Moving Average value
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).and_then(|s| s.last().copied())
}

/// Relative Strength Index over the most recent `period` price changes
///
/// Values above 70 are conventionally overbought, below 30 oversold.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    let mut gains = 0.0;
    let mut losses = 0.0;

    for window in prices[prices.len() - period - 1..].windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses += change.abs();
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

/// Population standard deviation of the most recent `period` prices
pub fn std_dev(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let window = &prices[prices.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / period as f64;

    Some(variance.sqrt())
}
