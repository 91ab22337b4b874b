use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{sleep, Duration};

use super::transport::{MarketStream, SubscriptionTransport};
use crate::models::{Candle, KlineEvent};
use crate::Result;

/// Seeded random-walk market data source
///
/// Stands in for a real exchange stream: serves a deterministic candle
/// history and then emits one closed kline per tick. `tick_every` is the
/// real pause between klines, so a 1m market can be replayed much faster
/// than wall-clock time.
pub struct SimulatedTransport {
    seed: u64,
    start_price: f64,
    base_volume: f64,
    tick_every: Duration,
    last_price: Mutex<f64>,
}

impl SimulatedTransport {
    pub fn new(seed: u64, start_price: f64, tick_every: Duration) -> Self {
        Self {
            seed,
            start_price,
            base_volume: 1_000.0,
            tick_every,
            last_price: Mutex::new(start_price),
        }
    }
}

#[async_trait]
impl SubscriptionTransport for SimulatedTransport {
    async fn subscribe(&self, symbol: &str, interval: &str) -> Result<Box<dyn MarketStream>> {
        let interval_ms = interval_millis(interval)
            .ok_or_else(|| format!("unsupported interval: {interval}"))?;

        // Continue the walk where the served history left off
        let price = *self.last_price.lock().unwrap();
        let open_time = align_down(Utc::now().timestamp_millis(), interval_ms);

        tracing::info!(symbol, interval, price, "simulated market stream subscribed");

        Ok(Box::new(SimulatedStream {
            rng: StdRng::seed_from_u64(self.seed.wrapping_add(1)),
            price,
            base_volume: self.base_volume,
            open_time,
            interval_ms,
            tick_every: self.tick_every,
        }))
    }

    async fn recent_candles(
        &self,
        _symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let interval_ms = interval_millis(interval)
            .ok_or_else(|| format!("unsupported interval: {interval}"))?;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut price = self.start_price;
        let end = align_down(Utc::now().timestamp_millis(), interval_ms);

        let mut candles = Vec::with_capacity(limit);
        for i in 0..limit {
            let open_time = end - (limit as i64 - i as i64) * interval_ms;
            let candle = random_walk_candle(&mut rng, &mut price, self.base_volume, open_time);
            candles.push(candle);
        }

        *self.last_price.lock().unwrap() = price;
        Ok(candles)
    }
}

struct SimulatedStream {
    rng: StdRng,
    price: f64,
    base_volume: f64,
    open_time: i64,
    interval_ms: i64,
    tick_every: Duration,
}

#[async_trait]
impl MarketStream for SimulatedStream {
    async fn next_event(&mut self) -> Result<Option<KlineEvent>> {
        sleep(self.tick_every).await;

        self.open_time += self.interval_ms;
        let candle =
            random_walk_candle(&mut self.rng, &mut self.price, self.base_volume, self.open_time);

        Ok(Some(KlineEvent {
            open_time: candle.timestamp,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            is_final: true,
        }))
    }
}

fn random_walk_candle(
    rng: &mut StdRng,
    price: &mut f64,
    base_volume: f64,
    open_time: i64,
) -> Candle {
    let open = *price;
    let step = rng.gen_range(-0.003..0.003);
    let close = open * (1.0 + step);
    let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.001));
    let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.001));
    let volume = base_volume * rng.gen_range(0.5..1.5);
    *price = close;

    Candle {
        timestamp: open_time,
        open,
        high,
        low,
        close,
        volume,
    }
}

fn align_down(timestamp_ms: i64, interval_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(interval_ms)
}

/// Parse intervals like "30s", "1m", "4h", "1d" into milliseconds
pub fn interval_millis(interval: &str) -> Option<i64> {
    let (digits, unit) = interval.split_at(interval.len().checked_sub(1)?);
    let count: i64 = digits.parse().ok()?;
    if count <= 0 {
        return None;
    }

    let unit_ms = match unit {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => return None,
    };

    Some(count * unit_ms)
}
