use async_trait::async_trait;

use crate::models::{Candle, KlineEvent};
use crate::Result;

/// A live kline stream for one symbol/interval subscription
///
/// `next_event` resolves with `Ok(None)` when the stream ends cleanly and
/// `Err` on a transport failure; either way the stream is finished and the
/// link reconnects.
#[async_trait]
pub trait MarketStream: Send {
    async fn next_event(&mut self) -> Result<Option<KlineEvent>>;
}

/// Market data source boundary
///
/// Implementations own the wire protocol; the link only sees subscribe
/// and a pull-based event stream.
#[async_trait]
pub trait SubscriptionTransport: Send + Sync {
    async fn subscribe(&self, symbol: &str, interval: &str) -> Result<Box<dyn MarketStream>>;

    /// Most recent closed candles, oldest first, used to seed the rolling
    /// window before going live.
    async fn recent_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>>;
}

/// Receiver for closed candles, supplied by the caller at link creation
#[async_trait]
pub trait CandleHandler: Send + Sync {
    async fn on_closed_candle(&self, candle: Candle);
}
