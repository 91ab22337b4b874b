// Order gateway boundary
//
// The trading core only ever talks to an exchange through this trait;
// everything behind it (transport, signing, venue quirks) is supplied by
// the implementation.
pub mod paper;

use async_trait::async_trait;

use crate::models::{OrderSide, PositionSnapshot};
use crate::Result;

pub use paper::PaperGateway;

#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Total wallet balance in USD
    async fn wallet_balance(&self) -> Result<f64>;

    /// Current position for a symbol, None when flat
    async fn position_risk(&self, symbol: &str) -> Result<Option<PositionSnapshot>>;

    /// Fill a market order immediately
    async fn place_market_order(&self, symbol: &str, side: OrderSide, quantity: f64)
        -> Result<()>;

    /// Rest a conditional stop order that triggers at `stop_price`
    ///
    /// With `close_position` set the order flattens whatever is held when
    /// it triggers, regardless of quantity.
    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
        close_position: bool,
    ) -> Result<()>;

    /// Cancel every resting order for a symbol
    async fn cancel_open_orders(&self, symbol: &str) -> Result<()>;
}
