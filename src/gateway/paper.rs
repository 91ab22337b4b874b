use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::ExchangeGateway;
use crate::models::{OrderSide, PositionSnapshot, TradeRecord};
use crate::Result;

/// A resting conditional order on the paper account
#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub stop_price: f64,
    pub close_position: bool,
}

#[derive(Debug)]
struct PaperAccount {
    balance: f64,
    position_qty: f64,
    entry_price: f64,
    leverage: u32,
    mark_price: f64,
    open_orders: Vec<RestingOrder>,
    fills: Vec<TradeRecord>,
}

/// In-memory exchange simulation
///
/// Fills market orders instantly at the externally supplied mark price and
/// keeps a single signed position per account. Realized P&L settles into
/// the wallet balance on close; resting stops are recorded but only
/// executed by the position manager's own close path.
#[derive(Clone)]
pub struct PaperGateway {
    state: Arc<Mutex<PaperAccount>>,
}

impl PaperGateway {
    pub fn new(starting_balance: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(PaperAccount {
                balance: starting_balance,
                position_qty: 0.0,
                entry_price: 0.0,
                leverage: 1,
                mark_price: 0.0,
                open_orders: Vec::new(),
                fills: Vec::new(),
            })),
        }
    }

    /// Update the price market orders fill at
    pub fn set_mark_price(&self, price: f64) {
        let mut account = self.state.lock().unwrap();
        account.mark_price = price;
    }

    pub fn open_orders(&self) -> Vec<RestingOrder> {
        self.state.lock().unwrap().open_orders.clone()
    }

    pub fn fills(&self) -> Vec<TradeRecord> {
        self.state.lock().unwrap().fills.clone()
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn wallet_balance(&self) -> Result<f64> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn position_risk(&self, symbol: &str) -> Result<Option<PositionSnapshot>> {
        let account = self.state.lock().unwrap();
        if account.position_qty == 0.0 {
            return Ok(None);
        }

        Ok(Some(PositionSnapshot {
            symbol: symbol.to_string(),
            quantity: account.position_qty,
            entry_price: account.entry_price,
            leverage: account.leverage,
        }))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<()> {
        if quantity <= 0.0 {
            return Err("market order quantity must be positive".into());
        }

        let mut account = self.state.lock().unwrap();
        let price = account.mark_price;
        if price <= 0.0 {
            return Err("no mark price available".into());
        }

        let signed_qty = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };

        let held = account.position_qty;
        if held == 0.0 || held.signum() == signed_qty.signum() {
            // Opening or adding: average the entry price
            let total = held + signed_qty;
            account.entry_price = (account.entry_price * held.abs()
                + price * signed_qty.abs())
                / total.abs();
            account.position_qty = total;
        } else {
            // Reducing, closing, or flipping: settle P&L on the closed part
            let closed_qty = held.abs().min(signed_qty.abs());
            let pnl = (price - account.entry_price) * closed_qty * held.signum();
            account.balance += pnl;

            let remainder = held + signed_qty;
            account.position_qty = remainder;
            if remainder == 0.0 {
                account.entry_price = 0.0;
            } else if remainder.signum() != held.signum() {
                // Flipped through flat: the leftover opens at the fill price
                account.entry_price = price;
            }
        }

        account.fills.push(TradeRecord {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            timestamp: Utc::now(),
        });

        tracing::debug!(
            symbol,
            side = side.as_str(),
            quantity,
            price,
            position = account.position_qty,
            "paper fill"
        );

        Ok(())
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
        close_position: bool,
    ) -> Result<()> {
        if stop_price <= 0.0 {
            return Err("stop price must be positive".into());
        }

        let mut account = self.state.lock().unwrap();
        account.open_orders.push(RestingOrder {
            symbol: symbol.to_string(),
            side,
            stop_price,
            close_position,
        });

        Ok(())
    }

    async fn cancel_open_orders(&self, symbol: &str) -> Result<()> {
        let mut account = self.state.lock().unwrap();
        account.open_orders.retain(|o| o.symbol != symbol);
        Ok(())
    }
}
