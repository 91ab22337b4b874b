use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::time::{timeout, Duration};

use crate::gateway::ExchangeGateway;
use crate::models::{OrderSide, PositionSnapshot, Signal};
use crate::risk::{RiskLimits, RiskManager};

/// Upper bound on any single exchange call so a hung gateway cannot
/// stall the receive path indefinitely
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Sizing and protective-order parameters
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Fraction of the wallet balance allocated per trade
    pub allocation_pct: f64,
    /// Stop-loss distance from entry, as a fraction of price
    pub stop_loss_pct: f64,
    /// Take-profit distance from entry; no take-profit order when None
    pub take_profit_pct: Option<f64>,
    /// Hard cap on position notional in USD
    pub max_position_usd: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            allocation_pct: 0.05,
            stop_loss_pct: 0.01,
            take_profit_pct: None,
            max_position_usd: 750.0,
        }
    }
}

/// Terminal trading failures surfaced to the owning process
#[derive(Debug, Error)]
pub enum TradeError {
    /// Drawdown or loss-streak limits tripped after a trade. The manager
    /// has already flattened and cancelled everything; the process must
    /// stop and wait for manual review.
    #[error("risk limits breached, trading halted")]
    RiskLimitsBreached,
}

/// Turns signals into exchange actions, gated by the risk manager
///
/// The exchange is treated as the source of truth for the held position:
/// every decision starts from a fresh snapshot, never from local state
/// carried across calls. Individual exchange failures are logged and the
/// cycle continues; only a risk breach is fatal.
pub struct PositionManager {
    gateway: Arc<dyn ExchangeGateway>,
    symbol: String,
    config: ExecutionConfig,
    risk: RiskManager,
    position: PositionSnapshot,
}

impl PositionManager {
    /// Create a manager and seed the risk baseline from the current
    /// wallet balance.
    pub async fn new(
        gateway: Arc<dyn ExchangeGateway>,
        symbol: &str,
        config: ExecutionConfig,
        limits: RiskLimits,
    ) -> Self {
        let symbol = symbol.to_uppercase();

        let starting_balance = match call_gateway("wallet balance", gateway.wallet_balance()).await
        {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!(%symbol, "failed to fetch starting balance: {e}");
                0.0
            }
        };

        Self {
            gateway,
            position: PositionSnapshot::flat(&symbol),
            symbol,
            config,
            risk: RiskManager::new(limits, starting_balance),
        }
    }

    /// Act on a signal at the given price
    ///
    /// Returns `Err(TradeError::RiskLimitsBreached)` only after a breach
    /// has been detected post-trade and the account has been flattened.
    pub async fn manage_position(
        &mut self,
        signal: Signal,
        price: f64,
    ) -> Result<(), TradeError> {
        let desired = match signal {
            Signal::Hold => {
                tracing::info!("signal is hold, no action taken");
                return Ok(());
            }
            Signal::Buy => OrderSide::Buy,
            Signal::Sell => OrderSide::Sell,
        };

        if price <= 0.0 {
            tracing::error!(price, "invalid price, cannot size order");
            return Ok(());
        }

        self.refresh_position().await;
        let wallet = self.wallet_balance().await;

        let allocation_usd = (wallet * self.config.allocation_pct).min(self.config.max_position_usd);
        let quantity = round_quantity(allocation_usd / price);

        if !self
            .risk
            .can_open_position(&self.symbol, wallet, allocation_usd)
        {
            tracing::warn!("risk limits prevent trade, skipping");
            return Ok(());
        }

        tracing::info!(
            signal = ?signal,
            allocation = %format!("{allocation_usd:.2}"),
            quantity = %format!("{quantity:.4}"),
            symbol = %self.symbol,
            "trade sized"
        );

        if self.position.held_side() == Some(desired) {
            tracing::info!("already positioned in the same direction, no action taken");
            return Ok(());
        }

        if !self.position.is_flat() {
            tracing::info!("reversing: closing existing position first");
            self.close_position().await;
        }

        self.open_position(desired, quantity, price).await;

        if self.risk.is_drawdown_exceeded() || self.risk.has_max_losses() {
            tracing::error!("post-trade risk limits breached, shutting down");
            self.shutdown().await;
            return Err(TradeError::RiskLimitsBreached);
        }

        Ok(())
    }

    /// Flatten the held position, cancel its conditional orders, and
    /// report the resulting balance to the risk manager.
    pub async fn close_position(&mut self) {
        self.refresh_position().await;

        let Some(held) = self.position.held_side() else {
            return;
        };
        let quantity = round_quantity(self.position.quantity.abs());
        if quantity == 0.0 {
            return;
        }

        self.cancel_conditional_orders().await;

        let side = held.opposite();
        match call_gateway(
            "market order",
            self.gateway.place_market_order(&self.symbol, side, quantity),
        )
        .await
        {
            Ok(()) => {
                tracing::info!(
                    side = side.as_str(),
                    quantity = %format!("{quantity:.4}"),
                    symbol = %self.symbol,
                    "closed position"
                );
                self.position = PositionSnapshot::flat(&self.symbol);

                let wallet = self.wallet_balance().await;
                self.risk.track_risk_after_trade(wallet);
            }
            Err(e) => {
                tracing::error!("failed to close position: {e}");
            }
        }
    }

    async fn open_position(&mut self, side: OrderSide, quantity: f64, price: f64) {
        self.cancel_conditional_orders().await;

        if let Err(e) = call_gateway(
            "market order",
            self.gateway.place_market_order(&self.symbol, side, quantity),
        )
        .await
        {
            tracing::error!("failed to open position: {e}");
            return;
        }
        tracing::info!(
            side = side.as_str(),
            quantity = %format!("{quantity:.4}"),
            symbol = %self.symbol,
            "opened position"
        );

        let opposite = side.opposite();

        let stop_price = round_price(match side {
            OrderSide::Buy => price * (1.0 - self.config.stop_loss_pct),
            OrderSide::Sell => price * (1.0 + self.config.stop_loss_pct),
        });
        match call_gateway(
            "stop order",
            self.gateway
                .place_stop_order(&self.symbol, opposite, stop_price, true),
        )
        .await
        {
            Ok(()) => tracing::info!(stop_price, "stop loss placed"),
            Err(e) => tracing::error!("failed to place stop loss: {e}"),
        }

        if let Some(take_profit_pct) = self.config.take_profit_pct {
            let tp_price = round_price(match side {
                OrderSide::Buy => price * (1.0 + take_profit_pct),
                OrderSide::Sell => price * (1.0 - take_profit_pct),
            });
            match call_gateway(
                "stop order",
                self.gateway
                    .place_stop_order(&self.symbol, opposite, tp_price, true),
            )
            .await
            {
                Ok(()) => tracing::info!(tp_price, "take profit placed"),
                Err(e) => tracing::error!("failed to place take profit: {e}"),
            }
        }
    }

    /// Cancel all conditional orders, force-close any open position, and
    /// leave the account flat. Called on risk breach and on operator stop;
    /// the process is expected to exit afterwards.
    pub async fn shutdown(&mut self) {
        tracing::info!("shutting down: closing positions and cancelling orders");
        self.cancel_conditional_orders().await;
        self.close_position().await;
    }

    pub fn position(&self) -> &PositionSnapshot {
        &self.position
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    async fn refresh_position(&mut self) {
        match call_gateway("position risk", self.gateway.position_risk(&self.symbol)).await {
            Ok(Some(snapshot)) => self.position = snapshot,
            Ok(None) => self.position = PositionSnapshot::flat(&self.symbol),
            Err(e) => {
                // Keep the last known snapshot; the next cycle retries
                tracing::error!("failed to refresh position info: {e}");
            }
        }
    }

    async fn wallet_balance(&self) -> f64 {
        match call_gateway("wallet balance", self.gateway.wallet_balance()).await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::error!("failed to fetch wallet balance: {e}");
                0.0
            }
        }
    }

    async fn cancel_conditional_orders(&self) {
        if let Err(e) = call_gateway(
            "cancel open orders",
            self.gateway.cancel_open_orders(&self.symbol),
        )
        .await
        {
            tracing::error!("failed to cancel open orders: {e}");
        }
    }
}

async fn call_gateway<T>(
    what: &str,
    call: impl Future<Output = crate::Result<T>>,
) -> crate::Result<T> {
    match timeout(GATEWAY_TIMEOUT, call).await {
        Ok(result) => result,
        Err(_) => Err(format!("{what} timed out after {}s", GATEWAY_TIMEOUT.as_secs()).into()),
    }
}

/// Exchange lot precision: three decimals of base quantity
fn round_quantity(quantity: f64) -> f64 {
    (quantity * 1_000.0).round() / 1_000.0
}

/// Exchange tick precision: two decimals of quote price
fn round_price(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
