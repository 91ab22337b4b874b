use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;

use momentumbot::config::BotConfig;
use momentumbot::execution::{PositionManager, TradeError};
use momentumbot::feed::{
    CandleHandler, CandleWindow, LinkStatus, MarketDataLink, SimulatedTransport,
    SubscriptionTransport,
};
use momentumbot::gateway::{ExchangeGateway, PaperGateway};
use momentumbot::models::Candle;
use momentumbot::strategy::SignalPipeline;
use momentumbot::Result;

/// Receive-path glue: every closed candle updates the window, produces a
/// signal, and drives the position manager. A fatal trading error is
/// forwarded to the main loop instead of unwinding the feed.
struct TradingHandler {
    window: CandleWindow,
    pipeline: SignalPipeline,
    position_manager: Mutex<PositionManager>,
    gateway: Arc<PaperGateway>,
    fatal_tx: mpsc::Sender<TradeError>,
}

#[async_trait]
impl CandleHandler for TradingHandler {
    async fn on_closed_candle(&self, candle: Candle) {
        let price = candle.close;
        self.gateway.set_mark_price(price);
        self.window.push(candle);

        let candles = self.window.snapshot();
        let verdict = self.pipeline.evaluate(&candles);
        tracing::info!(
            candles = candles.len(),
            price,
            signal = ?verdict.signal,
            confidence = %format!("{:.2}", verdict.confidence),
            "new candle"
        );

        let mut position_manager = self.position_manager.lock().await;
        if let Err(e) = position_manager.manage_position(verdict.signal, price).await {
            let _ = self.fatal_tx.send(e).await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let config = BotConfig::from_env();

    tracing::info!("🚀 MomentumBot starting (paper trading)");
    tracing::info!("📊 Configuration:");
    tracing::info!("  Symbol: {} @ {}", config.symbol, config.interval);
    tracing::info!("  Starting Balance: ${:.2}", config.starting_balance);
    tracing::info!(
        "  Allocation: {}% per trade (cap ${:.0})",
        config.execution.allocation_pct * 100.0,
        config.execution.max_position_usd
    );
    tracing::info!("  Max Drawdown: {}%", config.risk.max_drawdown_pct);
    tracing::info!(
        "  Max Consecutive Losses: {}",
        config.risk.max_consecutive_losses
    );

    // Simulated market and paper account; swap these two for live wiring
    let sim_seed = env_u64("SIM_SEED", 42);
    let tick_every = Duration::from_millis(env_u64("SIM_TICK_MS", 2_000));
    let transport = Arc::new(SimulatedTransport::new(sim_seed, 30_000.0, tick_every));
    let gateway = Arc::new(PaperGateway::new(config.starting_balance));

    // Seed the rolling window with history before going live
    let window = CandleWindow::new(config.window_size);
    let history = transport
        .recent_candles(&config.symbol, &config.interval, config.window_size)
        .await?;
    tracing::info!("✓ Loaded {} historical candles", history.len());
    if let Some(last) = history.last() {
        gateway.set_mark_price(last.close);
    }
    for candle in history {
        window.push(candle);
    }

    let position_manager = PositionManager::new(
        gateway.clone() as Arc<dyn ExchangeGateway>,
        &config.symbol,
        config.execution.clone(),
        config.risk.clone(),
    )
    .await;

    let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
    let handler = Arc::new(TradingHandler {
        window,
        pipeline: SignalPipeline::standard(),
        position_manager: Mutex::new(position_manager),
        gateway,
        fatal_tx,
    });

    let link = MarketDataLink::new(
        transport,
        handler.clone(),
        &config.symbol,
        &config.interval,
        config.feed.clone(),
    );
    link.start().await?;

    tracing::info!("✅ Live loop running. Press Ctrl+C to stop...");

    let mut status_rx = link.status_rx();
    let outcome: Result<()> = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Interrupted by user, shutting down...");
            Ok(())
        }
        Some(e) = fatal_rx.recv() => {
            tracing::error!("{e}");
            Err(e.into())
        }
        _ = async {
            while status_rx.changed().await.is_ok() {
                if *status_rx.borrow() == LinkStatus::Stopped {
                    break;
                }
            }
        } => {
            tracing::error!("market data link stopped permanently");
            Err("market data link stopped permanently".into())
        }
    };

    link.stop(true).await;
    handler.position_manager.lock().await.shutdown().await;

    tracing::info!("👋 MomentumBot stopped");
    outcome
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "momentumbot=info".to_string()),
        )
        .init();
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
