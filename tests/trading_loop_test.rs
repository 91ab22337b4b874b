use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};

use momentumbot::execution::{ExecutionConfig, PositionManager, TradeError};
use momentumbot::feed::{
    CandleHandler, CandleWindow, FeedConfig, LinkStatus, MarketDataLink, MarketStream,
    SimulatedTransport, SubscriptionTransport,
};
use momentumbot::gateway::{ExchangeGateway, PaperGateway};
use momentumbot::models::{Candle, KlineEvent, OrderSide, Signal};
use momentumbot::risk::RiskLimits;
use momentumbot::strategy::{SignalPipeline, Strategy, StrategyVote};
use momentumbot::Result;

/// Transport that replays a fixed list of closed klines, then stays
/// silently connected.
struct ReplayTransport {
    klines: StdMutex<VecDeque<KlineEvent>>,
}

impl ReplayTransport {
    fn from_closes(closes: &[f64]) -> Arc<Self> {
        let klines = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| KlineEvent {
                open_time: 1_700_000_000_000 + i as i64 * 60_000,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000.0,
                is_final: true,
            })
            .collect();

        Arc::new(Self {
            klines: StdMutex::new(klines),
        })
    }
}

struct ReplayStream {
    klines: VecDeque<KlineEvent>,
}

#[async_trait]
impl MarketStream for ReplayStream {
    async fn next_event(&mut self) -> Result<Option<KlineEvent>> {
        match self.klines.pop_front() {
            Some(event) => Ok(Some(event)),
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl SubscriptionTransport for ReplayTransport {
    async fn subscribe(&self, _symbol: &str, _interval: &str) -> Result<Box<dyn MarketStream>> {
        let klines = std::mem::take(&mut *self.klines.lock().unwrap());
        Ok(Box::new(ReplayStream { klines }))
    }

    async fn recent_candles(
        &self,
        _symbol: &str,
        _interval: &str,
        _limit: usize,
    ) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }
}

/// Deterministic trend follower: long while the window is rising end to
/// end, short while it is falling.
struct TrendFollower;

impl Strategy for TrendFollower {
    fn evaluate(&self, candles: &[Candle]) -> StrategyVote {
        if candles.len() < 2 {
            return StrategyVote::hold();
        }

        let first = candles[0].close;
        let last = candles[candles.len() - 1].close;

        let signal = if last > first {
            Signal::Buy
        } else if last < first {
            Signal::Sell
        } else {
            Signal::Hold
        };

        StrategyVote {
            signal,
            confidence: 1.0,
        }
    }

    fn name(&self) -> &str {
        "trend_follower"
    }
}

/// Same receive-path glue the binary uses
struct TestHandler {
    window: CandleWindow,
    pipeline: SignalPipeline,
    position_manager: Mutex<PositionManager>,
    gateway: Arc<PaperGateway>,
    fatal: StdMutex<Option<TradeError>>,
}

#[async_trait]
impl CandleHandler for TestHandler {
    async fn on_closed_candle(&self, candle: Candle) {
        let price = candle.close;
        self.gateway.set_mark_price(price);
        self.window.push(candle);

        let verdict = self.pipeline.evaluate(&self.window.snapshot());

        let mut position_manager = self.position_manager.lock().await;
        if let Err(e) = position_manager.manage_position(verdict.signal, price).await {
            *self.fatal.lock().unwrap() = Some(e);
        }
    }
}

async fn build_handler(
    gateway: Arc<PaperGateway>,
    execution: ExecutionConfig,
    limits: RiskLimits,
) -> Arc<TestHandler> {
    let position_manager = PositionManager::new(
        gateway.clone() as Arc<dyn ExchangeGateway>,
        "BTCUSDT",
        execution,
        limits,
    )
    .await;

    Arc::new(TestHandler {
        window: CandleWindow::new(50),
        pipeline: SignalPipeline::new(vec![Box::new(TrendFollower)]),
        position_manager: Mutex::new(position_manager),
        gateway,
        fatal: StdMutex::new(None),
    })
}

#[tokio::test(start_paused = true)]
async fn test_signals_drive_entry_and_reversal() {
    // Uptrend entering at 101, then a drop below the window start flips
    // the signal to sell.
    let transport =
        ReplayTransport::from_closes(&[100.0, 101.0, 102.0, 103.0, 104.0, 95.0]);
    let gateway = Arc::new(PaperGateway::new(10_000.0));
    let handler = build_handler(
        gateway.clone(),
        ExecutionConfig::default(),
        RiskLimits::default(),
    )
    .await;

    let link = MarketDataLink::new(
        transport,
        handler.clone(),
        "BTCUSDT",
        "1m",
        FeedConfig::default(),
    );
    link.start().await.unwrap();

    // Drain the replayed candles through the receive path
    sleep(Duration::from_secs(1)).await;

    // The long opened at 101 (5% of $10,000 = $500 -> 4.95 after lot
    // rounding) and was reversed at 95 for a $29.70 realized loss.
    let position = gateway.position_risk("BTCUSDT").await.unwrap().unwrap();
    assert!(position.quantity < 0.0, "expected a short after reversal");
    assert_eq!(position.entry_price, 95.0);

    let balance = gateway.wallet_balance().await.unwrap();
    assert!((balance - 9_970.30).abs() < 1e-6);

    // Exactly three fills: entry, reversal close, short entry
    let fills = gateway.fills();
    assert_eq!(fills.len(), 3);
    assert_eq!(fills[0].side, OrderSide::Buy);
    assert_eq!(fills[0].quantity, 4.95);
    assert_eq!(fills[1].side, OrderSide::Sell);
    assert_eq!(fills[1].quantity, 4.95);
    assert_eq!(fills[2].side, OrderSide::Sell);

    // Only the short's protective stop rests, above the entry
    let orders = gateway.open_orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].side, OrderSide::Buy);
    assert_eq!(orders[0].stop_price, 95.95);
    assert!(orders[0].close_position);

    // One losing reversal so far
    let pm = handler.position_manager.lock().await;
    assert_eq!(pm.risk().loss_streak(), 1);
    assert!(handler.fatal.lock().unwrap().is_none());
    drop(pm);

    link.stop(true).await;
    assert_eq!(link.current_status(), LinkStatus::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_crash_breaches_risk_and_halts() {
    // Oversized allocation so a single 10% crash exceeds the 5% drawdown
    // limit when the long is closed.
    let execution = ExecutionConfig {
        allocation_pct: 1.0,
        max_position_usd: 100_000.0,
        ..Default::default()
    };
    let limits = RiskLimits {
        max_position_usd: 100_000.0,
        ..Default::default()
    };

    let transport = ReplayTransport::from_closes(&[100.0, 101.0, 90.0]);
    let gateway = Arc::new(PaperGateway::new(10_000.0));
    let handler = build_handler(gateway.clone(), execution, limits).await;

    let link = MarketDataLink::new(
        transport,
        handler.clone(),
        "BTCUSDT",
        "1m",
        FeedConfig::default(),
    );
    link.start().await.unwrap();

    sleep(Duration::from_secs(1)).await;

    // The breach was surfaced as a fatal error and everything is flat
    assert!(matches!(
        *handler.fatal.lock().unwrap(),
        Some(TradeError::RiskLimitsBreached)
    ));
    assert!(gateway.position_risk("BTCUSDT").await.unwrap().is_none());
    assert!(gateway.open_orders().is_empty());

    let pm = handler.position_manager.lock().await;
    assert!(pm.risk().is_drawdown_exceeded());
    drop(pm);

    link.stop(true).await;
}

#[tokio::test]
async fn test_history_preload_fills_the_window() {
    let transport = SimulatedTransport::new(42, 30_000.0, Duration::from_millis(1));
    let window = CandleWindow::new(300);

    let history = transport
        .recent_candles("BTCUSDT", "1m", 300)
        .await
        .unwrap();
    assert_eq!(history.len(), 300);

    for candle in history {
        window.push(candle);
    }
    assert_eq!(window.len(), 300);

    // Live candles keep the window bounded at its capacity
    let mut stream = transport.subscribe("BTCUSDT", "1m").await.unwrap();
    for _ in 0..5 {
        let event = stream.next_event().await.unwrap().unwrap();
        assert!(event.is_final);
        window.push(event.into_candle());
    }
    assert_eq!(window.len(), 300);
}
