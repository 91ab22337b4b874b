use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, Instant, MissedTickBehavior};

use super::transport::{CandleHandler, MarketStream, SubscriptionTransport};

/// Reconnect and liveness parameters for the market data link
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// First reconnect delay; doubles on every consecutive failure
    pub base_delay_secs: u64,
    /// Upper bound on the reconnect delay
    pub max_backoff_secs: u64,
    /// Consecutive connect failures before the feed gives up for good
    pub max_retries: u32,
    /// Pause between tearing a link down and reconnecting on restart
    pub retry_delay_secs: u64,
    /// Longest tolerated silence before the link is considered stale
    pub health_timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_backoff_secs: 60,
            max_retries: 10,
            retry_delay_secs: 5,
            health_timeout_secs: 30,
        }
    }
}

/// Fatal feed conditions surfaced to the owning process
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("max reconnect attempts exceeded ({attempts})")]
    MaxRetriesExceeded { attempts: u32 },
    #[error("link was force-stopped")]
    ForceStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Stopped,
    Connecting,
    Connected,
    Restarting,
}

struct ConnectionState {
    status: LinkStatus,
    /// Consecutive connect failures in the current attempt run
    retry_attempt: u32,
    /// Arrival time of the last transport message of any kind
    last_message: Instant,
    /// Once set by `stop(force=true)`, every restart path bails out until
    /// the next explicit `start`
    force_exit: bool,
}

struct LinkInner {
    transport: Arc<dyn SubscriptionTransport>,
    handler: Arc<dyn CandleHandler>,
    symbol: String,
    interval: String,
    config: FeedConfig,
    state: Mutex<ConnectionState>,
    /// Wakes any in-flight backoff or restart sleep on force stop
    stop_notify: Notify,
    status_tx: watch::Sender<LinkStatus>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Resilient subscription to one symbol/interval candle stream
///
/// Owns reconnection with exponential backoff, a liveness monitor that
/// restarts a silent connection, and the force-stop latch. Closed candles
/// are handed to the injected [`CandleHandler`] on the receive path, one
/// at a time.
///
/// All `start`/`stop`/`restart` transitions are serialized through a
/// single state mutex; the receive task and the health monitor never
/// mutate connection state directly. The handle is cheap to clone and all
/// clones drive the same link.
#[derive(Clone)]
pub struct MarketDataLink {
    inner: Arc<LinkInner>,
}

impl MarketDataLink {
    pub fn new(
        transport: Arc<dyn SubscriptionTransport>,
        handler: Arc<dyn CandleHandler>,
        symbol: &str,
        interval: &str,
        config: FeedConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(LinkStatus::Stopped);

        Self {
            inner: Arc::new(LinkInner {
                transport,
                handler,
                symbol: symbol.to_string(),
                interval: interval.to_string(),
                config,
                state: Mutex::new(ConnectionState {
                    status: LinkStatus::Stopped,
                    retry_attempt: 0,
                    last_message: Instant::now(),
                    force_exit: false,
                }),
                stop_notify: Notify::new(),
                status_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Establish the subscription and begin emitting closed candles
    ///
    /// Retries transport failures with exponential backoff and returns
    /// once connected. `Err(FeedError::MaxRetriesExceeded)` means the feed
    /// is dead and the owning process should stop.
    pub async fn start(&self) -> Result<(), FeedError> {
        {
            let mut state = self.inner.state.lock().await;
            // A fresh start clears the force-exit latch
            state.force_exit = false;
            state.retry_attempt = 0;
        }
        connect(Arc::clone(&self.inner)).await
    }

    /// Tear the subscription down
    ///
    /// With `force` set, any later internal restart attempt is suppressed
    /// until the next `start`, and in-flight backoff waits are woken.
    pub async fn stop(&self, force: bool) {
        {
            let mut state = self.inner.state.lock().await;
            if force {
                state.force_exit = true;
            }
            state.status = LinkStatus::Stopped;
        }
        if force {
            self.inner.stop_notify.notify_waiters();
        }
        self.inner.teardown().await;
        self.inner.publish(LinkStatus::Stopped);
        tracing::info!(force, symbol = %self.inner.symbol, "market data link stopped");
    }

    /// Observe status transitions; `Stopped` after a successful start is
    /// terminal (forced stop or retries exhausted).
    pub fn status_rx(&self) -> watch::Receiver<LinkStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn current_status(&self) -> LinkStatus {
        *self.inner.status_tx.borrow()
    }
}

impl LinkInner {
    async fn teardown(&self) {
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    fn publish(&self, status: LinkStatus) {
        self.status_tx.send_replace(status);
    }
}

/// Connect loop with exponential backoff; returns once the subscription
/// is live with its receive task and health monitor installed.
async fn connect(link: Arc<LinkInner>) -> Result<(), FeedError> {
    {
        let mut state = link.state.lock().await;
        state.status = LinkStatus::Connecting;
    }
    link.publish(LinkStatus::Connecting);
    tracing::info!(symbol = %link.symbol, interval = %link.interval, "connecting market data link");

    loop {
        let mut state = link.state.lock().await;
        if state.force_exit {
            state.status = LinkStatus::Stopped;
            drop(state);
            link.publish(LinkStatus::Stopped);
            return Err(FeedError::ForceStopped);
        }

        match link.transport.subscribe(&link.symbol, &link.interval).await {
            Ok(stream) => {
                state.status = LinkStatus::Connected;
                state.retry_attempt = 0;
                state.last_message = Instant::now();

                // Register the new tasks before releasing the state lock
                // so a concurrent stop cannot slip between the status
                // change and the teardown bookkeeping.
                spawn_receive(&link, stream).await;
                spawn_health_monitor(&link).await;

                drop(state);
                link.publish(LinkStatus::Connected);
                tracing::info!(symbol = %link.symbol, "market data link connected");
                return Ok(());
            }
            Err(e) => {
                state.retry_attempt += 1;
                let attempt = state.retry_attempt;

                if attempt >= link.config.max_retries {
                    state.status = LinkStatus::Stopped;
                    drop(state);
                    link.publish(LinkStatus::Stopped);
                    tracing::error!(attempts = attempt, "giving up on market data link: {e}");
                    return Err(FeedError::MaxRetriesExceeded { attempts: attempt });
                }

                let delay = backoff_delay(&link.config, attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_secs = delay.as_secs(),
                    "connect failed, retrying: {e}"
                );

                // Release the state lock while waiting so a force stop can
                // interrupt the backoff.
                drop(state);
                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = link.stop_notify.notified() => {
                        let mut state = link.state.lock().await;
                        state.status = LinkStatus::Stopped;
                        drop(state);
                        link.publish(LinkStatus::Stopped);
                        return Err(FeedError::ForceStopped);
                    }
                }
            }
        }
    }
}

/// Tear down and reconnect after the configured pause
///
/// Invoked from the receive path on stream loss and from the health
/// monitor on a stale feed; never runs once force-stopped.
async fn restart(link: Arc<LinkInner>) {
    {
        let mut state = link.state.lock().await;
        // Only a live link restarts; anything else means a stop or another
        // restart won the race.
        if state.force_exit || state.status != LinkStatus::Connected {
            return;
        }
        state.status = LinkStatus::Restarting;
    }
    link.publish(LinkStatus::Restarting);
    tracing::warn!(symbol = %link.symbol, "restarting market data link");

    // Old stream and monitor are gone before any new connect begins
    link.teardown().await;

    tokio::select! {
        _ = sleep(Duration::from_secs(link.config.retry_delay_secs)) => {}
        _ = link.stop_notify.notified() => return,
    }

    if link.state.lock().await.force_exit {
        return;
    }

    if let Err(e) = connect(link).await {
        tracing::error!("restart failed: {e}");
    }
}

/// Restart from a spawned task so the caller (receive task or health
/// monitor) can be torn down without cancelling the restart itself.
fn trigger_restart(link: &Arc<LinkInner>) {
    let link = Arc::clone(link);
    tokio::spawn(async move {
        restart(link).await;
    });
}

async fn spawn_receive(link: &Arc<LinkInner>, mut stream: Box<dyn MarketStream>) {
    let task_link = Arc::clone(link);
    let handle = tokio::spawn(async move {
        loop {
            match stream.next_event().await {
                Ok(Some(event)) => {
                    {
                        let mut state = task_link.state.lock().await;
                        state.last_message = Instant::now();
                    }

                    if event.is_final {
                        let candle = event.into_candle();
                        tracing::debug!(
                            timestamp = candle.timestamp,
                            close = candle.close,
                            "closed candle"
                        );
                        task_link.handler.on_closed_candle(candle).await;
                    }
                }
                Ok(None) => {
                    tracing::warn!("market stream ended");
                    break;
                }
                Err(e) => {
                    tracing::warn!("market stream error: {e}");
                    break;
                }
            }
        }

        let force_exit = task_link.state.lock().await.force_exit;
        if !force_exit {
            trigger_restart(&task_link);
        }
    });

    link.tasks.lock().await.push(handle);
}

async fn spawn_health_monitor(link: &Arc<LinkInner>) {
    let task_link = Arc::clone(link);
    let timeout = Duration::from_secs(link.config.health_timeout_secs);

    let handle = tokio::spawn(async move {
        let mut ticker = interval(timeout);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let (connected, silence) = {
                let state = task_link.state.lock().await;
                (
                    state.status == LinkStatus::Connected && !state.force_exit,
                    state.last_message.elapsed(),
                )
            };

            if !connected {
                return;
            }

            if silence > timeout {
                tracing::warn!(
                    silence_secs = silence.as_secs(),
                    "no messages within health timeout"
                );
                trigger_restart(&task_link);
                // A fresh monitor is installed by the next connect
                return;
            }
        }
    });

    link.tasks.lock().await.push(handle);
}

/// Delay before reconnect attempt `attempt` (zero-based):
/// `min(base * 2^attempt, cap)`
pub fn backoff_delay(config: &FeedConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt.min(32));
    let secs = config
        .base_delay_secs
        .saturating_mul(exp)
        .min(config.max_backoff_secs);
    Duration::from_secs(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candle, KlineEvent};
    use crate::Result;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Clone)]
    enum Step {
        Event(KlineEvent),
        Silence(Duration),
        End,
    }

    enum Plan {
        Fail,
        Stream(Vec<Step>),
    }

    /// Transport whose subscriptions follow a scripted plan; once the
    /// plans run out every further subscribe fails.
    struct ScriptedTransport {
        plans: StdMutex<VecDeque<Plan>>,
        subscribes: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(plans: Vec<Plan>) -> Arc<Self> {
            Arc::new(Self {
                plans: StdMutex::new(plans.into()),
                subscribes: AtomicUsize::new(0),
            })
        }

        fn subscribe_count(&self) -> usize {
            self.subscribes.load(Ordering::SeqCst)
        }
    }

    struct ScriptedStream {
        steps: VecDeque<Step>,
    }

    #[async_trait]
    impl MarketStream for ScriptedStream {
        async fn next_event(&mut self) -> Result<Option<KlineEvent>> {
            loop {
                match self.steps.pop_front() {
                    Some(Step::Event(event)) => return Ok(Some(event)),
                    Some(Step::Silence(duration)) => sleep(duration).await,
                    Some(Step::End) => return Ok(None),
                    // Stay connected but silent forever
                    None => std::future::pending::<()>().await,
                }
            }
        }
    }

    #[async_trait]
    impl SubscriptionTransport for ScriptedTransport {
        async fn subscribe(&self, _symbol: &str, _interval: &str) -> Result<Box<dyn MarketStream>> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            match self.plans.lock().unwrap().pop_front() {
                Some(Plan::Stream(steps)) => Ok(Box::new(ScriptedStream {
                    steps: steps.into(),
                })),
                Some(Plan::Fail) | None => Err("connection refused".into()),
            }
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

    struct CountingHandler {
        candles: StdMutex<Vec<Candle>>,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                candles: StdMutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.candles.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CandleHandler for CountingHandler {
        async fn on_closed_candle(&self, candle: Candle) {
            self.candles.lock().unwrap().push(candle);
        }
    }

    fn kline(open_time: i64, close: f64, is_final: bool) -> KlineEvent {
        KlineEvent {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1_000.0,
            is_final,
        }
    }

    fn test_config() -> FeedConfig {
        FeedConfig {
            base_delay_secs: 5,
            max_backoff_secs: 60,
            max_retries: 3,
            retry_delay_secs: 5,
            health_timeout_secs: 30,
        }
    }

    #[test]
    fn test_backoff_sequence_is_capped() {
        let config = FeedConfig {
            base_delay_secs: 5,
            max_backoff_secs: 60,
            ..Default::default()
        };

        let delays: Vec<u64> = (0..7)
            .map(|attempt| backoff_delay(&config, attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_after_transient_failures() {
        let transport = ScriptedTransport::new(vec![Plan::Fail, Plan::Fail, Plan::Stream(vec![])]);
        let handler = CountingHandler::new();
        let link = MarketDataLink::new(
            transport.clone(),
            handler,
            "BTCUSDT",
            "1m",
            test_config(),
        );

        link.start().await.unwrap();

        assert_eq!(transport.subscribe_count(), 3);
        assert_eq!(link.current_status(), LinkStatus::Connected);

        link.stop(true).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let transport = ScriptedTransport::new(vec![]);
        let handler = CountingHandler::new();
        let link = MarketDataLink::new(
            transport.clone(),
            handler,
            "BTCUSDT",
            "1m",
            test_config(),
        );

        let result = link.start().await;

        assert!(matches!(
            result,
            Err(FeedError::MaxRetriesExceeded { attempts: 3 })
        ));
        assert_eq!(transport.subscribe_count(), 3);
        assert_eq!(link.current_status(), LinkStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_stop_interrupts_backoff() {
        let transport = ScriptedTransport::new(vec![]);
        let handler = CountingHandler::new();
        let config = FeedConfig {
            max_retries: 100,
            ..test_config()
        };
        let link = MarketDataLink::new(transport.clone(), handler, "BTCUSDT", "1m", config);

        let starter = link.clone();
        let start_task = tokio::spawn(async move { starter.start().await });

        // Let the start task enter its backoff sleep, then force-stop
        tokio::task::yield_now().await;
        link.stop(true).await;

        let result = start_task.await.unwrap();
        assert!(matches!(result, Err(FeedError::ForceStopped)));
        assert_eq!(link.current_status(), LinkStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_final_klines_reach_the_handler() {
        let transport = ScriptedTransport::new(vec![Plan::Stream(vec![
            Step::Event(kline(0, 100.0, false)),
            Step::Event(kline(0, 100.5, false)),
            Step::Event(kline(0, 101.0, true)),
        ])]);
        let handler = CountingHandler::new();
        let link = MarketDataLink::new(
            transport.clone(),
            handler.clone(),
            "BTCUSDT",
            "1m",
            test_config(),
        );

        link.start().await.unwrap();

        // Let the receive task drain the scripted events
        sleep(Duration::from_secs(1)).await;

        assert_eq!(handler.count(), 1);
        assert_eq!(handler.candles.lock().unwrap()[0].close, 101.0);

        link.stop(true).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_loss_triggers_reconnect() {
        let transport = ScriptedTransport::new(vec![
            Plan::Stream(vec![Step::Event(kline(0, 100.0, true)), Step::End]),
            Plan::Stream(vec![]),
        ]);
        let handler = CountingHandler::new();
        let link = MarketDataLink::new(
            transport.clone(),
            handler,
            "BTCUSDT",
            "1m",
            test_config(),
        );

        link.start().await.unwrap();

        // Stream ends immediately; the link should wait retry_delay and
        // resubscribe on its own.
        sleep(Duration::from_secs(10)).await;

        assert_eq!(transport.subscribe_count(), 2);
        assert_eq!(link.current_status(), LinkStatus::Connected);

        link.stop(true).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_monitor_restarts_stale_link_once() {
        let transport = ScriptedTransport::new(vec![
            // One candle, then silence well past the health timeout
            Plan::Stream(vec![Step::Event(kline(0, 100.0, true))]),
            Plan::Stream(vec![]),
        ]);
        let handler = CountingHandler::new();
        let link = MarketDataLink::new(
            transport.clone(),
            handler,
            "BTCUSDT",
            "1m",
            test_config(),
        );

        link.start().await.unwrap();
        assert_eq!(transport.subscribe_count(), 1);

        // Health ticks at 30s (silence == timeout, tolerated) and 60s
        // (silence > timeout, restart); the reconnect lands at ~65s.
        sleep(Duration::from_secs(70)).await;

        assert_eq!(transport.subscribe_count(), 2);
        assert_eq!(link.current_status(), LinkStatus::Connected);

        link.stop(true).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_stop_suppresses_pending_restart() {
        let transport = ScriptedTransport::new(vec![Plan::Stream(vec![
            Step::Event(kline(0, 100.0, true)),
            Step::Silence(Duration::from_secs(2)),
            Step::End,
        ])]);
        let handler = CountingHandler::new();
        let link = MarketDataLink::new(
            transport.clone(),
            handler,
            "BTCUSDT",
            "1m",
            test_config(),
        );

        link.start().await.unwrap();
        link.stop(true).await;

        // Even after the scripted stream would have ended and the restart
        // pause elapsed, no reconnect may happen.
        sleep(Duration::from_secs(30)).await;

        assert_eq!(transport.subscribe_count(), 1);
        assert_eq!(link.current_status(), LinkStatus::Stopped);
    }
}
