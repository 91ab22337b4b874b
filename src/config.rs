use std::str::FromStr;

use crate::execution::ExecutionConfig;
use crate::feed::FeedConfig;
use crate::risk::RiskLimits;

/// Full bot configuration
///
/// Every component takes the piece it needs by value at construction;
/// nothing reads the environment after startup.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub symbol: String,
    pub interval: String,
    /// Rolling candle history depth
    pub window_size: usize,
    /// Paper account starting balance in USD
    pub starting_balance: f64,
    pub execution: ExecutionConfig,
    pub risk: RiskLimits,
    pub feed: FeedConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval: "1m".to_string(),
            window_size: 300,
            starting_balance: 15_000.0,
            execution: ExecutionConfig::default(),
            risk: RiskLimits::default(),
            feed: FeedConfig::default(),
        }
    }
}

impl BotConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            symbol: std::env::var("SYMBOL")
                .map(|s| s.to_uppercase())
                .unwrap_or(defaults.symbol),
            interval: std::env::var("INTERVAL").unwrap_or(defaults.interval),
            window_size: env_parse("WINDOW_SIZE", defaults.window_size),
            starting_balance: env_parse("STARTING_BALANCE", defaults.starting_balance),
            execution: ExecutionConfig {
                allocation_pct: env_parse("ALLOCATION_PCT", defaults.execution.allocation_pct),
                stop_loss_pct: env_parse("STOP_LOSS_PCT", defaults.execution.stop_loss_pct),
                take_profit_pct: std::env::var("TAKE_PROFIT_PCT")
                    .ok()
                    .and_then(|v| v.parse().ok()),
                max_position_usd: env_parse(
                    "MAX_POSITION_USD",
                    defaults.execution.max_position_usd,
                ),
            },
            risk: RiskLimits {
                max_position_usd: env_parse("MAX_POSITION_USD", defaults.risk.max_position_usd),
                max_consecutive_losses: env_parse(
                    "MAX_CONSECUTIVE_LOSSES",
                    defaults.risk.max_consecutive_losses,
                ),
                max_drawdown_pct: env_parse("MAX_DRAWDOWN_PCT", defaults.risk.max_drawdown_pct),
            },
            feed: FeedConfig {
                base_delay_secs: env_parse("RECONNECT_BASE_DELAY", defaults.feed.base_delay_secs),
                max_backoff_secs: env_parse("RECONNECT_MAX_BACKOFF", defaults.feed.max_backoff_secs),
                max_retries: env_parse("RECONNECT_MAX_RETRIES", defaults.feed.max_retries),
                retry_delay_secs: env_parse("RESTART_DELAY", defaults.feed.retry_delay_secs),
                health_timeout_secs: env_parse("HEALTH_TIMEOUT", defaults.feed.health_timeout_secs),
            },
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
