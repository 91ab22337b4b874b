use serde::{Deserialize, Serialize};

/// Hard limits that gate every new position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum notional per position, in USD
    pub max_position_usd: f64,
    /// Consecutive losing trades before entries are blocked
    pub max_consecutive_losses: u32,
    /// Drawdown percentage that trips the kill switch (percent, not fraction)
    pub max_drawdown_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_usd: 750.0,
            max_consecutive_losses: 5,
            max_drawdown_pct: 5.0,
        }
    }
}

/// Tracks loss streak, peak balance and drawdown, and decides whether a
/// new position may be opened.
///
/// Once the drawdown latch trips, entries stay blocked until [`reset`]
/// re-baselines the whole state; the owning process is expected to shut
/// down instead.
///
/// [`reset`]: RiskManager::reset
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    starting_balance: f64,
    peak_balance: f64,
    current_drawdown_pct: f64,
    loss_streak: u32,
    drawdown_triggered: bool,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, starting_balance: f64) -> Self {
        Self {
            limits,
            starting_balance,
            peak_balance: starting_balance,
            current_drawdown_pct: 0.0,
            loss_streak: 0,
            drawdown_triggered: false,
        }
    }

    /// Update peak balance and the drawdown measured against that peak
    fn update_balance(&mut self, current_balance: f64) {
        if current_balance > self.peak_balance {
            self.peak_balance = current_balance;
            tracing::info!(peak = %format!("{current_balance:.2}"), "new peak balance");
        }

        self.current_drawdown_pct = if self.peak_balance > 0.0 {
            100.0 * (self.peak_balance - current_balance) / self.peak_balance
        } else {
            0.0
        };
    }

    /// Check whether a new position is permitted
    ///
    /// Gates are evaluated in order and short-circuit on the first failure:
    /// drawdown from peak, position notional, loss streak. A drawdown
    /// failure also trips the latch.
    pub fn can_open_position(
        &mut self,
        symbol: &str,
        current_balance: f64,
        position_usd: f64,
    ) -> bool {
        self.update_balance(current_balance);

        if self.current_drawdown_pct > self.limits.max_drawdown_pct {
            tracing::warn!(
                symbol,
                drawdown_pct = %format!("{:.2}", self.current_drawdown_pct),
                max = self.limits.max_drawdown_pct,
                "drawdown exceeds limit, blocking entry"
            );
            self.drawdown_triggered = true;
            return false;
        }

        if position_usd > self.limits.max_position_usd {
            tracing::warn!(
                symbol,
                position_usd = %format!("{position_usd:.2}"),
                max = self.limits.max_position_usd,
                "position size exceeds limit, blocking entry"
            );
            return false;
        }

        if self.loss_streak >= self.limits.max_consecutive_losses {
            tracing::warn!(
                symbol,
                loss_streak = self.loss_streak,
                max = self.limits.max_consecutive_losses,
                "max consecutive losses reached, blocking entry"
            );
            return false;
        }

        true
    }

    /// Update loss streak and drawdown state after a position is closed or
    /// a trade settles.
    ///
    /// The P&L here is measured against the starting balance, not the peak;
    /// crossing `-max_drawdown_pct` on that measure also trips the latch.
    pub fn track_risk_after_trade(&mut self, wallet_balance: f64) {
        let pnl_pct = if self.starting_balance != 0.0 {
            100.0 * (wallet_balance - self.starting_balance) / self.starting_balance
        } else {
            0.0
        };

        if pnl_pct < 0.0 {
            self.loss_streak += 1;
            tracing::warn!(loss_streak = self.loss_streak, "loss streak incremented");
        } else {
            if self.loss_streak > 0 {
                tracing::info!(from = self.loss_streak, "loss streak reset");
            }
            self.loss_streak = 0;
        }

        self.update_balance(wallet_balance);

        if pnl_pct <= -self.limits.max_drawdown_pct {
            tracing::error!(
                pnl_pct = %format!("{pnl_pct:.2}"),
                "drawdown limit breached"
            );
            self.drawdown_triggered = true;
        }
    }

    /// Restore all risk state to the starting-balance baseline
    ///
    /// The only way to clear a tripped drawdown latch.
    pub fn reset(&mut self) {
        self.loss_streak = 0;
        self.drawdown_triggered = false;
        self.current_drawdown_pct = 0.0;
        self.peak_balance = self.starting_balance;
    }

    pub fn is_drawdown_exceeded(&self) -> bool {
        self.drawdown_triggered
    }

    pub fn has_max_losses(&self) -> bool {
        self.loss_streak >= self.limits.max_consecutive_losses
    }

    pub fn loss_streak(&self) -> u32 {
        self.loss_streak
    }

    pub fn current_drawdown_pct(&self) -> f64 {
        self.current_drawdown_pct
    }

    pub fn peak_balance(&self) -> f64 {
        self.peak_balance
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }
}
