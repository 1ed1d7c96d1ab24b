use crate::config::CrawlerConfig;
use std::time::Duration;

/// Rate-limit and failure bookkeeping for one source
///
/// Each 429 is a strike. The cool-down doubles with every consecutive strike,
/// starting at `cooldown-base-secs` and capped at `cooldown-max-secs`. A clean
/// cycle clears the strikes.
///
/// Failed cycles are counted separately; a successful cycle resets the count.
#[derive(Debug, Clone, Default)]
pub struct SourceState {
    /// Consecutive rate-limit strikes
    pub strikes: u32,

    /// Consecutive cycles that ended in failure
    pub consecutive_failures: u32,
}

impl SourceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a rate-limit response and returns the cool-down to observe
    pub fn record_rate_limit(&mut self, config: &CrawlerConfig) -> Duration {
        self.strikes = self.strikes.saturating_add(1);
        self.cooldown_for_strike(config)
    }

    /// Clears strikes after a cycle that was not rate limited
    pub fn clear_rate_limit(&mut self) {
        self.strikes = 0;
    }

    /// True once the strike budget is spent
    pub fn is_exhausted(&self, config: &CrawlerConfig) -> bool {
        self.strikes >= config.max_rate_limit_strikes
    }

    /// Counts a failed cycle
    ///
    /// Returns true exactly when the count reaches `error-alert-threshold`,
    /// so a streak raises one alert.
    pub fn record_failure(&mut self, config: &CrawlerConfig) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures == config.error_alert_threshold
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    fn cooldown_for_strike(&self, config: &CrawlerConfig) -> Duration {
        let exponent = self.strikes.saturating_sub(1).min(16);
        let cooldown = config.cooldown_base().saturating_mul(1u32 << exponent);
        cooldown.min(config.cooldown_max())
    }
}
