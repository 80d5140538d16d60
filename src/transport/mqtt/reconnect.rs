//! Reconnection policy
//!
//! Pure retry cadence and termination logic. The manager counts consecutive
//! failures and asks the policy what to do after each one.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay between consecutive attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay after every failure
    Fixed { delay_ms: u64 },
    /// `initial_ms * multiplier^(n-1)`, capped at `max_ms`
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
    /// Explicit sequence, then `sustained_ms` once exhausted
    Pattern { delays_ms: Vec<u64>, sustained_ms: u64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            initial_ms: 500,
            multiplier: 2.0,
            max_ms: 30_000,
        }
    }
}

impl BackoffStrategy {
    /// Delay after the `failed_attempts`-th consecutive failure (1-based)
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        let index = failed_attempts.saturating_sub(1);
        match self {
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffStrategy::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                // Exponent is clamped so powi stays finite
                let exponent = index.min(64) as i32;
                let raw = *initial_ms as f64 * multiplier.powi(exponent);
                let capped = raw.min(*max_ms as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
            BackoffStrategy::Pattern {
                delays_ms,
                sustained_ms,
            } => {
                let delay = delays_ms
                    .get(index as usize)
                    .copied()
                    .unwrap_or(*sustained_ms);
                Duration::from_millis(delay)
            }
        }
    }

    /// Upper bound of any delay this strategy can produce
    pub fn ceiling(&self) -> Duration {
        match self {
            BackoffStrategy::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            BackoffStrategy::Exponential { max_ms, .. } => Duration::from_millis(*max_ms),
            BackoffStrategy::Pattern {
                delays_ms,
                sustained_ms,
            } => Duration::from_millis(
                delays_ms
                    .iter()
                    .copied()
                    .max()
                    .unwrap_or(0)
                    .max(*sustained_ms),
            ),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            BackoffStrategy::Fixed { delay_ms } if *delay_ms == 0 => {
                Err("fixed delay_ms must be greater than 0".to_string())
            }
            BackoffStrategy::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                if *initial_ms == 0 {
                    return Err("exponential initial_ms must be greater than 0".to_string());
                }
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err("exponential multiplier must be at least 1.0".to_string());
                }
                if max_ms < initial_ms {
                    return Err("exponential max_ms must not be below initial_ms".to_string());
                }
                Ok(())
            }
            BackoffStrategy::Pattern {
                delays_ms,
                sustained_ms,
            } => {
                if *sustained_ms == 0 || delays_ms.iter().any(|d| *d == 0) {
                    return Err("pattern delays must be greater than 0".to_string());
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Reconnection configuration (`[reconnect]` section)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Consecutive failures before the manager gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
        }
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        self.backoff.validate()
    }

    /// Total time spent sleeping between attempts before giving up
    pub fn calculate_max_total_time(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.backoff.delay_for(attempt))
            .sum()
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    RetryAfter(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Decide after `failed_attempts` consecutive failures (counting the one
    /// that just happened).
    pub fn on_attempt_failed(&self, failed_attempts: u32) -> ReconnectAction {
        if failed_attempts >= self.config.max_attempts {
            ReconnectAction::GiveUp
        } else {
            ReconnectAction::RetryAfter(self.config.backoff.delay_for(failed_attempts))
        }
    }

    /// Delay before retrying a session that dropped after being established
    pub fn link_loss_delay(&self) -> Duration {
        self.config.backoff.delay_for(1)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}
