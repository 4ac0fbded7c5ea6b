//! Retry Policy
//!
//! Backoff schedules for transient-failure retries in resilient calls.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategies for retry delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed {
        #[serde(rename = "delay_ms", with = "crate::config::duration_ms")]
        delay: Duration,
    },

    /// Exponential backoff: initial_delay * base^attempt_number
    Exponential {
        #[serde(rename = "initial_delay_ms", with = "crate::config::duration_ms")]
        initial_delay: Duration,
        base: f64,
        #[serde(rename = "max_delay_ms", with = "crate::config::duration_ms")]
        max_delay: Duration,
        jitter: bool,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_millis(100),
            base: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl BackoffStrategy {
    /// No delay at all; used by tests and tight in-process retries
    pub fn none() -> Self {
        Self::Fixed {
            delay: Duration::ZERO,
        }
    }

    /// Calculate delay for given retry number (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,

            Self::Exponential {
                initial_delay,
                base,
                max_delay,
                jitter,
            } => {
                let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
                let base_delay = initial_delay.as_millis() as f64 * base.powi(exponent);
                let capped = base_delay.min(max_delay.as_millis() as f64);
                let delay = Duration::from_millis(capped as u64);

                if *jitter {
                    Self::add_jitter(delay).min(*max_delay)
                } else {
                    delay
                }
            }
        }
    }

    /// Add jitter to delay (+/-25% random variation)
    fn add_jitter(delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_factor = rng.gen_range(0.75..=1.25);
        Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64)
    }
}

/// Retry settings for a resilient call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryConfig {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_calculation() {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(100),
            base: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: false,
        };

        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(strategy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(strategy.calculate_delay(2), Duration::from_millis(400));
        assert_eq!(strategy.calculate_delay(10), Duration::from_secs(10));
        assert_eq!(strategy.calculate_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(400),
            base: 1.0,
            max_delay: Duration::from_secs(1),
            jitter: true,
        };
        for _ in 0..50 {
            let delay = strategy.calculate_delay(3);
            assert!(delay >= Duration::from_millis(300));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_fixed_backoff() {
        let strategy = BackoffStrategy::Fixed {
            delay: Duration::from_millis(25),
        };
        assert_eq!(strategy.calculate_delay(0), Duration::from_millis(25));
        assert_eq!(strategy.calculate_delay(7), Duration::from_millis(25));
        assert_eq!(BackoffStrategy::none().calculate_delay(3), Duration::ZERO);
    }

    #[test]
    fn test_total_attempts() {
        let config = RetryConfig {
            max_retries: 2,
            backoff: BackoffStrategy::none(),
        };
        assert_eq!(config.total_attempts(), 3);
    }
}
