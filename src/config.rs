//! Scanner configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::backoff::BackoffConfig;
use crate::{Error, Result};

/// Default number of objects requested per list call.
pub const DEFAULT_PAGE_SIZE: u32 = 5;

/// Default base interval between reconciliation cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound for the tick interval and retry delays. Jitter and deadline
/// arithmetic stay well clear of `Duration`/`Instant` overflow below it.
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Base tick interval; each tick is jittered by ±10%
    pub interval: Duration,
    pub page_size: u32,
    /// Regular expression; matching namespaces are not scanned
    pub namespace_ignore_pattern: Option<String>,
    pub backoff: BackoffConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
            namespace_ignore_pattern: None,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ScannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::ConfigError(
                "Reconcile interval must be greater than zero".to_string(),
            ));
        }
        if self.interval > MAX_INTERVAL {
            return Err(Error::ConfigError(format!(
                "Reconcile interval must be at most {}s, got {}s",
                MAX_INTERVAL.as_secs(),
                self.interval.as_secs()
            )));
        }
        if self.backoff.max_delay > MAX_INTERVAL || self.backoff.initial_delay > MAX_INTERVAL {
            return Err(Error::ConfigError(format!(
                "Retry delays must be at most {}s",
                MAX_INTERVAL.as_secs()
            )));
        }
        if self.page_size == 0 {
            return Err(Error::ConfigError(
                "Resources per list query must be greater than zero".to_string(),
            ));
        }
        if self.backoff.max_attempts == 0 {
            return Err(Error::ConfigError(
                "Retry attempts must be greater than zero".to_string(),
            ));
        }
        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(Error::ConfigError(format!(
                "Backoff multiplier must be at least 1.0, got {}",
                self.backoff.multiplier
            )));
        }
        Ok(())
    }
}
