//! Bounded exponential backoff for the executable-path race.
//!
//! The peer can exit between the `SO_PEERCRED` read and the path lookup.
//! Only "process not found" is retried, a fixed number of times, with a
//! capped doubling delay. There is no wall-clock deadline loop.

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use super::{ExtractError, PathLookupError};

/// Retry policy for executable-path resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathRetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for PathRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }
}

impl PathRetryPolicy {
    /// Delay before retry number `retry` (0-based): `initial * 2^retry`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Total sleep if every retry is used.
    pub fn worst_case_sleep(&self) -> Duration {
        (0..self.max_retries)
            .map(|retry| self.delay_for(retry))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Resolve `pid`'s executable with `lookup`, sleeping via `sleep` between
/// attempts that report [`PathLookupError::ProcessNotFound`].
///
/// # Errors
///
/// [`ExtractError::PathResolutionRace`] once retries are exhausted,
/// [`ExtractError::PathResolution`] immediately for any other failure.
pub fn resolve_with_retry<F, S>(
    policy: &PathRetryPolicy,
    pid: i32,
    mut lookup: F,
    mut sleep: S,
) -> Result<PathBuf, ExtractError>
where
    F: FnMut(i32) -> Result<PathBuf, PathLookupError>,
    S: FnMut(Duration),
{
    let mut retries = 0u32;
    loop {
        match lookup(pid) {
            Ok(path) => {
                if retries > 0 {
                    debug!(pid, retries, "executable path resolved after retry");
                }
                return Ok(path);
            }
            Err(PathLookupError::ProcessNotFound { .. }) if retries < policy.max_retries => {
                let delay = policy.delay_for(retries);
                debug!(
                    pid,
                    retry = retries.saturating_add(1),
                    delay_us = u64::try_from(delay.as_micros()).unwrap_or(u64::MAX),
                    "peer process not found, backing off"
                );
                sleep(delay);
                retries = retries.saturating_add(1);
            }
            Err(PathLookupError::ProcessNotFound { .. }) => {
                return Err(ExtractError::PathResolutionRace {
                    pid,
                    attempts: retries.saturating_add(1),
                });
            }
            Err(PathLookupError::Io { source, .. }) => {
                return Err(ExtractError::PathResolution { pid, source });
            }
        }
    }
}
