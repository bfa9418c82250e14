//! Retry, timeout and slew completion settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Bounded exponential backoff for transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one (0 = no retries).
    pub max_retries: u32,
    /// Pause before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any pause.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// No retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Doubling backoff starting at `initial_backoff`, capped at
    /// `max_backoff`.
    #[must_use]
    pub const fn exponential(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff,
        }
    }

    /// Pause before retry number `retry` (1-based).
    ///
    /// Retry 0 is the first attempt and never waits.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |pause| pause.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(250), Duration::from_secs(4))
    }
}

/// When a slew counts as finished.
///
/// Slew actions may carry an `async` flag. With [`SlewCompletion::ByFlag`]
/// that flag selects fire-and-forget: the session stays
/// [`Slewing`](crate::session::SessionState::Slewing) until `get_status`
/// reports arrival. Without it the acknowledgement means the slew is done.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SlewCompletion {
    /// The action's `async` flag decides.
    #[default]
    ByFlag,
    /// Acknowledgement always completes the slew.
    Acknowledge,
    /// Completion is only ever observed through `get_status`.
    PollStatus,
}

/// Engine settings applied to every dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Deadline for one transport attempt.
    pub timeout: Duration,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Slew completion mode.
    pub slew_completion: SlewCompletion,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            slew_completion: SlewCompletion::default(),
        }
    }
}
