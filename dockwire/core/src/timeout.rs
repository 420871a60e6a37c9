//! Timeout Composition
//!
//! Every request resolves two deadlines (connect and read) from a
//! client-wide base value and an optional per-call override.
//!
//! # Precedence
//!
//! ```text
//! override Infinite  >  override After(d)  >  base Infinite  >  base After(d)  >  hard default
//! ```
//!
//! `Unset` means "no value supplied" and always falls through. `Infinite`
//! is the explicit "wait forever" sentinel and never falls through.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default deadline for establishing a channel.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for each read on an open channel.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// A timeout value as supplied by configuration or by a caller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutSpec {
    /// No value supplied; defer to the next level
    #[default]
    Unset,
    /// Explicit deadline
    After(Duration),
    /// Wait forever
    Infinite,
}

impl TimeoutSpec {
    /// Interpret a millisecond setting where `0` means "no timeout"
    ///
    /// This is the convention used by the config file and environment
    /// variables (`DOCKWIRE_READ_TIMEOUT_MS=0` streams events forever).
    #[must_use]
    pub fn from_millis_setting(ms: Option<u64>) -> Self {
        match ms {
            None => Self::Unset,
            Some(0) => Self::Infinite,
            Some(ms) => Self::After(Duration::from_millis(ms)),
        }
    }

    /// Whether a value was supplied at all
    #[must_use]
    pub fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }
}

impl From<Duration> for TimeoutSpec {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}

/// The effective deadline after resolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolvedTimeout {
    /// Fail once this much time has elapsed
    After(Duration),
    /// Never time out
    Infinite,
}

impl ResolvedTimeout {
    /// Duration if finite
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::After(d) => Some(*d),
            Self::Infinite => None,
        }
    }

    /// Run `fut` under this deadline
    ///
    /// Returns `None` if the deadline elapsed first. The future is dropped
    /// on expiry, so any I/O it was driving is cancelled.
    pub async fn run<F: Future>(self, fut: F) -> Option<F::Output> {
        match self {
            Self::After(d) => tokio::time::timeout(d, fut).await.ok(),
            Self::Infinite => Some(fut.await),
        }
    }
}

/// Merge a base timeout with a per-call override
///
/// Total and side-effect free: every combination yields exactly one of
/// `After(_)` or `Infinite`.
#[must_use]
pub fn resolve(base: TimeoutSpec, over: TimeoutSpec, hard_default: Duration) -> ResolvedTimeout {
    match (over, base) {
        (TimeoutSpec::Infinite, _) => ResolvedTimeout::Infinite,
        (TimeoutSpec::After(d), _) => ResolvedTimeout::After(d),
        (TimeoutSpec::Unset, TimeoutSpec::Infinite) => ResolvedTimeout::Infinite,
        (TimeoutSpec::Unset, TimeoutSpec::After(d)) => ResolvedTimeout::After(d),
        (TimeoutSpec::Unset, TimeoutSpec::Unset) => ResolvedTimeout::After(hard_default),
    }
}

/// Client-level or call-level pair of timeouts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Deadline for opening a channel
    pub connect: TimeoutSpec,
    /// Deadline for each read once the request is written
    pub read: TimeoutSpec,
}

impl Timeouts {
    /// Resolve both deadlines against a per-call override
    #[must_use]
    pub fn resolve_with(&self, over: &Timeouts) -> (ResolvedTimeout, ResolvedTimeout) {
        (
            resolve(self.connect, over.connect, DEFAULT_CONNECT_TIMEOUT),
            resolve(self.read, over.read, DEFAULT_READ_TIMEOUT),
        )
    }
}
