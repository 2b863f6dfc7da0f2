use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::auth::{Authenticator, CredentialProvider, RedirectResolver};

/// Default coordinator port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default number of HTTP attempts per request (1 initial + 2 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-attempt timeout covering connect and read.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Statement submission path on the coordinator.
pub(crate) const STATEMENT_PATH: &str = "/v1/statement";

/// Query management path, used for cancellation.
pub(crate) const QUERY_PATH: &str = "/v1/query";

/// URL scheme used to reach the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// Plain HTTP (the coordinator default). Authenticated transports
    /// refuse this scheme at construction time.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exponential backoff policy for transient request failures.
///
/// Computes delay as `min(initial * multiplier^attempt, cap)` with optional
/// jitter of 0–25% to avoid synchronized retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Initial backoff duration (default: 100ms)
    pub initial: Duration,

    /// Maximum backoff duration (default: 10s)
    pub cap: Duration,

    /// Backoff multiplier for exponential growth (default: 2.0)
    pub multiplier: f64,

    /// Enable jitter to prevent thundering herd (default: true)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            cap: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom initial and cap durations.
    #[must_use]
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            ..Default::default()
        }
    }

    /// Fast policy for testing (1ms initial, 100ms cap, no jitter).
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            cap: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Policy with no delay between attempts.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial: Duration::ZERO,
            cap: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Backoff duration before retry number `attempt` (0-based).
    ///
    /// Safely handles degenerate policies (NaN, infinite or negative
    /// multipliers) instead of panicking.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        const MAX_BACKOFF_SECS: f64 = 86400.0;

        let attempt = i32::try_from(attempt).unwrap_or(i32::MAX);

        let multiplier = if self.multiplier.is_finite() && self.multiplier >= 0.0 {
            self.multiplier
        } else {
            1.0
        };

        let initial_secs = self.initial.as_secs_f64();
        let initial_secs = if initial_secs.is_finite() && initial_secs >= 0.0 {
            initial_secs
        } else {
            0.0
        };

        let cap_secs = self.cap.as_secs_f64();
        let cap_secs = if cap_secs.is_finite() && cap_secs >= 0.0 {
            cap_secs.min(MAX_BACKOFF_SECS)
        } else {
            MAX_BACKOFF_SECS
        };

        let base = initial_secs * multiplier.powi(attempt);
        let clamped = if base.is_finite() {
            base.min(cap_secs).max(0.0)
        } else {
            cap_secs
        };
        let duration = Duration::from_secs_f64(clamped);

        let duration = if self.jitter {
            let mut rng = rand::rng();
            let jitter_factor = rng.random_range(0.0..=0.25);
            duration + duration.mul_f64(jitter_factor)
        } else {
            duration
        };

        duration.min(Duration::from_secs_f64(cap_secs))
    }
}

/// Immutable client configuration, shared by the transport and the driver.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator host name.
    pub host: String,
    /// Coordinator TCP port.
    pub port: u16,
    /// URL scheme (`http` or `https`).
    pub scheme: Scheme,
    /// Maximum HTTP attempts per request (>= 1; 1 disables retries).
    pub max_attempts: u32,
    /// Per-attempt timeout covering connect and read.
    pub request_timeout: Duration,
    /// Backoff policy between retried attempts.
    pub retry: RetryPolicy,
    pub(crate) authenticator: Option<Arc<dyn Authenticator>>,
    pub(crate) redirect_resolver: Option<Arc<dyn RedirectResolver>>,
    pub(crate) credentials: Option<Arc<dyn CredentialProvider>>,
}

impl ClientConfig {
    /// URL for statement submission.
    #[must_use]
    pub fn statement_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme, self.host, self.port, STATEMENT_PATH
        )
    }

    /// URL for cancelling `query_id`.
    #[must_use]
    pub fn query_url(&self, query_id: &str) -> String {
        format!(
            "{}://{}:{}{}/{}",
            self.scheme, self.host, self.port, QUERY_PATH, query_id
        )
    }
}
