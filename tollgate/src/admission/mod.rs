//! Per-identity admission control
//!
//! Every gated operation calls [`AdmissionController::admit`] once, before any
//! side effect. Three independent gates are evaluated against the shared
//! counter store, always in the same order:
//!
//! 1. fixed window: at most `window_limit` requests per `window`, with a
//!    longer cooldown once the limit is crossed
//! 2. session quota: a lifetime ceiling that never decays on its own
//! 3. leaky bucket: traffic shaping at a constant drain rate
//!
//! All three run on every call so that their counters stay consistent; the
//! request is admitted only if none of them denies it. A store failure aborts
//! the evaluation and is returned as an [`Error`], never as a denial.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tollgate::{AdmissionConfig, AdmissionController, Decision, MemoryStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tollgate::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let controller = AdmissionController::new(store, AdmissionConfig::default())?;
//!
//! match controller.admit("ID-1").await? {
//!     Decision::Allowed => println!("proceed"),
//!     Decision::Denied(reasons) => println!("rejected: {reasons:?}"),
//! }
//! # Ok(())
//! # }
//! ```

mod fixed_window;
mod leaky_bucket;
mod session_quota;


pub use leaky_bucket::DrainAnchor;

use self::fixed_window::FixedWindow;
use self::leaky_bucket::LeakyBucket;
use self::session_quota::SessionQuota;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::store::CounterStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the three admission gates
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Length of one fixed window
    pub window: Duration,
    /// Requests admitted per window
    pub window_limit: i64,
    /// Expiry forced onto the window key once the limit is crossed
    pub cooldown: Duration,
    /// Lifetime ceiling on requests per identity
    pub session_quota: i64,
    /// Leaky bucket size in units
    pub bucket_capacity: i64,
    /// Units drained per second
    pub drain_rate: u64,
    /// Expiry set on a bucket when it is first filled
    pub bucket_idle_ttl: Duration,
    /// Where the last drain timestamp is kept
    pub drain_anchor: DrainAnchor,
    /// Bound on every counter store round trip
    pub store_timeout: Duration,
    /// Prepended to every key, e.g. `"hip:"`
    pub key_prefix: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(20),
            window_limit: 30,
            cooldown: Duration::from_secs(300),
            session_quota: 300,
            bucket_capacity: 30,
            drain_rate: 50,
            bucket_idle_ttl: Duration::from_secs(60),
            drain_anchor: DrainAnchor::Local,
            store_timeout: Duration::from_millis(500),
            key_prefix: String::new(),
        }
    }
}

impl AdmissionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() || self.cooldown.is_zero() || self.bucket_idle_ttl.is_zero() {
            return Err(Error::InvalidConfig(
                "window, cooldown and bucket idle ttl must be non-zero".to_string(),
            ));
        }
        if self.window_limit <= 0 || self.session_quota <= 0 || self.bucket_capacity <= 0 {
            return Err(Error::InvalidConfig(
                "window limit, session quota and bucket capacity must be positive".to_string(),
            ));
        }
        if self.drain_rate == 0 {
            return Err(Error::InvalidConfig("drain rate must be positive".to_string()));
        }
        if self.store_timeout.is_zero() {
            return Err(Error::InvalidConfig("store timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Why a gate refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Too many requests in the current fixed window
    WindowExceeded,
    /// The lifetime quota is used up until an operator resets it
    SessionQuotaExhausted,
    /// The leaky bucket is full
    BucketFull,
    /// The store failed and the fail-closed policy applied
    StoreUnavailable,
}

/// Outcome of a successful admission evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Every gate that refused the request, in evaluation order
    Denied(Vec<DenyReason>),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn reasons(&self) -> &[DenyReason] {
        match self {
            Decision::Allowed => &[],
            Decision::Denied(reasons) => reasons,
        }
    }
}

/// What to do when the store cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Treat the failure like a denial
    #[default]
    FailClosed,
    /// Let the request through
    FailOpen,
}

/// Admission controller over a shared counter store
///
/// Holds no counters itself: all state lives in the injected store except the
/// per-identity drain timestamps of [`DrainAnchor::Local`].
pub struct AdmissionController {
    store: Arc<dyn CounterStore>,
    key_prefix: String,
    window: FixedWindow,
    quota: SessionQuota,
    bucket: LeakyBucket,
}

impl AdmissionController {
    /// Create a controller using the system clock
    pub fn new(store: Arc<dyn CounterStore>, config: AdmissionConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a controller whose drain timing follows `clock`
    pub fn with_clock(
        store: Arc<dyn CounterStore>,
        config: AdmissionConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            store,
            window: FixedWindow::new(
                config.window,
                config.window_limit,
                config.cooldown,
                config.store_timeout,
            ),
            quota: SessionQuota::new(config.session_quota, config.store_timeout),
            bucket: LeakyBucket::new(
                config.bucket_capacity,
                config.drain_rate,
                config.bucket_idle_ttl,
                config.drain_anchor,
                config.store_timeout,
                clock,
            ),
            key_prefix: config.key_prefix,
        })
    }

    /// Decide whether `identity` may proceed
    ///
    /// # Errors
    ///
    /// Any store failure or timeout. The caller owns the retry policy and
    /// must not read an error as a denial; see
    /// [`admit_with_policy`](Self::admit_with_policy).
    pub async fn admit(&self, identity: &str) -> Result<Decision> {
        let store = self.store.as_ref();
        let mut denials = Vec::new();

        if !self.window.check(store, &self.key("rate_limit", identity)).await? {
            denials.push(DenyReason::WindowExceeded);
        }

        if !self.quota.check(store, &self.key("total_count", identity)).await? {
            denials.push(DenyReason::SessionQuotaExhausted);
        }

        let admitted = self
            .bucket
            .check(
                store,
                identity,
                &self.key("leaky_bucket", identity),
                &self.key("leaky_bucket_drain", identity),
            )
            .await?;
        if !admitted {
            denials.push(DenyReason::BucketFull);
        }

        if denials.is_empty() {
            tracing::trace!(identity, "admitted");
            Ok(Decision::Allowed)
        } else {
            tracing::debug!(identity, reasons = ?denials, "admission denied");
            Ok(Decision::Denied(denials))
        }
    }

    /// Like [`admit`](Self::admit), but folds store failures into a decision
    ///
    /// The failure is logged at error level so it stays distinguishable from
    /// ordinary denials.
    pub async fn admit_with_policy(&self, identity: &str, policy: FailurePolicy) -> Decision {
        match self.admit(identity).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(identity, error = %e, ?policy, "admission check failed");
                match policy {
                    FailurePolicy::FailClosed => Decision::Denied(vec![DenyReason::StoreUnavailable]),
                    FailurePolicy::FailOpen => Decision::Allowed,
                }
            }
        }
    }

    /// Clear the session quota for `identity`
    ///
    /// Returns true if a counter existed.
    pub async fn reset_session(&self, identity: &str) -> Result<bool> {
        let reset = self
            .quota
            .reset(self.store.as_ref(), &self.key("total_count", identity))
            .await?;
        tracing::info!(identity, reset, "session quota reset");
        Ok(reset)
    }

    fn key(&self, kind: &str, identity: &str) -> String {
        format!("{}{kind}:{identity}", self.key_prefix)
    }
}
