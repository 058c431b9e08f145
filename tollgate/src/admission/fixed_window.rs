//! Fixed-window request counter
//!
//! The window starts lazily: whichever caller observes the post-increment
//! value `1` sets the expiry. Increments are atomic in the store, so exactly
//! one caller per window takes that branch even when first requests race.

use crate::deadline::bounded;
use crate::error::Result;
use crate::store::CounterStore;
use std::time::Duration;

pub(crate) struct FixedWindow {
    window: Duration,
    limit: i64,
    cooldown: Duration,
    timeout: Duration,
}

impl FixedWindow {
    pub(crate) fn new(window: Duration, limit: i64, cooldown: Duration, timeout: Duration) -> Self {
        Self {
            window,
            limit,
            cooldown,
            timeout,
        }
    }

    /// Count one request; false once the window is over its limit
    pub(crate) async fn check(&self, store: &dyn CounterStore, key: &str) -> Result<bool> {
        let count = bounded("window increment", self.timeout, store.incr(key)).await?;

        if count == 1 {
            bounded("window expiry", self.timeout, store.expire(key, self.window)).await?;
        }

        if count > self.limit {
            // Every request past the limit pushes the cooldown out again
            bounded("window cooldown", self.timeout, store.expire(key, self.cooldown)).await?;
            return Ok(false);
        }

        Ok(true)
    }
}
