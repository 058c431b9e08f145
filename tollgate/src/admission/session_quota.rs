use crate::deadline::bounded;
use crate::error::Result;
use crate::store::CounterStore;
use std::time::Duration;

/// Lifetime request ceiling per identity
///
/// The counter carries no expiry; once over the ceiling the identity stays
/// denied until [`reset`](SessionQuota::reset) deletes the key.
pub(crate) struct SessionQuota {
    ceiling: i64,
    timeout: Duration,
}

impl SessionQuota {
    pub(crate) fn new(ceiling: i64, timeout: Duration) -> Self {
        Self { ceiling, timeout }
    }

    pub(crate) async fn check(&self, store: &dyn CounterStore, key: &str) -> Result<bool> {
        let total = bounded("session quota increment", self.timeout, store.incr(key)).await?;
        Ok(total <= self.ceiling)
    }

    pub(crate) async fn reset(&self, store: &dyn CounterStore, key: &str) -> Result<bool> {
        bounded("session quota reset", self.timeout, store.del(key)).await
    }
}
