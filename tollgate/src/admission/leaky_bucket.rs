//! Leaky-bucket traffic shaping
//!
//! The bucket level lives in the store. Before each inspection the level is
//! drained by `elapsed * drain_rate` whole units, measured from the identity's
//! last drain timestamp. The timestamp only advances by the time those whole
//! units account for, so a steady stream of closely spaced requests still
//! drains at the configured rate instead of rounding every step down to zero.

use crate::clock::Clock;
use crate::deadline::bounded;
use crate::error::Result;
use crate::store::CounterStore;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[cfg(feature = "ahash")]
use ahash::AHashMap as HashMap;
#[cfg(not(feature = "ahash"))]
use std::collections::HashMap;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Where the last drain timestamp of each bucket is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainAnchor {
    /// In this process only
    ///
    /// Several server instances each drain from their own reference point,
    /// which over- or under-admits slightly under horizontal scaling.
    #[default]
    Local,
    /// In the counter store, shared by every instance
    ///
    /// Costs one extra read per check and one extra write per drain.
    Shared,
}

struct LocalAnchors {
    last_drain: HashMap<String, SystemTime>,
    next_sweep: SystemTime,
}

pub(crate) struct LeakyBucket {
    capacity: i64,
    drain_rate: u64,
    idle_ttl: Duration,
    anchor: DrainAnchor,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    local: Mutex<LocalAnchors>,
}

impl LeakyBucket {
    pub(crate) fn new(
        capacity: i64,
        drain_rate: u64,
        idle_ttl: Duration,
        anchor: DrainAnchor,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let next_sweep = clock.now() + idle_ttl;
        Self {
            capacity,
            drain_rate,
            idle_ttl,
            anchor,
            timeout,
            clock,
            local: Mutex::new(LocalAnchors {
                last_drain: HashMap::new(),
                next_sweep,
            }),
        }
    }

    /// Drain, inspect and, if there is room, add one unit
    pub(crate) async fn check(
        &self,
        store: &dyn CounterStore,
        identity: &str,
        bucket_key: &str,
        anchor_key: &str,
    ) -> Result<bool> {
        let now = self.clock.now();
        let outflow = match self.anchor {
            DrainAnchor::Local => self.local_outflow(identity, now),
            DrainAnchor::Shared => self.shared_outflow(store, anchor_key, now).await?,
        };

        let level = if outflow > 0 {
            let drained =
                bounded("bucket drain", self.timeout, store.decr_by(bucket_key, outflow)).await?;
            if drained < 0 {
                // Give back only the overshoot so concurrent increments survive
                let restored = bounded(
                    "bucket floor",
                    self.timeout,
                    store.decr_by(bucket_key, drained),
                )
                .await?;
                restored.max(0)
            } else {
                drained
            }
        } else {
            bounded("bucket read", self.timeout, store.get_int(bucket_key))
                .await?
                .unwrap_or(0)
        };

        if level >= self.capacity {
            tracing::debug!(identity, level, capacity = self.capacity, "bucket full");
            return Ok(false);
        }

        bounded("bucket increment", self.timeout, store.incr(bucket_key)).await?;

        if level == 0 {
            bounded(
                "bucket expiry",
                self.timeout,
                store.expire(bucket_key, self.idle_ttl),
            )
            .await?;
        }

        Ok(true)
    }

    fn local_outflow(&self, identity: &str, now: SystemTime) -> i64 {
        let mut guard = self.local.lock();
        let local = &mut *guard;

        if now >= local.next_sweep {
            // Buckets idle this long have expired in the store already
            let idle_ttl = self.idle_ttl;
            local
                .last_drain
                .retain(|_, last| now.duration_since(*last).map_or(true, |idle| idle < idle_ttl));
            local.next_sweep = now + idle_ttl;
        }

        match local.last_drain.get_mut(identity) {
            Some(last) => {
                let (units, next) = self.drain_since(*last, now);
                *last = next;
                units
            }
            None => {
                local.last_drain.insert(identity.to_string(), now);
                0
            }
        }
    }

    async fn shared_outflow(
        &self,
        store: &dyn CounterStore,
        anchor_key: &str,
        now: SystemTime,
    ) -> Result<i64> {
        let stored = bounded("drain anchor read", self.timeout, store.get_int(anchor_key)).await?;
        let last = stored
            .and_then(|ms| u64::try_from(ms).ok())
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms));

        let (units, next) = match last {
            Some(last) => self.drain_since(last, now),
            None => (0, now),
        };

        if units > 0 || last.is_none() {
            let millis = next
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO)
                .as_millis();
            bounded(
                "drain anchor write",
                self.timeout,
                store.set(
                    anchor_key,
                    Bytes::from(millis.to_string()),
                    Some(self.idle_ttl),
                ),
            )
            .await?;
        }

        Ok(units)
    }

    /// Whole units drained between `last` and `now`, and the new anchor
    ///
    /// A clock that went backwards yields zero elapsed time and leaves the
    /// anchor where it was.
    fn drain_since(&self, last: SystemTime, now: SystemTime) -> (i64, SystemTime) {
        let elapsed = now.duration_since(last).unwrap_or(Duration::ZERO);
        let rate = u128::from(self.drain_rate);
        let units = elapsed.as_nanos() * rate / NANOS_PER_SEC;

        if units == 0 {
            return (0, last);
        }

        // An empty bucket has no fraction worth carrying
        if units >= self.capacity as u128 {
            return (i64::try_from(units).unwrap_or(i64::MAX), now);
        }

        let consumed = Duration::from_nanos((units * NANOS_PER_SEC / rate) as u64);
        (units as i64, last + consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn bucket(capacity: i64, drain_rate: u64) -> LeakyBucket {
        LeakyBucket::new(
            capacity,
            drain_rate,
            Duration::from_secs(60),
            DrainAnchor::Local,
            Duration::from_secs(1),
            Arc::new(ManualClock::new()),
        )
    }

    #[test]
    fn test_drain_carries_fraction() {
        let bucket = bucket(100, 50);
        let start = UNIX_EPOCH + Duration::from_secs(1_000);

        // 10ms at 50/s is half a unit: nothing drained, anchor unchanged
        let (units, next) = bucket.drain_since(start, start + Duration::from_millis(10));
        assert_eq!(units, 0);
        assert_eq!(next, start);

        // 30ms is 1.5 units: one drained, anchor moves by 20ms only
        let (units, next) = bucket.drain_since(start, start + Duration::from_millis(30));
        assert_eq!(units, 1);
        assert_eq!(next, start + Duration::from_millis(20));
    }

    #[test]
    fn test_drain_resets_anchor_when_bucket_would_be_empty() {
        let bucket = bucket(10, 50);
        let start = UNIX_EPOCH + Duration::from_secs(1_000);
        let now = start + Duration::from_millis(300);

        let (units, next) = bucket.drain_since(start, now);
        assert_eq!(units, 15);
        assert_eq!(next, now);
    }

    #[test]
    fn test_clock_regression_drains_nothing() {
        let bucket = bucket(10, 50);
        let start = UNIX_EPOCH + Duration::from_secs(1_000);

        let (units, next) = bucket.drain_since(start, start - Duration::from_secs(5));
        assert_eq!(units, 0);
        assert_eq!(next, start);
    }
}
