//! Audit and notification emission
//!
//! The emitter shapes an [`AuditEvent`] into its category's JSON payload and
//! makes a single publish attempt on a [`DurableQueue`]. There is no retry on
//! the producer side: delivery is at most once.
//!
//! Whether a failed publish reaches the caller is decided once, by
//! [`EmitFailurePolicy`], rather than at each call site.

mod audit;
mod queue;


pub use audit::{AuditEvent, EventCategory, MISSED_CATEGORY};
pub use queue::{ChannelQueue, DurableQueue, QueuedMessage};

use crate::clock::{Clock, SystemClock};
use crate::deadline::bounded;
use crate::error::{Error, Result};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Queue receiving newly created patient records
pub const PATIENT_RECORDS_QUEUE: &str = "patient_records";
/// Queue receiving appointment changes
pub const APPOINTMENT_UPDATE_QUEUE: &str = "appointment_update";

/// What a failed publish means to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitFailurePolicy {
    /// Return the error; the caller decides how visible it is
    #[default]
    Propagate,
    /// Log a warning and report success
    LogAndContinue,
}

#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Queue that audit events are published to
    pub audit_queue: String,
    pub publish_timeout: Duration,
    pub failure_policy: EmitFailurePolicy,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            audit_queue: "logs".to_string(),
            publish_timeout: Duration::from_secs(1),
            failure_policy: EmitFailurePolicy::Propagate,
        }
    }
}

impl EmitterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.audit_queue.is_empty() {
            return Err(Error::InvalidConfig("audit queue name must not be empty".to_string()));
        }
        if self.publish_timeout.is_zero() {
            return Err(Error::InvalidConfig("publish timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

pub struct EventEmitter {
    queue: Arc<dyn DurableQueue>,
    config: EmitterConfig,
    clock: Arc<dyn Clock>,
}

impl EventEmitter {
    pub fn new(queue: Arc<dyn DurableQueue>, config: EmitterConfig) -> Result<Self> {
        Self::with_clock(queue, config, Arc::new(SystemClock))
    }

    /// Create an emitter whose event timestamps follow `clock`
    pub fn with_clock(
        queue: Arc<dyn DurableQueue>,
        config: EmitterConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            queue,
            config,
            clock,
        })
    }

    /// Shape `event` and publish it on the audit queue
    ///
    /// The timestamp is taken now, not when the event happened. An
    /// unrecognized category is published under the sentinel category and is
    /// never an error by itself.
    pub async fn emit(&self, event: &AuditEvent) -> Result<()> {
        if !event.category.is_recognized() {
            tracing::warn!(
                category = event.category.tag(),
                actor = %event.actor_identity,
                sentinel = MISSED_CATEGORY,
                "unrecognized audit category"
            );
        }

        let payload = event.to_payload(self.clock.now());
        let outcome = self
            .publish_json(&self.config.audit_queue, &payload)
            .await;
        self.settle(&self.config.audit_queue, event.category.tag(), outcome)
    }

    /// Publish an arbitrary record on `queue` under the same contract as [`emit`](Self::emit)
    ///
    /// The audit queue is refused with [`Error::ReservedQueue`] regardless of
    /// the failure policy, since everything on it must carry the audit shape.
    pub async fn forward<R>(&self, queue: &str, record: &R) -> Result<()>
    where
        R: Serialize + ?Sized,
    {
        if queue == self.config.audit_queue {
            return Err(Error::ReservedQueue {
                queue: queue.to_string(),
            });
        }
        let outcome = self.publish_json(queue, record).await;
        self.settle(queue, "record", outcome)
    }

    async fn publish_json<R>(&self, queue: &str, record: &R) -> Result<()>
    where
        R: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(record).map_err(Error::Serialize)?;
        bounded(
            "event publish",
            self.config.publish_timeout,
            self.queue.publish(queue, Bytes::from(body)),
        )
        .await
    }

    fn settle(&self, queue: &str, kind: &str, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                tracing::debug!(queue, kind, "event published");
                Ok(())
            }
            Err(e) => match self.config.failure_policy {
                EmitFailurePolicy::Propagate => Err(e),
                EmitFailurePolicy::LogAndContinue => {
                    tracing::warn!(queue, kind, error = %e, "event dropped");
                    Ok(())
                }
            },
        }
    }
}
