//! Wiring of the store, the queue and the three components
//!
//! The memory backend keeps everything in this process and drains the
//! in-process queue into the log. The Redis backend shares counters, cache
//! entries and queues with every other instance pointed at the same server.

use crate::config::{Config, StoreBackend};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tollgate::{
    AdmissionController, ChannelQueue, CounterStore, DurableQueue, EventEmitter, FailurePolicy,
    MemoryStore, QueuedMessage, ReadThroughCache,
};
use tollgate_client::StoreClient;

/// Components shared by every request handler
pub struct Services {
    pub admission: AdmissionController,
    pub failure_policy: FailurePolicy,
    pub cache: ReadThroughCache,
    pub events: EventEmitter,
}

impl Services {
    /// Assemble the components over an already constructed store and queue
    pub fn new(
        store: Arc<dyn CounterStore>,
        queue: Arc<dyn DurableQueue>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            admission: AdmissionController::new(store.clone(), config.admission.clone())
                .context("Failed to create admission controller")?,
            failure_policy: config.failure_policy,
            cache: ReadThroughCache::new(store, config.cache.clone())
                .context("Failed to create cache")?,
            events: EventEmitter::new(queue, config.emitter.clone())
                .context("Failed to create event emitter")?,
        })
    }

    /// Build the configured backend and the components on top of it
    pub async fn connect(config: &Config) -> Result<Self> {
        match config.store.backend {
            StoreBackend::Memory => {
                let store = MemoryStore::builder()
                    .capacity(config.store.capacity)
                    .cleanup_interval(config.store.cleanup_interval)
                    .build();
                let (queue, consumer) = ChannelQueue::new(config.queue_capacity);
                tokio::spawn(drain_to_log(consumer));

                tracing::warn!("Using the memory store: state is not shared between instances");
                Self::new(Arc::new(store), Arc::new(queue), config)
            }
            StoreBackend::Redis => {
                let client = StoreClient::builder()
                    .connect_timeout(config.store.connect_timeout)
                    .request_timeout(config.admission.store_timeout)
                    .max_idle_connections(config.store.max_idle_connections)
                    .build(config.store.redis_addr.as_str())
                    .await
                    .with_context(|| {
                        format!("Failed to connect to store at {}", config.store.redis_addr)
                    })?;
                let client = Arc::new(client);

                Self::new(client.clone(), client, config)
            }
        }
    }
}

/// Consumer for the in-process queue
async fn drain_to_log(mut consumer: mpsc::Receiver<QueuedMessage>) {
    while let Some(message) = consumer.recv().await {
        tracing::info!(
            queue = %message.queue,
            payload = %String::from_utf8_lossy(&message.payload),
            "event published"
        );
    }
    tracing::debug!("in-process queue closed");
}
