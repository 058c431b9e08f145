//! # Tollgate
//!
//! Per-identity admission control, read-through caching and audit emission
//! for a multi-tenant resource server, with all shared state kept in an
//! external counter store.
//!
//! ## Overview
//!
//! A request handler uses the three components in this order:
//!
//! 1. [`AdmissionController`] decides whether the identity may proceed,
//!    combining a fixed-window counter, a session quota and a leaky bucket
//! 2. [`ReadThroughCache`] serves derived read resources, falling back to an
//!    [`AuthoritativeSource`] on a miss
//! 3. [`EventEmitter`] publishes a categorized [`AuditEvent`] to a
//!    [`DurableQueue`] once the operation is done
//!
//! Each component receives its collaborators through its constructor. The
//! counter store is any [`CounterStore`]: [`MemoryStore`] for a single
//! process, or the RESP client in `tollgate-client` for a shared Redis.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use tollgate::{
//!     AdmissionConfig, AdmissionController, AuditEvent, ChannelQueue, EmitterConfig,
//!     EventCategory, EventEmitter, MemoryStore,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tollgate::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let admission = AdmissionController::new(store, AdmissionConfig::default())?;
//!
//! let (queue, mut consumer) = ChannelQueue::new(128);
//! let events = EventEmitter::new(Arc::new(queue), EmitterConfig::default())?;
//!
//! if admission.admit("ID-1").await?.is_allowed() {
//!     let event = AuditEvent::new(EventCategory::ProfileViewed, "ID-1").subject("H-1001");
//!     events.emit(&event).await?;
//! }
//!
//! let published = consumer.recv().await.unwrap();
//! assert_eq!(published.queue, "logs");
//! # Ok(())
//! # }
//! ```
//!
//! ## Failure model
//!
//! A denial is a normal [`Decision`], never an error. Store, source and
//! queue failures come back as [`Error`] and are never turned into a
//! denial, a cache miss or a default value. Nothing here retries.
//!
//! ## Features
//!
//! - `ahash` (default): Use AHash for the in-process maps

pub mod admission;
pub mod cache;
pub mod clock;
mod deadline;
pub mod error;
pub mod events;
pub mod store;

pub use admission::{
    AdmissionConfig, AdmissionController, Decision, DenyReason, DrainAnchor, FailurePolicy,
};
pub use cache::{AuthoritativeSource, CacheConfig, CacheEntry, CacheKey, CacheRead, ReadThroughCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BoxError, Error, QueueError, Result, StoreError};
pub use events::{
    AuditEvent, ChannelQueue, DurableQueue, EmitFailurePolicy, EmitterConfig, EventCategory,
    EventEmitter, QueuedMessage, MISSED_CATEGORY,
};
pub use store::{CounterStore, KeyTtl, MemoryStore, MemoryStoreBuilder};
