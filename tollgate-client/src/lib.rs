//! Client for a Redis-compatible shared counter store
//!
//! [`StoreClient`] speaks RESP over a pool of TCP connections and implements
//! both [`tollgate::CounterStore`] and [`tollgate::DurableQueue`], so several
//! tollgate instances can share admission counters, cache entries and audit
//! queues through one Redis.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tollgate::{AdmissionConfig, AdmissionController};
//! use tollgate_client::StoreClient;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = StoreClient::builder()
//!     .request_timeout(Duration::from_millis(250))
//!     .build("127.0.0.1:6379")
//!     .await?;
//!
//! let admission = AdmissionController::new(Arc::new(store), AdmissionConfig::default())?;
//! let decision = admission.admit("ID-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod pool;
pub mod resp;

pub use client::{ClientBuilder, StoreClient};
pub use error::{ClientError, Result};
pub use pool::{ConnectionPool, PoolConfig, PoolStats};
pub use resp::{RespParser, RespSerializer, RespValue};
