//! Transport layer for the admission server
//!
//! A transport accepts client connections, translates requests into calls on
//! the shared [`Services`] and writes the answers back.
//!
//! # Available Transports
//!
//! - [`http`]: REST API with JSON

pub mod http;


use crate::services::Services;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Common interface for all transport implementations
#[async_trait]
pub trait Transport {
    /// Bind, then serve requests until an error occurs or the server shuts down
    async fn start(self, services: Arc<Services>) -> Result<()>;
}
