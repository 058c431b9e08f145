//! # Tollgate Server
//!
//! A sidecar that puts per-identity admission control, a shared read-through
//! cache and audit event emission behind a small HTTP API.
//!
//! ## Purpose
//!
//! Resource servers for many healthcare providers run as several instances
//! behind a load balancer. Each instance asks this sidecar before doing work
//! for a provider, and tells it about the work afterwards. With the Redis
//! backend every sidecar shares one set of counters, so the limits hold for
//! the whole fleet rather than per instance.
//!
//! ## Quick Start
//!
//! ```bash
//! # Show all available options
//! tollgate --help
//!
//! # Single instance, state in memory
//! tollgate --http-port 8080
//!
//! # Shared state through Redis
//! tollgate --store redis --redis-addr 10.0.0.5:6379 --drain-anchor shared
//!
//! # List all available environment variables
//! tollgate --list-env-vars
//! ```
//!
//! ## Admission
//!
//! Every call to `POST /admit` runs three gates in order: a fixed window of
//! 30 requests per 20 seconds with a 300 second cooldown, a lifetime quota of
//! 300 requests reset through `DELETE /quota/{identity}`, and a leaky bucket
//! of 30 units draining at 50 per second. All three are evaluated on every
//! call and the response lists each gate that refused.
//!
//! ```bash
//! curl -X POST http://localhost:8080/admit \
//!   -H "Content-Type: application/json" \
//!   -d '{"identity": "HIP-1001"}'
//! ```
//!
//! ## Architecture
//!
//! ```text
//!                 ┌─────────────┐
//!                 │    HTTP     │
//!                 │  Transport  │
//!                 └──────┬──────┘
//!          ┌─────────────┼─────────────┐
//!    ┌─────▼─────┐ ┌─────▼─────┐ ┌─────▼─────┐
//!    │ Admission │ │   Cache   │ │  Events   │
//!    └─────┬─────┘ └─────┬─────┘ └─────┬─────┘
//!          └──────┬──────┘             │
//!           ┌─────▼─────┐        ┌─────▼─────┐
//!           │  Counter  │        │  Durable  │
//!           │   Store   │        │   Queue   │
//!           └───────────┘        └───────────┘
//! ```

pub mod config;
pub mod services;
pub mod transport;
