use async_trait::async_trait;
use bytes::Bytes;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;
use tollgate::{CounterStore, DurableQueue, KeyTtl, QueueError, StoreError};

use crate::error::{ClientError, Result};
use crate::pool::{ConnectionPool, PoolConfig, PoolStats};
use crate::resp::{RespSerializer, RespValue};

/// Builder for creating a [`StoreClient`]
#[derive(Default)]
pub struct ClientBuilder {
    pool_config: PoolConfig,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of idle connections kept for reuse
    pub fn max_idle_connections(mut self, max: usize) -> Self {
        self.pool_config.max_idle_connections = max;
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.connect_timeout = timeout;
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.request_timeout = timeout;
        self
    }

    /// Set how long an unused connection may sit in the pool
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.idle_timeout = timeout;
        self
    }

    /// Enable or disable TCP nodelay
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.pool_config.tcp_nodelay = nodelay;
        self
    }

    /// Build the client and check that the store answers `PING`
    pub async fn build(self, addr: impl ToSocketAddrs) -> Result<StoreClient> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid address")
        })?;

        let client = StoreClient {
            pool: Arc::new(ConnectionPool::new(addr, self.pool_config)),
        };
        client.ping().await?;
        tracing::info!(%addr, "connected to counter store");

        Ok(client)
    }
}

/// Client for a Redis-compatible shared counter store
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct StoreClient {
    pool: Arc<ConnectionPool>,
}

impl StoreClient {
    /// Create a new client with default configuration
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        ClientBuilder::new().build(addr).await
    }

    /// Create a new client builder for advanced configuration
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub async fn ping(&self) -> Result<()> {
        match self.call("PING", &[b"PING"]).await? {
            RespValue::SimpleString(s) if s == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    pub async fn incr(&self, key: &str) -> Result<i64> {
        integer("INCR", self.call("INCR", &[b"INCR", key.as_bytes()]).await?)
    }

    pub async fn decr_by(&self, key: &str, amount: i64) -> Result<i64> {
        let amount = amount.to_string();
        integer(
            "DECRBY",
            self.call("DECRBY", &[b"DECRBY", key.as_bytes(), amount.as_bytes()])
                .await?,
        )
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.call("GET", &[b"GET", key.as_bytes()]).await? {
            RespValue::BulkString(value) => Ok(value),
            other => Err(unexpected("GET", &other)),
        }
    }

    /// `SET key value [PX ttl]`
    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()> {
        let reply = match ttl {
            Some(ttl) => {
                let millis = millis(ttl);
                self.call("SET", &[b"SET", key.as_bytes(), value, b"PX", millis.as_bytes()])
                    .await?
            }
            None => self.call("SET", &[b"SET", key.as_bytes(), value]).await?,
        };
        match reply {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            other => Err(unexpected("SET", &other)),
        }
    }

    pub async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let millis = millis(ttl);
        let reply = self
            .call("PEXPIRE", &[b"PEXPIRE", key.as_bytes(), millis.as_bytes()])
            .await?;
        Ok(integer("PEXPIRE", reply)? == 1)
    }

    pub async fn pttl(&self, key: &str) -> Result<KeyTtl> {
        match integer("PTTL", self.call("PTTL", &[b"PTTL", key.as_bytes()]).await?)? {
            -2 => Ok(KeyTtl::Missing),
            -1 => Ok(KeyTtl::Persistent),
            ms if ms >= 0 => Ok(KeyTtl::Expires(Duration::from_millis(ms as u64))),
            ms => Err(ClientError::UnexpectedReply {
                command: "PTTL",
                reply: format!(":{ms}"),
            }),
        }
    }

    pub async fn del(&self, key: &str) -> Result<i64> {
        integer("DEL", self.call("DEL", &[b"DEL", key.as_bytes()]).await?)
    }

    /// Append to a list; returns the new list length
    pub async fn rpush(&self, list: &str, payload: &[u8]) -> Result<i64> {
        integer(
            "RPUSH",
            self.call("RPUSH", &[b"RPUSH", list.as_bytes(), payload]).await?,
        )
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    async fn call(&self, command: &'static str, args: &[&[u8]]) -> Result<RespValue> {
        let reply = self.pool.execute(&RespSerializer::command(args)).await?;
        match reply {
            RespValue::Error(message) => {
                tracing::debug!(command, %message, "store returned error");
                Err(ClientError::Server(message))
            }
            reply => Ok(reply),
        }
    }
}

fn integer(command: &'static str, reply: RespValue) -> Result<i64> {
    match reply {
        RespValue::Integer(n) => Ok(n),
        other => Err(unexpected(command, &other)),
    }
}

fn unexpected(command: &'static str, reply: &RespValue) -> ClientError {
    ClientError::UnexpectedReply {
        command,
        reply: reply.describe(),
    }
}

/// Millisecond argument for `PX`/`PEXPIRE`, which reject zero
fn millis(ttl: Duration) -> String {
    ttl.as_millis().max(1).to_string()
}

/// Redis reports a non-numeric counter as a generic error
fn store_error(key: &str, e: ClientError) -> StoreError {
    match e {
        ClientError::Server(message) if message.contains("not an integer") => {
            StoreError::NotAnInteger {
                key: key.to_string(),
            }
        }
        e => e.into(),
    }
}

#[async_trait]
impl CounterStore for StoreClient {
    async fn incr(&self, key: &str) -> std::result::Result<i64, StoreError> {
        StoreClient::incr(self, key)
            .await
            .map_err(|e| store_error(key, e))
    }

    async fn decr_by(&self, key: &str, amount: i64) -> std::result::Result<i64, StoreError> {
        StoreClient::decr_by(self, key, amount)
            .await
            .map_err(|e| store_error(key, e))
    }

    async fn get(&self, key: &str) -> std::result::Result<Option<Bytes>, StoreError> {
        Ok(StoreClient::get(self, key).await?)
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> std::result::Result<(), StoreError> {
        Ok(StoreClient::set(self, key, &value, ttl).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> std::result::Result<bool, StoreError> {
        Ok(self.pexpire(key, ttl).await?)
    }

    async fn ttl(&self, key: &str) -> std::result::Result<KeyTtl, StoreError> {
        Ok(self.pttl(key).await?)
    }

    async fn del(&self, key: &str) -> std::result::Result<bool, StoreError> {
        Ok(StoreClient::del(self, key).await? > 0)
    }
}

/// Each queue is a Redis list of the same name; consumers pop from the head
#[async_trait]
impl DurableQueue for StoreClient {
    async fn publish(&self, queue: &str, payload: Bytes) -> std::result::Result<(), QueueError> {
        self.rpush(queue, &payload).await?;
        Ok(())
    }
}
