//! Connection pool for RESP round trips
//!
//! Connections are checked out for exactly one command and returned only if
//! that command completed. A connection that timed out or failed may hold a
//! half-read reply, so it is dropped instead.

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{ClientError, Result};
use crate::resp::{RespParser, RespValue};

const READ_BUFFER_SIZE: usize = 4096;

/// A reusable connection that can send multiple commands
struct Connection {
    stream: TcpStream,
    read_buf: BytesMut,
    parser: RespParser,
    last_used: Instant,
}

impl Connection {
    async fn execute(&mut self, command: &[u8]) -> Result<RespValue> {
        self.stream.write_all(command).await?;

        loop {
            if let Some((reply, consumed)) = self.parser.parse(&self.read_buf)? {
                self.read_buf.advance(consumed);
                self.last_used = Instant::now();
                return Ok(reply);
            }

            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(ClientError::ConnectionClosed);
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub max_idle_connections: usize,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub tcp_nodelay: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_connections: 32,
            idle_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_millis(500),
            tcp_nodelay: true,
        }
    }
}

pub struct ConnectionPool {
    addr: SocketAddr,
    config: PoolConfig,
    /// Available connections, most recently used last
    idle: Mutex<VecDeque<Connection>>,
    /// Channel for returning connections
    return_tx: mpsc::UnboundedSender<Connection>,
    return_rx: Mutex<mpsc::UnboundedReceiver<Connection>>,
}

impl ConnectionPool {
    pub fn new(addr: SocketAddr, config: PoolConfig) -> Self {
        let (return_tx, return_rx) = mpsc::unbounded_channel();
        let max_idle = config.max_idle_connections;

        Self {
            addr,
            config,
            idle: Mutex::new(VecDeque::with_capacity(max_idle)),
            return_tx,
            return_rx: Mutex::new(return_rx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Move returned connections into the idle set, up to the idle limit
    fn reclaim(&self) {
        let mut rx = self.return_rx.lock();
        let mut idle = self.idle.lock();
        while let Ok(conn) = rx.try_recv() {
            if idle.len() < self.config.max_idle_connections {
                idle.push_back(conn);
            }
        }
    }

    /// Get a connection - either from pool or create new
    async fn checkout(&self) -> Result<Connection> {
        self.reclaim();

        let now = Instant::now();
        let conn = {
            let mut idle = self.idle.lock();
            idle.retain(|c| now.duration_since(c.last_used) < self.config.idle_timeout);
            idle.pop_back()
        };

        if let Some(conn) = conn {
            return Ok(conn);
        }

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(self.addr))
            .await
            .map_err(|_| ClientError::Timeout(self.config.connect_timeout))??;

        if self.config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        tracing::debug!(addr = %self.addr, "opened store connection");

        Ok(Connection {
            stream,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            parser: RespParser::new(),
            last_used: Instant::now(),
        })
    }

    /// Return a connection to the pool
    fn checkin(&self, conn: Connection) {
        // The receiver lives as long as the pool
        let _ = self.return_tx.send(conn);
    }

    /// Send one encoded command and wait for its reply
    ///
    /// An error reply from the server is a successful round trip and comes
    /// back as [`RespValue::Error`].
    pub async fn execute(&self, command: &[u8]) -> Result<RespValue> {
        let mut conn = self.checkout().await?;

        let result = timeout(self.config.request_timeout, conn.execute(command)).await;

        match result {
            Ok(Ok(reply)) => {
                self.checkin(conn);
                Ok(reply)
            }
            Ok(Err(e)) => {
                tracing::warn!(addr = %self.addr, error = %e, "dropping store connection");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(addr = %self.addr, "store request timed out, dropping connection");
                Err(ClientError::Timeout(self.config.request_timeout))
            }
        }
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.reclaim();
        PoolStats {
            idle_connections: self.idle.lock().len(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle_connections: usize,
}
