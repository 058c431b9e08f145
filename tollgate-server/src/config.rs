//! Server configuration and CLI argument parsing
//!
//! Every setting can come from a command-line flag or from an environment
//! variable with the `TOLLGATE_` prefix.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables
//! 3. Default values (lowest priority)
//!
//! # Example Usage
//!
//! ```bash
//! # Single instance, everything in memory
//! tollgate --http-port 8080
//!
//! # Several instances sharing one Redis
//! export TOLLGATE_STORE=redis
//! export TOLLGATE_REDIS_ADDR=10.0.0.5:6379
//! export TOLLGATE_DRAIN_ANCHOR=shared
//! tollgate
//! ```

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tollgate::{
    AdmissionConfig, CacheConfig, DrainAnchor, EmitFailurePolicy, EmitterConfig, FailurePolicy,
};

/// Everything the server needs, resolved and validated
#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub store: StoreConfig,
    pub admission: AdmissionConfig,
    /// What `/admit` answers when the store fails
    pub failure_policy: FailurePolicy,
    pub cache: CacheConfig,
    pub emitter: EmitterConfig,
    /// Capacity of the in-process audit queue (memory backend only)
    pub queue_capacity: usize,
    /// Logging level (error, warn, info, debug, trace)
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Initial capacity of the in-memory store
    pub capacity: usize,
    /// Sweep interval of the in-memory store
    pub cleanup_interval: Duration,
    /// `host:port` of the Redis-compatible store
    pub redis_addr: String,
    pub connect_timeout: Duration,
    pub max_idle_connections: usize,
}

/// Where counters, cache entries and queues live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In this process; only correct for a single instance
    Memory,
    /// A Redis-compatible server shared by all instances
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            _ => Err(anyhow!(
                "Invalid store backend: {s}. Valid options are: memory, redis"
            )),
        }
    }
}

fn parse_drain_anchor(s: &str) -> Result<DrainAnchor> {
    match s.to_lowercase().as_str() {
        "local" => Ok(DrainAnchor::Local),
        "shared" => Ok(DrainAnchor::Shared),
        _ => Err(anyhow!(
            "Invalid drain anchor: {s}. Valid options are: local, shared"
        )),
    }
}

fn parse_emit_failures(s: &str) -> Result<EmitFailurePolicy> {
    match s.to_lowercase().as_str() {
        "propagate" => Ok(EmitFailurePolicy::Propagate),
        "log" => Ok(EmitFailurePolicy::LogAndContinue),
        _ => Err(anyhow!(
            "Invalid emit failure policy: {s}. Valid options are: propagate, log"
        )),
    }
}

/// Command-line arguments for the server
///
/// All arguments can also be set via environment variables with the
/// TOLLGATE_ prefix. CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(
    name = "tollgate",
    about = "Admission control sidecar",
    long_about = "Per-identity admission control, shared read-through cache and audit emission over HTTP.\n\nEnvironment variables with TOLLGATE_ prefix are supported. CLI arguments take precedence over environment variables."
)]
pub struct Args {
    // HTTP Transport
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "127.0.0.1",
        env = "TOLLGATE_HTTP_HOST"
    )]
    pub http_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "TOLLGATE_HTTP_PORT"
    )]
    pub http_port: u16,

    // Store
    #[arg(
        long,
        value_name = "BACKEND",
        help = "Store backend: memory, redis",
        default_value = "memory",
        env = "TOLLGATE_STORE"
    )]
    pub store: StoreBackend,
    #[arg(
        long,
        value_name = "SIZE",
        help = "Initial capacity of the memory store",
        default_value_t = 100_000,
        env = "TOLLGATE_STORE_CAPACITY"
    )]
    pub store_capacity: usize,
    #[arg(
        long,
        value_name = "SECS",
        help = "Expired entry sweep interval of the memory store (seconds)",
        default_value_t = 60,
        env = "TOLLGATE_STORE_CLEANUP_INTERVAL"
    )]
    pub store_cleanup_interval: u64,
    #[arg(
        long,
        value_name = "ADDR",
        help = "Redis address (host:port)",
        default_value = "127.0.0.1:6379",
        env = "TOLLGATE_REDIS_ADDR"
    )]
    pub redis_addr: String,
    #[arg(
        long,
        value_name = "N",
        help = "Idle Redis connections kept for reuse",
        default_value_t = 32,
        env = "TOLLGATE_REDIS_MAX_IDLE"
    )]
    pub redis_max_idle: usize,
    #[arg(
        long,
        value_name = "MS",
        help = "Redis connect timeout (milliseconds)",
        default_value_t = 2_000,
        env = "TOLLGATE_REDIS_CONNECT_TIMEOUT_MS"
    )]
    pub redis_connect_timeout_ms: u64,
    #[arg(
        long,
        value_name = "MS",
        help = "Bound on each store round trip (milliseconds)",
        default_value_t = 500,
        env = "TOLLGATE_STORE_TIMEOUT_MS"
    )]
    pub store_timeout_ms: u64,
    #[arg(
        long,
        value_name = "PREFIX",
        help = "Prefix for every store key",
        default_value = "hip:",
        env = "TOLLGATE_KEY_PREFIX"
    )]
    pub key_prefix: String,

    // Admission
    #[arg(
        long,
        value_name = "SECS",
        help = "Fixed window length (seconds)",
        default_value_t = 20,
        env = "TOLLGATE_WINDOW_SECS"
    )]
    pub window_secs: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Requests admitted per window",
        default_value_t = 30,
        env = "TOLLGATE_WINDOW_LIMIT"
    )]
    pub window_limit: i64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Cooldown once the window limit is crossed (seconds)",
        default_value_t = 300,
        env = "TOLLGATE_COOLDOWN_SECS"
    )]
    pub cooldown_secs: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Lifetime request ceiling per identity",
        default_value_t = 300,
        env = "TOLLGATE_SESSION_QUOTA"
    )]
    pub session_quota: i64,
    #[arg(
        long,
        value_name = "N",
        help = "Leaky bucket capacity",
        default_value_t = 30,
        env = "TOLLGATE_BUCKET_CAPACITY"
    )]
    pub bucket_capacity: i64,
    #[arg(
        long,
        value_name = "N",
        help = "Leaky bucket drain rate (units per second)",
        default_value_t = 50,
        env = "TOLLGATE_DRAIN_RATE"
    )]
    pub drain_rate: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Expiry of an idle leaky bucket (seconds)",
        default_value_t = 60,
        env = "TOLLGATE_BUCKET_IDLE_SECS"
    )]
    pub bucket_idle_secs: u64,
    #[arg(
        long,
        value_name = "ANCHOR",
        help = "Where drain timestamps live: local, shared",
        default_value = "local",
        value_parser = parse_drain_anchor,
        env = "TOLLGATE_DRAIN_ANCHOR"
    )]
    pub drain_anchor: DrainAnchor,
    #[arg(
        long,
        help = "Admit requests when the store is unavailable",
        env = "TOLLGATE_FAIL_OPEN"
    )]
    pub fail_open: bool,

    // Cache
    #[arg(
        long,
        value_name = "SECS",
        help = "Cache entry lifetime (seconds)",
        default_value_t = 3600,
        env = "TOLLGATE_CACHE_TTL_SECS"
    )]
    pub cache_ttl_secs: u64,

    // Events
    #[arg(
        long,
        value_name = "NAME",
        help = "Queue receiving audit events",
        default_value = "logs",
        env = "TOLLGATE_AUDIT_QUEUE"
    )]
    pub audit_queue: String,
    #[arg(
        long,
        value_name = "MS",
        help = "Bound on each publish (milliseconds)",
        default_value_t = 1_000,
        env = "TOLLGATE_PUBLISH_TIMEOUT_MS"
    )]
    pub publish_timeout_ms: u64,
    #[arg(
        long,
        value_name = "POLICY",
        help = "On publish failure: propagate, log",
        default_value = "propagate",
        value_parser = parse_emit_failures,
        env = "TOLLGATE_EMIT_FAILURES"
    )]
    pub emit_failures: EmitFailurePolicy,
    #[arg(
        long,
        value_name = "SIZE",
        help = "In-process queue capacity (memory store only)",
        default_value_t = 10_000,
        env = "TOLLGATE_QUEUE_CAPACITY"
    )]
    pub queue_capacity: usize,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "TOLLGATE_LOG_LEVEL"
    )]
    pub log_level: String,

    // Utility options
    #[arg(
        long,
        help = "List all environment variables and exit",
        action = clap::ArgAction::SetTrue
    )]
    pub list_env_vars: bool,
}

impl Config {
    /// Build configuration from environment variables and CLI arguments
    ///
    /// Exits the process after printing the variable list when
    /// `--list-env-vars` is given.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        if args.list_env_vars {
            Self::print_env_vars();
            std::process::exit(0);
        }

        Self::from_args(args)
    }

    /// Resolve parsed arguments into a validated configuration
    pub fn from_args(args: Args) -> Result<Self> {
        let addr = format!("{}:{}", args.http_host, args.http_port)
            .parse()
            .with_context(|| {
                format!("Invalid HTTP address {}:{}", args.http_host, args.http_port)
            })?;

        let store_timeout = Duration::from_millis(args.store_timeout_ms);

        let config = Config {
            http: HttpConfig { addr },
            store: StoreConfig {
                backend: args.store,
                capacity: args.store_capacity,
                cleanup_interval: Duration::from_secs(args.store_cleanup_interval),
                redis_addr: args.redis_addr,
                connect_timeout: Duration::from_millis(args.redis_connect_timeout_ms),
                max_idle_connections: args.redis_max_idle,
            },
            admission: AdmissionConfig {
                window: Duration::from_secs(args.window_secs),
                window_limit: args.window_limit,
                cooldown: Duration::from_secs(args.cooldown_secs),
                session_quota: args.session_quota,
                bucket_capacity: args.bucket_capacity,
                drain_rate: args.drain_rate,
                bucket_idle_ttl: Duration::from_secs(args.bucket_idle_secs),
                drain_anchor: args.drain_anchor,
                store_timeout,
                key_prefix: args.key_prefix.clone(),
            },
            failure_policy: if args.fail_open {
                FailurePolicy::FailOpen
            } else {
                FailurePolicy::FailClosed
            },
            cache: CacheConfig {
                entry_ttl: Duration::from_secs(args.cache_ttl_secs),
                store_timeout,
                key_prefix: args.key_prefix,
                ..CacheConfig::default()
            },
            emitter: EmitterConfig {
                audit_queue: args.audit_queue,
                publish_timeout: Duration::from_millis(args.publish_timeout_ms),
                failure_policy: args.emit_failures,
            },
            queue_capacity: args.queue_capacity,
            log_level: args.log_level,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    fn validate(&self) -> Result<()> {
        self.admission
            .validate()
            .context("Invalid admission settings")?;
        self.cache.validate().context("Invalid cache settings")?;
        self.emitter.validate().context("Invalid event settings")?;

        if self.store.backend == StoreBackend::Redis && self.store.redis_addr.trim().is_empty() {
            return Err(anyhow!(
                "--redis-addr (or TOLLGATE_REDIS_ADDR) is required with --store redis"
            ));
        }

        if self.store.cleanup_interval.is_zero() {
            return Err(anyhow!("Store cleanup interval must be non-zero"));
        }

        if self.queue_capacity == 0 {
            return Err(anyhow!("Queue capacity must be positive"));
        }

        Ok(())
    }

    /// Print all available environment variables and their descriptions
    fn print_env_vars() {
        println!("Tollgate Environment Variables");
        println!("==============================");
        println!();
        println!("All environment variables use the TOLLGATE_ prefix.");
        println!("CLI arguments take precedence over environment variables.");
        println!();

        println!("HTTP:");
        println!("  TOLLGATE_HTTP_HOST=<host>               HTTP host [default: 127.0.0.1]");
        println!("  TOLLGATE_HTTP_PORT=<port>               HTTP port [default: 8080]");
        println!();

        println!("Store:");
        println!("  TOLLGATE_STORE=<backend>                memory, redis [default: memory]");
        println!("  TOLLGATE_STORE_CAPACITY=<size>          Memory store capacity [default: 100000]");
        println!(
            "  TOLLGATE_STORE_CLEANUP_INTERVAL=<secs>  Memory store sweep interval [default: 60]"
        );
        println!("  TOLLGATE_REDIS_ADDR=<host:port>         Redis address [default: 127.0.0.1:6379]");
        println!("  TOLLGATE_REDIS_MAX_IDLE=<n>             Idle Redis connections [default: 32]");
        println!(
            "  TOLLGATE_REDIS_CONNECT_TIMEOUT_MS=<ms>  Redis connect timeout [default: 2000]"
        );
        println!("  TOLLGATE_STORE_TIMEOUT_MS=<ms>          Store round trip bound [default: 500]");
        println!("  TOLLGATE_KEY_PREFIX=<prefix>            Key prefix [default: hip:]");
        println!();

        println!("Admission:");
        println!("  TOLLGATE_WINDOW_SECS=<secs>             Fixed window length [default: 20]");
        println!("  TOLLGATE_WINDOW_LIMIT=<n>               Requests per window [default: 30]");
        println!("  TOLLGATE_COOLDOWN_SECS=<secs>           Cooldown after the limit [default: 300]");
        println!("  TOLLGATE_SESSION_QUOTA=<n>              Lifetime ceiling [default: 300]");
        println!("  TOLLGATE_BUCKET_CAPACITY=<n>            Leaky bucket capacity [default: 30]");
        println!("  TOLLGATE_DRAIN_RATE=<n>                 Units drained per second [default: 50]");
        println!("  TOLLGATE_BUCKET_IDLE_SECS=<secs>        Idle bucket expiry [default: 60]");
        println!("  TOLLGATE_DRAIN_ANCHOR=<anchor>          local, shared [default: local]");
        println!("  TOLLGATE_FAIL_OPEN=true|false           Admit on store failure [default: false]");
        println!();

        println!("Cache:");
        println!("  TOLLGATE_CACHE_TTL_SECS=<secs>          Entry lifetime [default: 3600]");
        println!();

        println!("Events:");
        println!("  TOLLGATE_AUDIT_QUEUE=<name>             Audit queue [default: logs]");
        println!("  TOLLGATE_PUBLISH_TIMEOUT_MS=<ms>        Publish bound [default: 1000]");
        println!("  TOLLGATE_EMIT_FAILURES=<policy>         propagate, log [default: propagate]");
        println!("  TOLLGATE_QUEUE_CAPACITY=<size>          In-process queue size [default: 10000]");
        println!();

        println!("General:");
        println!(
            "  TOLLGATE_LOG_LEVEL=<level>              error, warn, info, debug, trace [default: info]"
        );
        println!();

        println!("Examples:");
        println!("  # Share state between instances through Redis");
        println!("  export TOLLGATE_STORE=redis");
        println!("  export TOLLGATE_REDIS_ADDR=10.0.0.5:6379");
        println!("  export TOLLGATE_DRAIN_ANCHOR=shared");
        println!();
        println!("  # Run server (CLI args override env vars)");
        println!("  tollgate --http-port 9090");
    }
}
