/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::fs;
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{Address, ServerError};

/// The type of the server socket
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SocketKind {
    /// Connection-oriented (TCP)
    Stream,
    /// Datagram (UDP)
    Datagram,
}

/// The nonblocking socket operation that produces events
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Accept a pending connection
    Accept,
    /// Receive a datagram together with the sender address
    ReceiveFrom,
}

/// Configuration of a [`Server`](crate::Server)
///
/// Use one of the presets, [`tcp()`](ServerConfig::tcp()) or
/// [`udp()`](ServerConfig::udp()), and adjust the fields as needed. The
/// configuration is fixed once the server has been constructed.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Endpoint to bind to; resolved to a default endpoint when `None`.
    pub address: Option<Address>,
    pub kind: SocketKind,
    /// Pending-connection queue depth. Also determines the idle sleep.
    pub backlog: u32,
    /// Read buffer size for this server's events.
    pub buffer_length: usize,
    /// Number of worker threads; `None` means unbounded (one thread per event).
    pub workers: Option<NonZeroUsize>,
    /// Capacity of the task queue of a bounded worker pool.
    pub queue_depth: usize,
    /// Upper bound for how long a single poll attempt may block.
    pub poll_timeout: Duration,
    /// Operation to poll; the server stops immediately when `None`.
    pub event_source: Option<Operation>,
    /// How long an accepted connection may stay idle before it is reaped.
    pub inactivity_timeout: Option<Duration>,
    /// Read pacing for per-connection loops. Ignored by datagram servers.
    pub conn_sleep: Duration,
}

impl ServerConfig {
    pub const DEFAULT_BACKLOG: u32 = 100;
    pub const DEFAULT_QUEUE_DEPTH: usize = 256;
    pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(1);
    pub const DEFAULT_CONN_SLEEP: Duration = Duration::from_millis(1);
    pub const TCP_BUFFER_LENGTH: usize = 65536;
    pub const UDP_BUFFER_LENGTH: usize = 512;

    /// Preset for connection-oriented servers
    pub fn tcp() -> Self {
        Self {
            address: None,
            kind: SocketKind::Stream,
            backlog: Self::DEFAULT_BACKLOG,
            buffer_length: Self::TCP_BUFFER_LENGTH,
            workers: None,
            queue_depth: Self::DEFAULT_QUEUE_DEPTH,
            poll_timeout: Self::DEFAULT_POLL_TIMEOUT,
            event_source: Some(Operation::Accept),
            inactivity_timeout: None,
            conn_sleep: Self::DEFAULT_CONN_SLEEP,
        }
    }

    /// Preset for datagram servers
    pub fn udp() -> Self {
        Self {
            kind: SocketKind::Datagram,
            buffer_length: Self::UDP_BUFFER_LENGTH,
            event_source: Some(Operation::ReceiveFrom),
            ..Self::tcp()
        }
    }

    pub fn with_address<A: Into<Address>>(mut self, address: A) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_buffer_length(mut self, buffer_length: usize) -> Self {
        self.buffer_length = buffer_length;
        self
    }

    pub fn with_workers(mut self, workers: Option<NonZeroUsize>) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_depth(mut self, queue_depth: usize) -> Self {
        self.queue_depth = queue_depth;
        self
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn with_event_source(mut self, event_source: Option<Operation>) -> Self {
        self.event_source = event_source;
        self
    }

    pub fn with_inactivity_timeout(mut self, inactivity_timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = inactivity_timeout;
        self
    }

    pub fn with_conn_sleep(mut self, conn_sleep: Duration) -> Self {
        self.conn_sleep = conn_sleep;
        self
    }

    /// Pause between failed poll attempts: exactly `1 / backlog` seconds, so
    /// that a larger backlog yields a tighter poll loop.
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.backlog.max(1)))
    }

    /// Checks all values that would otherwise only fail once sockets exist.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.backlog == 0 {
            return Err(ServerError::InvalidConfig("backlog must be positive"));
        }
        if self.poll_timeout.is_zero() {
            return Err(ServerError::InvalidConfig("poll timeout must be positive"));
        }
        if self.buffer_length == 0 {
            return Err(ServerError::InvalidConfig("buffer length must be positive"));
        }
        if self.queue_depth == 0 {
            return Err(ServerError::InvalidConfig("queue depth must be positive"));
        }
        Ok(())
    }

    /// Reads a configuration from a TOML document.
    ///
    /// ```toml
    /// kind = "udp"
    /// address = ["127.0.0.1", "5353"]
    /// backlog = 50
    /// workers = 4
    /// poll_timeout = 0.005
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self, ServerError> {
        let file: ConfigFile = toml::from_str(text)?;
        file.into_config()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ServerError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum KindName {
    Tcp,
    Udp,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    kind: KindName,
    address: Option<Vec<String>>,
    backlog: Option<u32>,
    buffer_length: Option<usize>,
    workers: Option<usize>,
    queue_depth: Option<usize>,
    poll_timeout: Option<f64>,
    inactivity_timeout: Option<f64>,
    conn_sleep: Option<f64>,
}

impl ConfigFile {
    fn into_config(self) -> Result<ServerConfig, ServerError> {
        let mut config = match self.kind {
            KindName::Tcp => ServerConfig::tcp(),
            KindName::Udp => ServerConfig::udp(),
        };
        if let Some(parts) = self.address {
            config.address = Some(Address::from_parts(&parts)?);
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(buffer_length) = self.buffer_length {
            config.buffer_length = buffer_length;
        }
        if let Some(workers) = self.workers {
            config.workers = Some(NonZeroUsize::new(workers).ok_or(ServerError::InvalidConfig("workers must be positive; omit it for an unbounded pool"))?);
        }
        if let Some(queue_depth) = self.queue_depth {
            config.queue_depth = queue_depth;
        }
        if let Some(seconds) = self.poll_timeout {
            config.poll_timeout = seconds_to_duration(seconds)?;
        }
        if let Some(seconds) = self.inactivity_timeout {
            config.inactivity_timeout = Some(seconds_to_duration(seconds)?);
        }
        if let Some(seconds) = self.conn_sleep {
            config.conn_sleep = seconds_to_duration(seconds)?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn seconds_to_duration(seconds: f64) -> Result<Duration, ServerError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| ServerError::InvalidConfig("durations must be finite, non-negative seconds"))
}
