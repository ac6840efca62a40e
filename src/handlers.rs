/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{ErrorKind, Read, Result as IoResult};
use std::net::Shutdown;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::{Event, ServerConfig};

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// The default event handler: consumes every event and drops its data
///
/// Connections are read until the peer closes them. Each read waits at most
/// `conn_sleep`; once no data has arrived for `inactivity_timeout`, the
/// connection is shut down. Datagrams are only logged.
#[derive(Debug)]
pub struct Discard {
    event: Event,
    buffer_length: usize,
    inactivity_timeout: Option<Duration>,
    conn_sleep: Duration,
}

impl Discard {
    pub fn new(event: Event, config: &ServerConfig) -> Self {
        Self {
            event,
            buffer_length: config.buffer_length,
            inactivity_timeout: config.inactivity_timeout,
            conn_sleep: config.conn_sleep,
        }
    }

    pub fn handle(self) {
        let peer = self.event.peer_addr();
        match self.consume() {
            Ok(count) => debug!("Discarded {} bytes from {}", count, peer),
            Err(error) => warn!("Failed to consume the event from {}: {:?}", peer, error),
        }
    }

    /// Consumes the event and returns the number of bytes received.
    pub fn consume(self) -> IoResult<usize> {
        let connection = match self.event {
            Event::Datagram(datagram) => return Ok(datagram.payload().len()),
            Event::Connection(connection) => connection,
        };

        let peer = connection.peer_addr();
        let mut stream = connection.into_stream();
        stream.set_read_timeout(Some(self.conn_sleep.max(MIN_READ_TIMEOUT)))?;

        let mut buffer = vec![0u8; self.buffer_length];
        let mut total = 0usize;
        let mut last_activity = Instant::now();

        loop {
            match stream.read(&mut buffer) {
                Ok(0) => return Ok(total),
                Ok(count) => {
                    total += count;
                    last_activity = Instant::now();
                },
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut => {
                        if self.inactivity_timeout.map_or(false, |limit| last_activity.elapsed() >= limit) {
                            info!("Connection from {} was inactive for too long, closing it", peer);
                            stream.shutdown(Shutdown::Both)?;
                            return Ok(total);
                        }
                    },
                    _ => return Err(error),
                },
            }
        }
    }
}
