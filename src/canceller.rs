/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result;
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};

use crate::utilities::Flag;
use crate::ServerError;

/// How a server run came to an end
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exit {
    /// Stopped programmatically, via [`Canceller::stop()`].
    Stopped,
    /// Stopped by an external interrupt, via [`Canceller::interrupt()`].
    Interrupted,
}

/// A canceller that can be used to stop a running [`Server`](crate::Server)
///
/// Each `mserve_rs::Canceller` is tied to exactly one server. It can be cloned
/// and moved across the thread boundary, e.g. into a Ctrl+C (SIGINT) handler.
/// Stopping and interrupting are the same cancellation signal; they only
/// differ in the [`Exit`] reported by [`run()`](crate::Server::run()).
///
/// Cancellation prevents any *further* event from being dispatched. Handlers
/// that have already been dispatched run to completion on their workers.
#[derive(Clone, Debug)]
pub struct Canceller {
    flag: Arc<Flag>,
}

impl Canceller {
    pub(crate) fn from(flag: Arc<Flag>) -> Self {
        Self {
            flag,
        }
    }

    /// Requests a programmatic stop. Returns `false` if the server was
    /// already stopped or interrupted.
    pub fn stop(&self) -> Result<bool> {
        self.flag.raise(Exit::Stopped)
    }

    /// Requests a stop on behalf of an external interrupt.
    pub fn interrupt(&self) -> Result<bool> {
        self.flag.raise(Exit::Interrupted)
    }

    pub fn is_alive(&self) -> bool {
        self.flag.check()
    }

    pub fn exit(&self) -> Option<Exit> {
        self.flag.exit()
    }

    /// Returns `true` while the server socket is listening, i.e. from the
    /// moment [`run()`](crate::Server::run()) has started listening until the
    /// socket has been closed.
    pub fn is_listening(&self) -> bool {
        self.flag.is_listening()
    }

    /// Waits until the server socket is listening. Returns `false` if the
    /// timeout expired, or if the server shut down without ever listening.
    pub fn wait_listening(&self, timeout: Duration) -> bool {
        self.flag.wait_listening(timeout)
    }

    /// Installs a Ctrl+C (SIGINT) handler that interrupts the server.
    ///
    /// Only one such handler can be installed per process.
    pub fn interrupt_on_ctrlc(&self) -> std::result::Result<(), ServerError> {
        let canceller = self.clone();
        ctrlc::set_handler(move || {
            warn!("Shutdown has been requested!");
            if let Err(error) = canceller.interrupt() {
                error!("Failed to interrupt the server: {:?}", error);
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_one_flag() {
        let canceller = Canceller::from(Arc::new(Flag::new(None)));
        let other = canceller.clone();
        assert!(other.is_alive());
        assert!(canceller.stop().unwrap());
        assert!(!other.is_alive());
        assert!(!other.interrupt().unwrap());
        assert_eq!(other.exit(), Some(Exit::Stopped));
    }
}
