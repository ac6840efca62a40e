/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use mio::Waker;

use crate::Exit;

const ALIVE: u8 = 0;
const STOPPED: u8 = 1;
const INTERRUPTED: u8 = 2;

/// The lifecycle flag: starts out alive and flips to stopped or interrupted
/// exactly once. Flipping wakes up a pending poll, if a waker is attached.
///
/// Independently, the flag tracks whether the socket is listening, so that
/// other threads can wait for the server to become reachable.
#[derive(Debug)]
pub(crate) struct Flag {
    waker: Option<Waker>,
    state: AtomicU8,
    readiness: Mutex<Readiness>,
    changed: Condvar,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Readiness {
    Pending,
    Listening,
    Closed,
}

impl Flag {
    pub fn new(waker: Option<Waker>) -> Self {
        Self {
            waker,
            state: AtomicU8::new(ALIVE),
            readiness: Mutex::new(Readiness::Pending),
            changed: Condvar::new(),
        }
    }

    pub fn set_listening(&self) {
        self.advance(Readiness::Listening);
    }

    pub fn set_closed(&self) {
        self.advance(Readiness::Closed);
    }

    fn advance(&self, next: Readiness) {
        let mut readiness = self.readiness.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *readiness != Readiness::Closed {
            *readiness = next;
        }
        self.changed.notify_all();
    }

    pub fn is_listening(&self) -> bool {
        let readiness = self.readiness.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *readiness == Readiness::Listening
    }

    /// Blocks until the socket is listening or closed, or `timeout` expires.
    /// Returns whether the socket is listening.
    pub fn wait_listening(&self, timeout: Duration) -> bool {
        let readiness = self.readiness.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let (readiness, _timed_out) = self.changed
            .wait_timeout_while(readiness, timeout, |readiness| *readiness == Readiness::Pending)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *readiness == Readiness::Listening
    }

    /// Returns `Ok(false)` if the flag had already flipped before.
    pub fn raise(&self, exit: Exit) -> Result<bool> {
        let value = match exit {
            Exit::Stopped => STOPPED,
            Exit::Interrupted => INTERRUPTED,
        };
        match self.state.compare_exchange(ALIVE, value, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => match &self.waker {
                Some(waker) => waker.wake().map(always),
                None => Ok(true),
            },
            Err(_) => Ok(false),
        }
    }

    pub fn check(&self) -> bool {
        self.state.load(Ordering::Acquire) == ALIVE
    }

    pub fn exit(&self) -> Option<Exit> {
        match self.state.load(Ordering::Acquire) {
            STOPPED => Some(Exit::Stopped),
            INTERRUPTED => Some(Exit::Interrupted),
            _ => None,
        }
    }
}

fn always<T>(_: T) -> bool {
    true
}
