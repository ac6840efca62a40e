/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, trace, warn};

use crate::address::default_address;
use crate::error::is_transient;
use crate::handlers::Discard;
use crate::pool::Task;
use crate::source::{EventSource, SocketSource};
use crate::utilities::Flag;
use crate::{Canceller, Event, Exit, ServerConfig, ServerError, WorkerPool};

/// An interruptible server that dispatches events to a worker pool
///
/// The server owns a bound socket (more generally: an [`EventSource`]) and
/// turns it into a polling loop. Every accepted connection or received
/// datagram becomes an [`Event`], the *handler factory* turns that event into
/// a handler, and the handler is submitted to a [`WorkerPool`]. The poll loop
/// never waits for a handler to finish.
///
/// A server runs at most once: [`run()`](Server::run()) consumes it. It keeps
/// polling until it is stopped through its [`Canceller`], or until a fatal
/// socket error occurs. On *every* exit path, the socket is shut down and
/// closed exactly once.
///
/// Stopping the server takes at most `poll_timeout + idle_sleep`; when the
/// socket-backed source is used, a stop request also wakes up a pending poll.
pub struct Server<F, S = SocketSource> {
    config: ServerConfig,
    source: S,
    flag: Arc<Flag>,
    factory: F,
}

impl<F, H> Server<F, SocketSource>
where
    F: Fn(Event) -> H + Send,
    H: FnOnce() + Send + 'static,
{
    /// Creates a server and binds its socket.
    ///
    /// Configuration errors are reported before any socket is created. The
    /// server does not listen, and no worker thread is started, until it is
    /// [`run()`](Server::run()).
    pub fn bind(config: ServerConfig, factory: F) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = match &config.address {
            Some(address) => address.resolve()?,
            None => default_address(config.kind),
        };
        let source = SocketSource::bind(config.kind, addr, config.buffer_length)?;
        debug!("Server bound to {} ({:?})", source.local_addr(), config.kind);
        Self::with_source(config, source, factory)
    }
}

/// Handler factory of a server created by
/// [`with_default_handler()`](Server::with_default_handler()).
pub type DefaultFactory = Box<dyn Fn(Event) -> Task + Send>;

impl Server<DefaultFactory, SocketSource> {
    /// Creates a server whose events are consumed by the [`Discard`] handler.
    pub fn with_default_handler(config: ServerConfig) -> Result<Self, ServerError> {
        let settings = config.clone();
        let factory: DefaultFactory = Box::new(move |event: Event| {
            let handler = Discard::new(event, &settings);
            Box::new(move || handler.handle()) as Task
        });
        Server::bind(config, factory)
    }
}

impl<F, S> Server<F, S> {
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns a new [`Canceller`] for this server.
    pub fn canceller(&self) -> Canceller {
        Canceller::from(self.flag.clone())
    }
}

impl<F> Server<F, SocketSource> {
    /// The address the socket is actually bound to, e.g. to find out an
    /// ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.source.local_addr()
    }
}

impl<F, H, S> Server<F, S>
where
    F: Fn(Event) -> H + Send,
    H: FnOnce() + Send + 'static,
    S: EventSource,
{
    /// Creates a server on top of an arbitrary event source.
    pub fn with_source(config: ServerConfig, source: S, factory: F) -> Result<Self, ServerError> {
        config.validate()?;
        let flag = Arc::new(Flag::new(source.waker()?));
        Ok(Self {
            config,
            source,
            flag,
            factory,
        })
    }

    /// Runs the poll loop on the current thread until the server is stopped.
    ///
    /// Returns how the server was stopped, or the fatal socket error that
    /// ended the loop. Either way, the socket has been released by the time
    /// this function returns; handlers that are still running keep running.
    pub fn run(self) -> Result<Exit, ServerError> {
        let Self { config, source, flag, factory } = self;
        let mut source = ShutdownGuard { source, flag: flag.clone() };

        let pool = WorkerPool::new(config.workers, config.queue_depth)?;
        let result = match source.listen(config.backlog) {
            Ok(()) => {
                flag.set_listening();
                info!("Server is listening: kind={:?}, backlog={}, workers={:?}", config.kind, config.backlog, pool.workers());
                poll_loop(&config, &mut *source, &flag, &factory, &pool)
            },
            Err(error) => Err(error.into()),
        };
        drop(source);

        if let Err(error) = flag.raise(Exit::Stopped) {
            warn!("Failed to signal the stop: {:?}", error);
        }
        match result {
            Ok(_) => {
                let exit = flag.exit().unwrap_or(Exit::Stopped);
                info!("Server has shut down: {:?}", exit);
                Ok(exit)
            },
            Err(error) => {
                error!("Server has shut down after a fatal error: {:?}", error);
                Err(error)
            },
        }
    }
}

fn poll_loop<F, H, S>(config: &ServerConfig, source: &mut S, flag: &Flag, factory: &F, pool: &WorkerPool) -> Result<(), ServerError>
where
    F: Fn(Event) -> H,
    H: FnOnce() + Send + 'static,
    S: EventSource,
{
    let idle_sleep = config.idle_sleep();

    loop {
        if !flag.check() {
            return Ok(());
        }
        let operation = match config.event_source {
            Some(operation) => operation,
            None => return Ok(()),
        };

        match source.poll_event(operation, config.poll_timeout) {
            Ok(event) => {
                if !flag.check() {
                    debug!("Discarding event from {}, the server is stopping", event.peer_addr());
                    return Ok(());
                }
                debug!("Dispatching event from {}", event.peer_addr());
                if let Err(error) = pool.submit(factory(event)) {
                    warn!("Failed to dispatch the event: {}", error);
                }
            },
            Err(error) if is_transient(&error) => {
                trace!("No event: {}", error);
                thread::sleep(idle_sleep);
            },
            Err(error) => return Err(error.into()),
        }
    }
}

/// Shuts the event source down when dropped, including during unwinding,
/// and marks the server as no longer listening.
struct ShutdownGuard<S: EventSource> {
    source: S,
    flag: Arc<Flag>,
}

impl<S: EventSource> Deref for ShutdownGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.source
    }
}

impl<S: EventSource> DerefMut for ShutdownGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: EventSource> Drop for ShutdownGuard<S> {
    fn drop(&mut self) {
        if let Err(error) = self.source.shutdown() {
            warn!("Failed to shut down the socket: {:?}", error);
        }
        self.flag.set_closed();
    }
}
