/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::io::{Result, ErrorKind};
use std::net::{SocketAddr, Shutdown, TcpListener as StdTcpListener, UdpSocket as StdUdpSocket};
use std::time::Duration;

use mio::{Events, Interest, Poll, Token, Waker};
use mio::net::{TcpListener as MioTcpListener, UdpSocket as MioUdpSocket};
use socket2::{Domain, Protocol, Socket, Type};

use log::{debug, warn};

use crate::config::{Operation, SocketKind};
use crate::error::{ERROR_NOT_LISTENING, ERROR_TIMEDOUT, ERROR_UNSUPPORTED};
use crate::Event;

const SOCKET: Token = Token(0);
const SHUTDOWN: Token = Token(usize::MAX);

/// The socket seam of a [`Server`](crate::Server)
///
/// An event source produces one [`Event`] per successful
/// [`poll_event()`](EventSource::poll_event()). When no event becomes ready
/// within the timeout, the call fails with a *transient* error, i.e. one of
/// kind `TimedOut`, `WouldBlock` or `Interrupted`; the server retries those.
/// Any other error is fatal.
pub trait EventSource: Send {
    /// Provides a waker that makes a pending `poll_event()` return early.
    fn waker(&self) -> Result<Option<Waker>> {
        Ok(None)
    }

    /// Starts listening for events.
    fn listen(&mut self, backlog: u32) -> Result<()>;

    /// Performs `operation`, waiting no longer than `timeout` for it.
    fn poll_event(&mut self, operation: Operation, timeout: Duration) -> Result<Event>;

    /// Shuts down and closes the underlying socket.
    fn shutdown(&mut self) -> Result<()>;
}

/// An [`EventSource`] on top of a real TCP or UDP socket
///
/// The socket is bound (with address and port reuse enabled) when the source
/// is created, but only starts listening on [`listen()`](EventSource::listen()).
/// Readiness is awaited with **`mio`**, so a stop request wakes up a pending
/// poll immediately instead of waiting for the timeout.
#[derive(Debug)]
pub struct SocketSource {
    socket: Option<Socket>,
    kind: SocketKind,
    local_addr: SocketAddr,
    poll: Poll,
    events: Events,
    state: State,
    buffer: Vec<u8>,
}

#[derive(Debug)]
enum State {
    Bound,
    Accepting {
        registered: MioTcpListener,
        listener: StdTcpListener,
    },
    Receiving(MioUdpSocket),
    Closed,
}

impl SocketSource {
    pub fn bind(kind: SocketKind, addr: SocketAddr, buffer_length: usize) -> Result<Self> {
        let socket = Self::initialize(kind, addr)?;
        let local_addr = socket.local_addr()?.as_socket().unwrap_or(addr);

        Ok(Self {
            socket: Some(socket),
            kind,
            local_addr,
            poll: Poll::new()?,
            events: Events::with_capacity(16),
            state: State::Bound,
            buffer: vec![0u8; buffer_length],
        })
    }

    fn initialize(kind: SocketKind, addr: SocketAddr) -> Result<Socket> {
        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = match kind {
            SocketKind::Stream => Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?,
            SocketKind::Datagram => Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?,
        };
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        Ok(socket)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn try_event(&mut self, operation: Operation) -> Result<Option<Event>> {
        match (&self.state, operation) {
            (State::Accepting { listener, .. }, Operation::Accept) => Self::event_accept(listener),
            (State::Receiving(socket), Operation::ReceiveFrom) => Self::event_recv(socket, &mut self.buffer),
            (State::Bound, _) | (State::Closed, _) => ERROR_NOT_LISTENING.result(),
            _ => ERROR_UNSUPPORTED.result(),
        }
    }

    fn event_accept(listener: &StdTcpListener) -> Result<Option<Event>> {
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    return Ok(Some((stream, peer).into()));
                },
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::WouldBlock => return Ok(None),
                    _ => return Err(error),
                },
            }
        }
    }

    fn event_recv(socket: &MioUdpSocket, buffer: &mut [u8]) -> Result<Option<Event>> {
        loop {
            match socket.recv_from(buffer) {
                Ok((count, peer)) => return Ok(Some((buffer[..count].to_vec(), peer).into())),
                Err(error) => match error.kind() {
                    ErrorKind::Interrupted => (),
                    ErrorKind::WouldBlock => return Ok(None),
                    _ => return Err(error),
                },
            }
        }
    }
}

impl EventSource for SocketSource {
    fn waker(&self) -> Result<Option<Waker>> {
        Waker::new(self.poll.registry(), SHUTDOWN).map(Some)
    }

    fn listen(&mut self, backlog: u32) -> Result<()> {
        let socket = match (&self.state, &self.socket) {
            (State::Bound, Some(socket)) => socket.try_clone()?,
            _ => return ERROR_NOT_LISTENING.result(),
        };
        self.state = match self.kind {
            SocketKind::Stream => {
                socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;
                let listener = StdTcpListener::from(socket);
                let mut registered = MioTcpListener::from_std(listener.try_clone()?);
                self.poll.registry().register(&mut registered, SOCKET, Interest::READABLE)?;
                State::Accepting { registered, listener }
            },
            SocketKind::Datagram => {
                let mut registered = MioUdpSocket::from_std(StdUdpSocket::from(socket));
                self.poll.registry().register(&mut registered, SOCKET, Interest::READABLE)?;
                State::Receiving(registered)
            },
        };
        Ok(())
    }

    fn poll_event(&mut self, operation: Operation, timeout: Duration) -> Result<Event> {
        if let Some(event) = self.try_event(operation)? {
            return Ok(event);
        }

        self.poll.poll(&mut self.events, Some(timeout))?;
        let ready = self.events.iter().any(|event| event.token() == SOCKET);

        if ready {
            if let Some(event) = self.try_event(operation)? {
                return Ok(event);
            }
        }
        ERROR_TIMEDOUT.result()
    }

    fn shutdown(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Accepting { mut registered, listener } => {
                deregister(&self.poll, &mut registered);
                drop(listener);
            },
            State::Receiving(mut registered) => deregister(&self.poll, &mut registered),
            State::Bound | State::Closed => (),
        }

        if let Some(socket) = self.socket.take() {
            match socket.shutdown(Shutdown::Both) {
                Ok(_) => (),
                Err(error) if error.kind() == ErrorKind::NotConnected => debug!("Socket was not connected, nothing to shut down"),
                Err(error) => return Err(error),
            }
            debug!("Socket {} has been closed", self.local_addr);
        }
        Ok(())
    }
}

fn deregister<S: mio::event::Source>(poll: &Poll, source: &mut S) {
    if let Err(error) = poll.registry().deregister(source) {
        warn!("Failed to de-register: {:?}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpStream, UdpSocket};

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    #[test]
    fn udp_source_receives_datagram() {
        let mut source = SocketSource::bind(SocketKind::Datagram, loopback(), 512).unwrap();
        source.listen(100).unwrap();
        let client = UdpSocket::bind(loopback()).unwrap();
        client.send_to(b"ping", source.local_addr()).unwrap();

        let event = (0..500)
            .find_map(|_| source.poll_event(Operation::ReceiveFrom, Duration::from_millis(10)).ok())
            .expect("no datagram received");
        match event {
            Event::Datagram(datagram) => {
                assert_eq!(datagram.payload(), b"ping");
                assert_eq!(datagram.peer_addr(), client.local_addr().unwrap());
            },
            other => panic!("unexpected event: {:?}", other),
        }
        source.shutdown().unwrap();
    }

    #[test]
    fn idle_source_times_out() {
        let mut source = SocketSource::bind(SocketKind::Stream, loopback(), 1024).unwrap();
        source.listen(10).unwrap();
        let error = source.poll_event(Operation::Accept, Duration::from_millis(5)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::TimedOut);
        source.shutdown().unwrap();
    }

    #[test]
    fn mismatched_operation_is_unsupported() {
        let mut source = SocketSource::bind(SocketKind::Datagram, loopback(), 512).unwrap();
        source.listen(1).unwrap();
        let error = source.poll_event(Operation::Accept, Duration::from_millis(1)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Unsupported);
        source.shutdown().unwrap();
    }

    #[test]
    fn polling_before_listen_fails() {
        let mut source = SocketSource::bind(SocketKind::Stream, loopback(), 512).unwrap();
        let error = source.poll_event(Operation::Accept, Duration::from_millis(1)).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NotConnected);
    }

    #[test]
    fn shutdown_releases_listener() {
        let mut source = SocketSource::bind(SocketKind::Stream, loopback(), 1024).unwrap();
        source.listen(10).unwrap();
        let addr = source.local_addr();
        assert!(TcpStream::connect(addr).is_ok());
        source.shutdown().unwrap();
        source.shutdown().unwrap();
        assert!(TcpStream::connect(addr).is_err());
    }
}
