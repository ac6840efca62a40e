/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::io::Result as IoResult;
use std::net::{SocketAddr, Shutdown, TcpStream};

/// One occurrence at the server socket, handed to exactly one handler
#[derive(Debug)]
pub enum Event {
    /// A newly accepted connection
    Connection(Connection),
    /// A received datagram
    Datagram(Datagram),
}

impl Event {
    /// Get the address of the peer that caused this event.
    pub fn peer_addr(&self) -> SocketAddr {
        match self {
            Self::Connection(connection) => connection.peer_addr(),
            Self::Datagram(datagram) => datagram.peer_addr(),
        }
    }
}

impl From<(TcpStream, SocketAddr)> for Event {
    fn from((stream, peer): (TcpStream, SocketAddr)) -> Self {
        Self::Connection(Connection { stream, peer })
    }
}

impl From<(Vec<u8>, SocketAddr)> for Event {
    fn from((payload, peer): (Vec<u8>, SocketAddr)) -> Self {
        Self::Datagram(Datagram { payload, peer })
    }
}

/// An accepted TCP connection
///
/// The wrapped [`std::net::TcpStream`] is in *blocking* mode and owned by the
/// handler; it does not share any state with the listening socket.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    /// Get the *peer* socket address of this TCP connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Get the *local* socket address of this TCP connection.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Shuts down the read, write, or both halves of this TCP connection.
    pub fn shutdown(&self, how: Shutdown) -> IoResult<()> {
        self.stream.shutdown(how)
    }
}

/// A received UDP datagram
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    payload: Vec<u8>,
    peer: SocketAddr,
}

impl Datagram {
    /// Get the address of the sender.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..]
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}
