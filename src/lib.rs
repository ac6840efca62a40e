/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */

//! **mserve** provides the core of an ***interruptible***, thread-dispatching
//! TCP or UDP server.
//!
//! A [`mserve_rs::Server`](Server) binds a socket and turns it into a
//! cooperative polling loop: each attempt to accept a connection or to
//! receive a datagram is bounded by a short *poll timeout*, and failed
//! attempts are followed by a short *idle sleep* of `1 / backlog` seconds.
//! Every accepted connection or received datagram becomes an
//! [`mserve_rs::Event`](Event), which is handed to a handler running on a
//! [`mserve_rs::WorkerPool`](WorkerPool). The poll loop never waits for the
//! handlers.
//!
//! A [`mserve_rs::Canceller`](Canceller) stops the server, e.g. from another
//! thread or from the Ctrl+C (SIGINT) handler, see
//! [`Canceller::interrupt_on_ctrlc()`]. No further event is dispatched once
//! the server has been stopped, and the socket is shut down and closed
//! exactly once, no matter whether the loop ended because of a stop request,
//! an interrupt or a fatal socket error.
//!
//! # Usage
//!
//! Pick one of the presets, [`ServerConfig::tcp()`] or
//! [`ServerConfig::udp()`], then [`bind()`](Server::bind()) a server with a
//! *handler factory* that turns an event into a handler closure:
//!
//! ```no_run
//! use mserve_rs::{Event, Server, ServerConfig};
//!
//! let config = ServerConfig::udp().with_address(("127.0.0.1", 5000u16));
//! let server = Server::bind(config, |event: Event| move || {
//!     if let Event::Datagram(datagram) = event {
//!         println!("{} bytes from {}", datagram.payload().len(), datagram.peer_addr());
//!     }
//! }).unwrap();
//!
//! server.canceller().interrupt_on_ctrlc().unwrap();
//! server.run().unwrap();
//! ```
//!
//! The address family is selected by the shape of the address: a
//! `(host, port)` pair binds an IPv4 socket, a
//! `(host, port, flowinfo, scope_id)` quadruple binds an IPv6 socket.

mod address;
mod canceller;
mod config;
mod error;
mod event;
mod handlers;
mod pool;
mod server;
mod source;
mod utilities;

pub use address::{default_address, Address, Family, DEFAULT_PORT};
pub use canceller::{Canceller, Exit};
pub use config::{Operation, ServerConfig, SocketKind};
pub use error::ServerError;
pub use event::{Connection, Datagram, Event};
pub use handlers::Discard;
pub use pool::{SubmitError, Task, WorkerPool};
pub use server::{DefaultFactory, Server};
pub use source::{EventSource, SocketSource};
