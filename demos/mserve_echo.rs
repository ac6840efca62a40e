/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::env;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;

use mserve_rs::{Event, Exit, Server, ServerConfig, ServerError};

use lazy_rc::LazyArc;
use log::{info, warn, error};

static CPU_COUNT: LazyArc<usize> = LazyArc::empty();

const PORT_NUMBER: u16 = 8080;
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    /* Initialize the log output */
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"));

    /* Print logo */
    info!("mserve - Example Echo Server [Version {}]", PKG_VERSION);

    /* Load configuration, if a file was given */
    let tcp_config = match env::args().nth(1) {
        Some(path) => match ServerConfig::from_file(&path) {
            Ok(config) => config,
            Err(error) => return error!("Failed to load configuration from {:?}: {}", path, error),
        },
        None => ServerConfig::tcp().with_address(("127.0.0.1", PORT_NUMBER)),
    };
    let tcp_config = tcp_config.with_workers(NonZeroUsize::new(*cpu_count()));

    /* Replies leave through a separate socket, so clients see them coming from its ephemeral port */
    let udp_config = ServerConfig::udp().with_address(("127.0.0.1", PORT_NUMBER));
    let reply_socket = match UdpSocket::bind(("127.0.0.1", 0)) {
        Ok(socket) => Arc::new(socket),
        Err(error) => return error!("Failed to bind reply socket: {:?}", error),
    };
    match reply_socket.local_addr() {
        Ok(addr) => info!("UDP replies are sent from {}", addr),
        Err(error) => warn!("Failed to query the reply socket address: {:?}", error),
    }

    /* Bind servers */
    let tcp_server = match Server::bind(tcp_config, |event: Event| move || echo_connection(event)) {
        Ok(server) => server,
        Err(error) => return error!("Failed to bind TCP server: {:?}", error),
    };
    let udp_server = match Server::bind(udp_config, move |event: Event| {
        let reply_socket = reply_socket.clone();
        move || echo_datagram(event, &reply_socket)
    }) {
        Ok(server) => server,
        Err(error) => return error!("Failed to bind UDP server: {:?}", error),
    };

    /* Register Ctrl+C handler; it interrupts the TCP server, which in turn stops the UDP server */
    let tcp_canceller = tcp_server.canceller();
    let udp_canceller = udp_server.canceller();
    if let Err(error) = tcp_canceller.interrupt_on_ctrlc() {
        return error!("Failed to register CTRL+C handler: {}", error);
    }

    info!("Echoing on tcp://{} and udp://{}", tcp_server.local_addr(), udp_server.local_addr());
    let udp_thread = thread::spawn(move || udp_server.run());

    /* Run TCP server on the main thread */
    report("TCP", tcp_server.run());
    if let Err(error) = udp_canceller.stop() {
        warn!("Failed to stop UDP server: {:?}", error);
    }
    match udp_thread.join() {
        Ok(result) => report("UDP", result),
        Err(_) => error!("UDP server thread has panicked!"),
    }

    /* Bye! */
    info!("That's it, goodbye!");
}

fn echo_connection(event: Event) {
    let connection = match event {
        Event::Connection(connection) => connection,
        Event::Datagram(datagram) => return warn!("[{}] Unexpected datagram on the TCP server", datagram.peer_addr()),
    };
    let peer = connection.peer_addr();
    let mut stream: TcpStream = connection.into_stream();
    let mut buffer = [0u8; 4096];
    loop {
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => if let Err(error) = stream.write_all(&buffer[..count]) {
                warn!("[{}] Write operation failed: {:?}", peer, error);
                break;
            },
            Err(error) if error.kind() == ErrorKind::Interrupted => (),
            Err(error) => {
                warn!("[{}] Read operation failed: {:?}", peer, error);
                break;
            },
        }
    }
    info!("[{}] Connection closed", peer);
}

fn echo_datagram(event: Event, socket: &UdpSocket) {
    if let Event::Datagram(datagram) = event {
        if let Err(error) = socket.send_to(datagram.payload(), datagram.peer_addr()) {
            warn!("[{}] Failed to send reply: {:?}", datagram.peer_addr(), error);
        }
    }
}

fn report(name: &str, result: Result<Exit, ServerError>) {
    match result {
        Ok(Exit::Interrupted) => warn!("{} server was interrupted!", name),
        Ok(Exit::Stopped) => info!("{} server has stopped.", name),
        Err(error) => error!("{} server failed: {}", name, error),
    }
}

fn cpu_count() -> Arc<usize> {
    CPU_COUNT.or_init_with(|| num_cpus::get().max(1))
}
