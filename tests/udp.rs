/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use mserve_rs::{Event, Exit, Server, ServerConfig};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn single_datagram_yields_single_event() {
    init_logger();
    let config = ServerConfig::udp()
        .with_address(("127.0.0.1", 0u16))
        .with_backlog(100)
        .with_workers(NonZeroUsize::new(2));
    assert_eq!(config.idle_sleep(), Duration::from_millis(10));

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let server = Server::bind(config, move |event: Event| {
        let event_tx = event_tx.clone();
        move || {
            if let Event::Datagram(datagram) = event {
                event_tx.send((datagram.payload().to_vec(), datagram.peer_addr())).unwrap();
            }
        }
    }).unwrap();
    let server_addr = server.local_addr();
    assert!(server_addr.is_ipv4());
    assert_ne!(server_addr.port(), 0);

    let canceller = server.canceller();
    let runner = thread::spawn(move || server.run());
    assert!(canceller.wait_listening(Duration::from_secs(5)), "server did not start listening");

    let client = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
    client.send_to(b"hello", server_addr).unwrap();

    let (payload, peer) = event_rx.recv_timeout(Duration::from_secs(5)).expect("datagram was not dispatched");
    assert_eq!(payload, b"hello");
    assert_eq!(peer, client.local_addr().unwrap());
    assert!(event_rx.recv_timeout(Duration::from_millis(200)).is_err());

    assert!(canceller.stop().unwrap());
    assert_eq!(runner.join().unwrap().unwrap(), Exit::Stopped);
}

#[test]
fn datagrams_are_dispatched_in_order() {
    init_logger();
    let config = ServerConfig::udp()
        .with_address(("127.0.0.1", 0u16))
        .with_workers(NonZeroUsize::new(1));

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let server = Server::bind(config, move |event: Event| {
        let event_tx = event_tx.clone();
        move || {
            if let Event::Datagram(datagram) = event {
                event_tx.send(datagram.into_payload()).unwrap();
            }
        }
    }).unwrap();
    let server_addr = server.local_addr();
    let canceller = server.canceller();
    let runner = thread::spawn(move || server.run());
    assert!(canceller.wait_listening(Duration::from_secs(5)), "server did not start listening");

    let client = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
    for n in 0u8..5 {
        client.send_to(&[n], server_addr).unwrap();
    }
    let received: Vec<Vec<u8>> = (0..5)
        .map(|_| event_rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    assert_eq!(received, (0u8..5).map(|n| vec![n]).collect::<Vec<_>>());

    canceller.stop().unwrap();
    assert_eq!(runner.join().unwrap().unwrap(), Exit::Stopped);
}

#[test]
fn oversized_datagram_is_truncated_to_buffer_length() {
    init_logger();
    let config = ServerConfig::udp()
        .with_address(("127.0.0.1", 0u16))
        .with_buffer_length(8);

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let server = Server::bind(config, move |event: Event| {
        let event_tx = event_tx.clone();
        move || {
            if let Event::Datagram(datagram) = event {
                event_tx.send(datagram.into_payload()).unwrap();
            }
        }
    }).unwrap();
    let server_addr = server.local_addr();
    let canceller = server.canceller();
    let runner = thread::spawn(move || server.run());
    assert!(canceller.wait_listening(Duration::from_secs(5)), "server did not start listening");

    let client = UdpSocket::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))).unwrap();
    client.send_to(b"0123456789abcdef", server_addr).unwrap();
    assert_eq!(event_rx.recv_timeout(Duration::from_secs(5)).unwrap(), b"01234567");

    canceller.stop().unwrap();
    runner.join().unwrap().unwrap();
}
