/*
 * mserve - Interruptible, thread-dispatching TCP/UDP server core
 * This is free and unencumbered software released into the public domain.
 */
use std::net::TcpStream;
use std::num::NonZeroUsize;
use std::thread;
use std::time::{Duration, Instant};

use mserve_rs::{Event, Exit, Server, ServerConfig};

const HANDLERS: usize = 4;

#[test]
fn interrupt_closes_socket_without_waiting_for_handlers() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = ServerConfig::tcp()
        .with_address(("127.0.0.1", 0u16))
        .with_backlog(100)
        .with_workers(NonZeroUsize::new(HANDLERS));
    let bound = config.poll_timeout + config.idle_sleep();

    let (started_tx, started_rx) = crossbeam_channel::unbounded::<()>();
    let (release_tx, release_rx) = crossbeam_channel::unbounded::<()>();
    let (finished_tx, finished_rx) = crossbeam_channel::unbounded::<()>();
    let server = Server::bind(config, move |event: Event| {
        let started_tx = started_tx.clone();
        let release_rx = release_rx.clone();
        let finished_tx = finished_tx.clone();
        move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
            drop(event);
            finished_tx.send(()).unwrap();
        }
    }).unwrap();
    let server_addr = server.local_addr();
    let canceller = server.canceller();
    let runner = thread::spawn(move || server.run());
    assert!(canceller.wait_listening(Duration::from_secs(5)), "server did not start listening");

    let clients: Vec<TcpStream> = (0..HANDLERS).map(|_| TcpStream::connect(server_addr).unwrap()).collect();
    for _ in 0..HANDLERS {
        started_rx.recv_timeout(Duration::from_secs(5)).expect("handler did not start");
    }

    let requested = Instant::now();
    assert!(canceller.interrupt().unwrap());
    assert_eq!(runner.join().unwrap().unwrap(), Exit::Interrupted);
    let elapsed = requested.elapsed();
    assert!(elapsed < bound + Duration::from_millis(500), "shutdown took {:?}", elapsed);

    /* the handlers are still blocked, yet the listening socket is gone */
    assert!(finished_rx.try_recv().is_err());
    assert!(!canceller.is_listening());
    assert!(TcpStream::connect(server_addr).is_err());

    drop(release_tx);
    for _ in 0..HANDLERS {
        finished_rx.recv_timeout(Duration::from_secs(5)).expect("handler did not finish");
    }
    drop(clients);
}

#[test]
fn stop_is_idempotent() {
    let server = Server::with_default_handler(ServerConfig::udp().with_address(("127.0.0.1", 0u16))).unwrap();
    let canceller = server.canceller();
    let other = canceller.clone();
    let runner = thread::spawn(move || server.run());
    assert!(canceller.wait_listening(Duration::from_secs(5)), "server did not start listening");

    assert!(canceller.stop().unwrap());
    assert!(!other.stop().unwrap());
    assert!(!other.interrupt().unwrap());
    assert_eq!(runner.join().unwrap().unwrap(), Exit::Stopped);
    assert_eq!(canceller.exit(), Some(Exit::Stopped));
}
