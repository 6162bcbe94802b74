//! # Transport tests over real loopback sockets
//!
//! Two `DatagramTransport`s on 127.0.0.1. One side is configured with the
//! other's address; the other learns its peer from the first datagram.
//! The failure-path tests at the bottom drive the transport through a
//! scripted `DatagramSocket` instead.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use glide_transport::config::{EngineConfig, FecConfig, Mode, TransportConfig};
use glide_transport::{DatagramSocket, DatagramTransport, SendError, TransportListener};

const WAIT: Duration = Duration::from_secs(5);

fn config(mode: Mode, fec: bool) -> TransportConfig {
    TransportConfig {
        engine: EngineConfig {
            mode,
            ..Default::default()
        },
        fec: FecConfig {
            enabled: fec,
            group_size: 4,
        },
        recv_poll_ms: 10,
        ..Default::default()
    }
}

/// `(dialer, listener_side, dialer_rx, listener_rx)`; the listener side
/// has no configured remote.
fn pair(
    mode: Mode,
    fec: bool,
) -> (
    DatagramTransport,
    DatagramTransport,
    Receiver<Bytes>,
    Receiver<Bytes>,
) {
    let mut b = DatagramTransport::bind("127.0.0.1:0", config(mode, fec)).unwrap();
    let b_addr = b.local_addr().unwrap();

    let mut a_config = config(mode, fec);
    a_config.remote = Some(b_addr);
    let mut a = DatagramTransport::bind("127.0.0.1:0", a_config).unwrap();

    let (a_tx, a_rx) = unbounded();
    let (b_tx, b_rx) = unbounded();
    a.start(a_tx).unwrap();
    b.start(b_tx).unwrap();
    (a, b, a_rx, b_rx)
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_add(seed)).collect()
}

#[test]
fn large_message_arrives_whole_and_peer_is_learned() {
    let (a, b, a_rx, b_rx) = pair(Mode::Default, false);

    let message = pattern(5000, 3);
    a.send(message.clone()).unwrap();
    let received = b_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(&received[..], &message[..]);

    assert_eq!(b.remote(), Some(a.local_addr().unwrap()));
    b.send(Bytes::from_static(b"ack from b")).unwrap();
    assert_eq!(&a_rx.recv_timeout(WAIT).unwrap()[..], b"ack from b");

    b.send_immediate(b"right now").unwrap();
    assert_eq!(&a_rx.recv_timeout(WAIT).unwrap()[..], b"right now");

    let stats = b.stats();
    assert!(stats.datagrams_received >= 4);
    assert_eq!(stats.messages_delivered, 1);
    assert!(stats.fec.is_none());
}

#[test]
fn fec_wrapped_stream_keeps_order() {
    let (a, b, _a_rx, b_rx) = pair(Mode::Fast, true);

    let messages: Vec<Vec<u8>> = (0..50).map(|i| pattern(200 + i * 37, i as u8)).collect();
    for m in &messages {
        a.send(m.clone()).unwrap();
    }
    for m in &messages {
        let got = b_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(&got[..], &m[..]);
    }

    let a_fec = a.stats().fec.unwrap();
    assert!(a_fec.data_packets_sent > 0);
    assert_eq!(a_fec.parity_packets_sent, a_fec.data_packets_sent / 4);
    assert!(b.stats().fec.unwrap().data_packets_received > 0);
}

#[test]
fn close_is_idempotent_and_final() {
    let (mut a, mut b, _a_rx, _b_rx) = pair(Mode::Fast, false);
    assert!(a.is_running());

    a.close();
    a.close();
    assert!(!a.is_running());
    assert_eq!(a.send(Bytes::from_static(b"late")), Err(SendError::Closed));

    b.close();
    assert!(!b.is_dead_link());
}

#[test]
fn close_returns_for_socket_passed_to_new() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut transport = DatagramTransport::new(socket, config(Mode::Fast, false)).unwrap();
    let (tx, _rx) = unbounded();
    transport.start(tx).unwrap();
    thread::sleep(Duration::from_millis(100));

    let (done_tx, done_rx) = unbounded();
    thread::spawn(move || {
        transport.close();
        let _ = done_tx.send(transport.is_running());
    });
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(3)), Ok(false));
}

// ─── Failure paths ───────────────────────────────────────────────────────────

/// Accepts and discards every send; the first receive fails with
/// `ConnectionReset`, later ones time out.
struct ScriptedSocket {
    sent: Arc<AtomicUsize>,
    poll_timeout_ms: Arc<AtomicU64>,
    failed: AtomicBool,
}

impl DatagramSocket for ScriptedSocket {
    fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        thread::sleep(Duration::from_millis(20));
        if self.failed.swap(true, Ordering::SeqCst) {
            Err(io::ErrorKind::WouldBlock.into())
        } else {
            Err(io::ErrorKind::ConnectionReset.into())
        }
    }

    fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    fn set_poll_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.poll_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
        Ok(())
    }
}

struct ErrorRecorder {
    errors: Sender<io::ErrorKind>,
}

impl TransportListener for ErrorRecorder {
    fn on_message(&mut self, _message: Bytes) {}

    fn on_error(&mut self, error: &io::Error) {
        let _ = self.errors.send(error.kind());
    }
}

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn socket_error_reaches_listener_once_and_link_dies() {
    let sent = Arc::new(AtomicUsize::new(0));
    let poll_timeout_ms = Arc::new(AtomicU64::new(0));
    let socket = ScriptedSocket {
        sent: sent.clone(),
        poll_timeout_ms: poll_timeout_ms.clone(),
        failed: AtomicBool::new(false),
    };

    let mut transport_config = config(Mode::Fast, false);
    transport_config.engine.dead_link = 3;
    transport_config.remote = Some("127.0.0.1:9".parse().unwrap());
    let mut transport = DatagramTransport::new(socket, transport_config).unwrap();
    assert_eq!(poll_timeout_ms.load(Ordering::SeqCst), 10);

    let (errors_tx, errors_rx) = unbounded();
    transport.start(ErrorRecorder { errors: errors_tx }).unwrap();
    transport.send(Bytes::from_static(b"into the void")).unwrap();

    // The pump stops on the error; the scheduler keeps retransmitting.
    assert_eq!(errors_rx.recv_timeout(WAIT), Ok(io::ErrorKind::ConnectionReset));
    assert!(transport.is_running());
    assert!(wait_for(WAIT, || transport.is_dead_link()));
    assert!(sent.load(Ordering::SeqCst) >= 4);
    assert!(transport.stats().engine.timeout_retransmits >= 3);

    // Terminal: nothing more goes out and new sends are refused.
    let sent_at_death = sent.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
    assert_eq!(sent.load(Ordering::SeqCst), sent_at_death);
    assert_eq!(
        transport.send(Bytes::from_static(b"late")),
        Err(SendError::DeadLink)
    );
    assert!(transport.is_dead_link());

    transport.close();
    assert!(!transport.is_running());
    assert!(transport.is_dead_link());
    assert!(errors_rx.try_recv().is_err());
}
