//! # Datagram Transport
//!
//! Drives one [`ReliabilityEngine`] over a datagram socket with two threads:
//!
//! - **scheduler** (`glide-sched`): drains the send queue into the engine,
//!   runs `update`, and sleeps until `check` says the next flush is due.
//! - **receive pump** (`glide-recv`): blocks on the socket, runs FEC decode →
//!   `input` → forced `flush` → drains complete messages to the listener.
//!
//! Both touch the engine only under one mutex; `input`, `flush`, `update`
//! and the queue drain each run as a single critical section. Application
//! threads never take that lock on the normal send path: [`DatagramTransport::send`]
//! hands the buffer to the scheduler over a crossbeam channel.
//! [`DatagramTransport::send_immediate`] is the exception, for control
//! traffic that would rather contend for the lock than wait for a wakeup.
//!
//! Shutdown is cooperative. Construction installs a socket read timeout
//! through [`DatagramSocket::set_poll_timeout`], so the pump rechecks the
//! liveness flag at least every `recv_poll_ms`; the scheduler is woken by a
//! `Shutdown` command. Messages still queued at `close()` are dropped.
//!
//! Once the engine declares the link dead the scheduler stops flushing and
//! idles until `close()`.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use quanta::Instant;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::engine::{ReliabilityEngine, MAX_FRAGMENTS};
use crate::error::{SendError, TransportError};
use crate::fec::FecCodec;
use crate::stats::TransportStats;
use crate::wire::seq_diff;

/// Largest datagram the pump will read.
const RECV_BUFFER_LEN: usize = 65_536;

// ─── Seams ───────────────────────────────────────────────────────────────────

/// Unreliable datagram endpoint.
///
/// `recv_from` may return `WouldBlock` / `TimedOut` to let the pump check
/// for shutdown; any other error ends the pump.
pub trait DatagramSocket: Send + Sync + 'static {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize>;

    /// Bound how long one `recv_from` may block. Sockets whose receive
    /// already returns periodically can keep the default no-op.
    fn set_poll_timeout(&self, timeout: Duration) -> io::Result<()> {
        let _ = timeout;
        Ok(())
    }
}

impl DatagramSocket for UdpSocket {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        UdpSocket::recv_from(self, buf)
    }

    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, buf, addr)
    }

    fn set_poll_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(timeout))
    }
}

/// Receives reassembled messages on the pump thread.
pub trait TransportListener: Send + 'static {
    fn on_message(&mut self, message: Bytes);

    /// Called once when the socket fails; the pump exits afterwards.
    fn on_error(&mut self, error: &io::Error) {
        let _ = error;
    }
}

impl TransportListener for Sender<Bytes> {
    fn on_message(&mut self, message: Bytes) {
        let _ = self.send(message);
    }
}

// ─── Clock ───────────────────────────────────────────────────────────────────

/// Millisecond clock for the engine, wrapping at 32 bits.
#[derive(Clone, Copy)]
struct Clock {
    origin: Instant,
}

impl Clock {
    fn new() -> Self {
        Clock {
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}

// ─── Shared State ────────────────────────────────────────────────────────────

enum Command {
    Send(Bytes),
    Shutdown,
}

/// Everything guarded by the engine lock.
struct Session {
    engine: ReliabilityEngine,
    fec: Option<FecCodec>,
    remote: Option<SocketAddr>,
    stats: TransportStats,
    wrapped: Vec<Bytes>,
}

impl Session {
    /// Send every datagram the engine has produced, FEC-wrapping if enabled.
    fn transmit<S: DatagramSocket>(&mut self, socket: &S) {
        let Session {
            engine,
            fec,
            remote,
            stats,
            wrapped,
        } = self;

        for datagram in engine.drain_output() {
            let Some(addr) = *remote else {
                continue;
            };
            wrapped.clear();
            match fec {
                Some(codec) => {
                    if let Err(e) = codec.encode(&datagram, wrapped) {
                        warn!(error = %e, len = datagram.len(), "FEC encode failed, dropping datagram");
                        continue;
                    }
                }
                None => wrapped.push(datagram),
            }
            for packet in wrapped.drain(..) {
                match socket.send_to(&packet, addr) {
                    Ok(n) => {
                        stats.datagrams_sent += 1;
                        stats.bytes_sent += n as u64;
                    }
                    Err(e) => {
                        stats.send_errors += 1;
                        debug!(error = %e, %addr, "datagram send failed");
                    }
                }
            }
        }
    }

    /// Feed one raw datagram through FEC and into the engine.
    fn ingest(&mut self, datagram: &[u8]) {
        let Session {
            engine,
            fec,
            stats,
            wrapped,
            ..
        } = self;

        match fec {
            Some(codec) => {
                wrapped.clear();
                // Structural FEC errors are counted and logged by the codec.
                let _ = codec.decode(datagram, wrapped);
                for payload in wrapped.drain(..) {
                    if engine.input(&payload).is_err() {
                        stats.input_errors += 1;
                    }
                }
            }
            None => {
                if engine.input(datagram).is_err() {
                    stats.input_errors += 1;
                }
            }
        }
    }
}

struct Shared<S> {
    socket: S,
    session: Mutex<Session>,
    running: AtomicBool,
    dead: AtomicBool,
    clock: Clock,
    interval: u32,
}

impl<S: DatagramSocket> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn note_dead(&self, session: &Session) {
        if session.engine.is_dead_link() {
            self.dead.store(true, Ordering::Release);
        }
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Reliable message transport over one datagram socket.
pub struct DatagramTransport<S: DatagramSocket = UdpSocket> {
    shared: Arc<Shared<S>>,
    commands: Sender<Command>,
    command_rx: Option<Receiver<Command>>,
    workers: Vec<thread::JoinHandle<()>>,
    config: TransportConfig,
    mss: usize,
}

impl DatagramTransport<UdpSocket> {
    /// Bind a UDP socket with the configured kernel buffer sizes and wrap it.
    pub fn bind(addr: impl ToSocketAddrs, config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "no address to bind")
        })?;

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        if config.recv_buffer_bytes > 0 {
            if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_bytes) {
                warn!(error = %e, bytes = config.recv_buffer_bytes, "could not size receive buffer");
            }
        }
        if config.send_buffer_bytes > 0 {
            if let Err(e) = socket.set_send_buffer_size(config.send_buffer_bytes) {
                warn!(error = %e, bytes = config.send_buffer_bytes, "could not size send buffer");
            }
        }
        socket.bind(&addr.into())?;
        debug!(
            %addr,
            recv_buffer = socket.recv_buffer_size().unwrap_or(0),
            send_buffer = socket.send_buffer_size().unwrap_or(0),
            "socket bound"
        );

        Self::new(socket.into(), config)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }
}

impl<S: DatagramSocket> DatagramTransport<S> {
    /// Wrap an already-bound socket. Installs the `recv_poll_ms` read
    /// timeout so `close()` never waits on a blocked receive.
    pub fn new(socket: S, config: TransportConfig) -> Result<Self, TransportError> {
        config.validate()?;
        socket.set_poll_timeout(Duration::from_millis(config.recv_poll_ms))?;

        let engine = ReliabilityEngine::with_overhead(&config.engine, config.fec_overhead());
        let mss = engine.mss();
        let interval = engine.interval();
        let fec = config
            .fec
            .enabled
            .then(|| FecCodec::new(config.fec.group_size));

        let session = Session {
            engine,
            fec,
            remote: config.remote,
            stats: TransportStats::default(),
            wrapped: Vec::new(),
        };
        let (commands, command_rx) = unbounded();

        Ok(DatagramTransport {
            shared: Arc::new(Shared {
                socket,
                session: Mutex::new(session),
                running: AtomicBool::new(true),
                dead: AtomicBool::new(false),
                clock: Clock::new(),
                interval,
            }),
            commands,
            command_rx: Some(command_rx),
            workers: Vec::new(),
            config,
            mss,
        })
    }

    /// Spawn the scheduler and the receive pump. Messages go to `listener`.
    pub fn start(&mut self, listener: impl TransportListener) -> Result<(), TransportError> {
        let command_rx = self
            .command_rx
            .take()
            .ok_or(TransportError::AlreadyStarted)?;
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(SendError::Closed.into());
        }

        let shared = self.shared.clone();
        let scheduler = thread::Builder::new()
            .name("glide-sched".into())
            .spawn(move || run_scheduler(shared, command_rx))
            .expect("failed to spawn transport scheduler");

        let shared = self.shared.clone();
        let pump = thread::Builder::new()
            .name("glide-recv".into())
            .spawn(move || run_pump(shared, listener))
            .expect("failed to spawn transport receive pump");

        self.workers.push(scheduler);
        self.workers.push(pump);
        info!(
            conv = self.config.engine.conv,
            remote = ?self.config.remote,
            fec = self.config.fec.enabled,
            "transport started"
        );
        Ok(())
    }

    /// Queue a message for the scheduler thread. Never takes the engine lock.
    pub fn send(&self, data: impl Into<Bytes>) -> Result<(), SendError> {
        let data = data.into();
        self.precheck(data.len())?;
        self.commands
            .send(Command::Send(data))
            .map_err(|_| SendError::Closed)
    }

    /// Queue and flush a message on the calling thread, under the engine lock.
    pub fn send_immediate(&self, data: &[u8]) -> Result<(), TransportError> {
        self.precheck(data.len())?;
        let mut session = self.shared.lock();
        if session.remote.is_none() {
            return Err(TransportError::NoRemote);
        }
        session.engine.send(data)?;
        session.engine.flush(self.shared.clock.now_ms());
        session.transmit(&self.shared.socket);
        self.shared.note_dead(&session);
        Ok(())
    }

    /// Reject what the engine would reject, without touching it.
    ///
    /// Stream-mode tail coalescing is not credited, so the fragment count
    /// here is an upper bound and anything accepted also fits the engine.
    fn precheck(&self, len: usize) -> Result<(), SendError> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        if self.is_dead_link() {
            return Err(SendError::DeadLink);
        }
        if len == 0 {
            return Err(SendError::Empty);
        }
        let fragments = len.div_ceil(self.mss);
        let window = self.config.engine.recv_window as usize;
        if fragments >= window || fragments > MAX_FRAGMENTS {
            return Err(SendError::Capacity { fragments, window });
        }
        Ok(())
    }

    /// Terminal once true; close and recreate the transport.
    pub fn is_dead_link(&self) -> bool {
        self.shared.dead.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Peer address, configured or learned from the first datagram.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.shared.lock().remote
    }

    /// Segments queued or in flight inside the engine.
    pub fn wait_send(&self) -> usize {
        self.shared.lock().engine.wait_send()
    }

    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn stats(&self) -> TransportStats {
        let session = self.shared.lock();
        TransportStats {
            engine: session.engine.stats().clone(),
            fec: session.fec.as_ref().map(|f| f.stats()),
            ..session.stats.clone()
        }
    }

    /// Stop both threads and wait for them. Idempotent.
    pub fn close(&mut self) {
        let was_running = self.shared.running.swap(false, Ordering::AcqRel);
        let _ = self.commands.send(Command::Shutdown);
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if was_running {
            info!(conv = self.config.engine.conv, "transport closed");
        }
    }
}

impl<S: DatagramSocket> Drop for DatagramTransport<S> {
    fn drop(&mut self) {
        self.close();
    }
}

// ─── Worker Loops ────────────────────────────────────────────────────────────

fn run_scheduler<S: DatagramSocket>(shared: Arc<Shared<S>>, commands: Receiver<Command>) {
    let mut pending: Vec<Bytes> = Vec::new();

    loop {
        let mut shutdown = false;
        for command in commands.try_iter() {
            match command {
                Command::Send(data) => pending.push(data),
                Command::Shutdown => shutdown = true,
            }
        }
        if shutdown || !shared.running.load(Ordering::Acquire) {
            break;
        }
        if shared.dead.load(Ordering::Acquire) {
            idle_until_shutdown(&commands);
            break;
        }

        let wait_ms = {
            let mut session = shared.lock();
            for data in pending.drain(..) {
                if let Err(e) = session.engine.send(&data) {
                    warn!(error = %e, len = data.len(), "dropping queued message");
                }
            }
            let now = shared.clock.now_ms();
            session.engine.update(now);
            session.transmit(&shared.socket);
            shared.note_dead(&session);

            let next = session.engine.check(shared.clock.now_ms());
            seq_diff(next, now).clamp(1, shared.interval.max(1) as i32) as u64
        };

        match commands.recv_timeout(Duration::from_millis(wait_ms)) {
            Ok(Command::Send(data)) => pending.push(data),
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

/// Discard sends until `close()`; a dead engine accepts nothing.
fn idle_until_shutdown(commands: &Receiver<Command>) {
    debug!("link dead, scheduler idle until close");
    while let Ok(Command::Send(_)) = commands.recv() {}
}

fn run_pump<S: DatagramSocket>(shared: Arc<Shared<S>>, mut listener: impl TransportListener) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    let mut messages: Vec<Bytes> = Vec::new();

    while shared.running.load(Ordering::Acquire) {
        let (len, from) = match shared.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue;
            }
            Err(e) => {
                if shared.running.load(Ordering::Acquire) {
                    warn!(error = %e, "socket receive failed, stopping receive pump");
                    listener.on_error(&e);
                }
                break;
            }
        };

        {
            let mut session = shared.lock();
            session.stats.datagrams_received += 1;
            session.stats.bytes_received += len as u64;
            if session.remote.is_none() {
                info!(peer = %from, "learned remote address");
                session.remote = Some(from);
            }

            session.ingest(&buf[..len]);
            if !shared.dead.load(Ordering::Acquire) {
                session.engine.flush(shared.clock.now_ms());
                session.transmit(&shared.socket);
                shared.note_dead(&session);
            }

            while let Ok(message) = session.engine.recv() {
                messages.push(message);
            }
            session.stats.messages_delivered += messages.len() as u64;
        }

        for message in messages.drain(..) {
            listener.on_message(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_near_zero() {
        let clock = Clock::new();
        assert!(clock.now_ms() < 1_000);
    }

    #[test]
    fn send_precheck_rejects_before_queueing() {
        let transport = DatagramTransport::bind("127.0.0.1:0", TransportConfig::default()).unwrap();
        assert_eq!(transport.send(Bytes::new()), Err(SendError::Empty));
        let too_big = vec![0u8; transport.mss() * 128];
        assert!(matches!(
            transport.send(too_big),
            Err(SendError::Capacity { fragments: 128, window: 128 })
        ));
        assert!(matches!(
            transport.send_immediate(b"no peer yet"),
            Err(TransportError::NoRemote)
        ));
    }

    #[test]
    fn stream_mode_still_rejects_oversized_sends() {
        let mut config = TransportConfig::default();
        config.engine.stream = true;
        let transport = DatagramTransport::bind("127.0.0.1:0", config).unwrap();
        let too_big = vec![0u8; transport.mss() * 200];
        assert_eq!(
            transport.send(too_big),
            Err(SendError::Capacity {
                fragments: 200,
                window: 128
            })
        );
        assert_eq!(transport.wait_send(), 0);
        transport.send(vec![1u8; transport.mss() * 4]).unwrap();
    }

    #[test]
    fn bind_sizes_kernel_buffers() {
        let config = TransportConfig {
            recv_buffer_bytes: 65_536,
            send_buffer_bytes: 65_536,
            ..Default::default()
        };
        let transport = DatagramTransport::bind("127.0.0.1:0", config).unwrap();
        let socket = socket2::SockRef::from(&transport.shared.socket);
        assert!(socket.recv_buffer_size().unwrap() >= 65_536);
        assert!(socket.send_buffer_size().unwrap() >= 65_536);
    }

    #[test]
    fn fec_shrinks_mss() {
        let mut config = TransportConfig::default();
        let plain = DatagramTransport::bind("127.0.0.1:0", config.clone()).unwrap();
        config.fec.enabled = true;
        let wrapped = DatagramTransport::bind("127.0.0.1:0", config).unwrap();
        assert_eq!(plain.mss(), 1376);
        assert_eq!(wrapped.mss(), 1368);
    }

    #[test]
    fn start_twice_is_an_error() {
        let mut transport =
            DatagramTransport::bind("127.0.0.1:0", TransportConfig::default()).unwrap();
        let (tx, _rx) = crossbeam_channel::unbounded::<Bytes>();
        transport.start(tx.clone()).unwrap();
        assert!(matches!(
            transport.start(tx),
            Err(TransportError::AlreadyStarted)
        ));
        transport.close();
    }
}
