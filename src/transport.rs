//! Socket loops for the two loopback links.
//!
//! The receive loop connects to the peer, reads until the peer closes and
//! publishes the bytes to the inbound mailbox. Bytes read before a failed
//! connection are kept and completed by the next read. The send loop listens for the
//! peer, writes whatever batch is staged in the outbound mailbox and closes.
//! Socket failures never escape a loop: the socket is dropped, rebuilt and the
//! loop carries on. Every `recycle_after` iterations each loop hands over to a
//! freshly spawned task.

use crate::config::BridgeConfig;
use crate::mailbox::Mailbox;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub receive_addr: SocketAddr,
    pub send_addr: SocketAddr,
    pub receive_sleep: Duration,
    pub send_sleep: Duration,
    pub recycle_after: u32,
    pub connect_timeout: Duration,
}

impl From<&BridgeConfig> for TransportSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            receive_addr: config.receive_addr(),
            send_addr: config.send_addr(),
            receive_sleep: Duration::from_millis(config.transport.receive_sleep_ms),
            send_sleep: Duration::from_millis(config.transport.send_sleep_ms),
            recycle_after: config.transport.recycle_after.max(1),
            connect_timeout: Duration::from_millis(config.transport.connect_timeout_ms.max(1)),
        }
    }
}

/// Counters shared by both loops.
#[derive(Debug, Default)]
pub struct TransportCounters {
    pub batches_received: AtomicU64,
    pub batches_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub socket_errors: AtomicU64,
    pub recycles: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub batches_received: u64,
    pub batches_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub socket_errors: u64,
    pub recycles: u64,
}

impl TransportCounters {
    pub fn snapshot(&self) -> TransportStats {
        TransportStats {
            batches_received: self.batches_received.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            socket_errors: self.socket_errors.load(Ordering::Relaxed),
            recycles: self.recycles.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Running transport. Dropping the handle also stops both loops.
#[derive(Debug)]
pub struct TransportHandle {
    shutdown: watch::Sender<bool>,
    receive: JoinHandle<()>,
    send: JoinHandle<()>,
    counters: Arc<TransportCounters>,
}

impl TransportHandle {
    pub fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }

    /// Signals both loops and waits for them to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.receive.await {
            warn!(error = %e, "Receive loop ended abnormally");
        }
        if let Err(e) = self.send.await {
            warn!(error = %e, "Send loop ended abnormally");
        }
        info!("Transport stopped");
    }
}

/// Starts both loops on the current tokio runtime.
pub fn spawn(settings: TransportSettings, inbound: Mailbox, outbound: Mailbox) -> TransportHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let counters = Arc::new(TransportCounters::default());

    info!(
        receive = %settings.receive_addr,
        send = %settings.send_addr,
        "Starting transport"
    );

    let receive = tokio::spawn(supervise_receive(
        settings.clone(),
        inbound,
        shutdown_rx.clone(),
        Arc::clone(&counters),
    ));
    let send = tokio::spawn(supervise_send(
        settings,
        outbound,
        shutdown_rx,
        Arc::clone(&counters),
    ));

    TransportHandle {
        shutdown,
        receive,
        send,
        counters,
    }
}

enum CycleEnd<T> {
    Recycle(T),
    Shutdown,
}

/// Bytes the receive loop holds across iterations and recycles.
#[derive(Debug, Default)]
struct ReceiveCarry {
    /// A complete batch still waiting for the inbound mailbox.
    unpublished: Vec<u8>,
    /// Bytes read before a connection failed. The next read appends to them.
    partial: Vec<u8>,
}

async fn supervise_receive(
    settings: TransportSettings,
    inbound: Mailbox,
    shutdown: watch::Receiver<bool>,
    counters: Arc<TransportCounters>,
) {
    let mut carry = ReceiveCarry::default();
    let mut generation: u64 = 0;

    loop {
        generation += 1;
        let cycle = tokio::spawn(receive_cycle(
            settings.clone(),
            inbound.clone(),
            shutdown.clone(),
            Arc::clone(&counters),
            carry,
        ));

        match cycle.await {
            Ok(CycleEnd::Recycle(left)) => {
                carry = left;
                TransportCounters::bump(&counters.recycles, 1);
                trace!(generation, "Recycling receive loop");
            }
            Ok(CycleEnd::Shutdown) => break,
            Err(e) => {
                warn!(generation, error = %e, "Receive loop task failed, restarting");
                carry = ReceiveCarry::default();
            }
        }
    }

    debug!("Receive loop exited");
}

async fn receive_cycle(
    settings: TransportSettings,
    inbound: Mailbox,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<TransportCounters>,
    mut carry: ReceiveCarry,
) -> CycleEnd<ReceiveCarry> {
    for _ in 0..settings.recycle_after {
        if *shutdown.borrow() {
            return CycleEnd::Shutdown;
        }

        // Nothing new is read until the last batch has been handed over.
        if !carry.unpublished.is_empty() {
            if let Err(batch) = inbound.offer(std::mem::take(&mut carry.unpublished)) {
                carry.unpublished = batch;
                if pause(&mut shutdown, settings.receive_sleep).await {
                    return CycleEnd::Shutdown;
                }
                continue;
            }
        }

        let read = tokio::select! {
            read = read_from_peer(&settings, &mut carry.partial) => read,
            _ = shutdown.changed() => return CycleEnd::Shutdown,
        };

        match read {
            Ok(()) if !carry.partial.is_empty() => {
                let batch = std::mem::take(&mut carry.partial);
                TransportCounters::bump(&counters.batches_received, 1);
                TransportCounters::bump(&counters.bytes_received, batch.len() as u64);
                trace!(bytes = batch.len(), "Received batch from peer");
                if let Err(batch) = inbound.offer(batch) {
                    carry.unpublished = batch;
                }
            }
            Ok(()) => {}
            Err(e) => {
                TransportCounters::bump(&counters.socket_errors, 1);
                log_socket_error("receive", &e);
                if !carry.partial.is_empty() {
                    debug!(bytes = carry.partial.len(), "Keeping bytes read before the failure");
                }
            }
        }

        if pause(&mut shutdown, settings.receive_sleep).await {
            return CycleEnd::Shutdown;
        }
    }

    CycleEnd::Recycle(carry)
}

/// Connects to the peer and appends everything it sends to `batch` until it
/// closes. Only the connect is bounded by `connect_timeout`. Bytes read before
/// a failure stay in `batch`.
async fn read_from_peer(settings: &TransportSettings, batch: &mut Vec<u8>) -> io::Result<()> {
    let connect = TcpStream::connect(settings.receive_addr);
    let mut stream = time::timeout(settings.connect_timeout, connect)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "peer did not accept in time"))??;

    loop {
        if stream.read_buf(batch).await? == 0 {
            return Ok(());
        }
    }
}

async fn supervise_send(
    settings: TransportSettings,
    outbound: Mailbox,
    shutdown: watch::Receiver<bool>,
    counters: Arc<TransportCounters>,
) {
    let mut generation: u64 = 0;

    loop {
        generation += 1;
        let cycle = tokio::spawn(send_cycle(
            settings.clone(),
            outbound.clone(),
            shutdown.clone(),
            Arc::clone(&counters),
        ));

        match cycle.await {
            Ok(CycleEnd::Recycle(())) => {
                TransportCounters::bump(&counters.recycles, 1);
                trace!(generation, "Recycling send loop");
            }
            Ok(CycleEnd::Shutdown) => break,
            Err(e) => warn!(generation, error = %e, "Send loop task failed, restarting"),
        }
    }

    debug!("Send loop exited");
}

async fn send_cycle(
    settings: TransportSettings,
    outbound: Mailbox,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<TransportCounters>,
) -> CycleEnd<()> {
    let mut listener: Option<TcpListener> = None;

    for _ in 0..settings.recycle_after {
        if *shutdown.borrow() {
            return CycleEnd::Shutdown;
        }

        if listener.is_none() {
            match bind_listener(settings.send_addr) {
                Ok(bound) => listener = Some(bound),
                Err(e) => {
                    TransportCounters::bump(&counters.socket_errors, 1);
                    log_socket_error("send", &e);
                    if pause(&mut shutdown, settings.send_sleep).await {
                        return CycleEnd::Shutdown;
                    }
                    continue;
                }
            }
        }

        let Some(active) = listener.as_ref() else {
            continue;
        };

        let accepted = tokio::select! {
            accepted = active.accept() => accepted,
            _ = shutdown.changed() => return CycleEnd::Shutdown,
        };

        let outcome = match accepted {
            Ok((stream, _)) => deliver(stream, &outbound).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(0) => {}
            Ok(sent) => {
                TransportCounters::bump(&counters.batches_sent, 1);
                TransportCounters::bump(&counters.bytes_sent, sent as u64);
                trace!(bytes = sent, "Delivered batch to peer");
            }
            Err(e) => {
                TransportCounters::bump(&counters.socket_errors, 1);
                log_socket_error("send", &e);
                listener = None;
            }
        }

        if pause(&mut shutdown, settings.send_sleep).await {
            return CycleEnd::Shutdown;
        }
    }

    CycleEnd::Recycle(())
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(16)
}

/// Writes the staged batch, if any, and closes the connection. The mailbox is
/// cleared as soon as the whole batch is written.
async fn deliver<S>(mut stream: S, outbound: &Mailbox) -> io::Result<usize>
where
    S: AsyncWrite + Unpin,
{
    let Some(batch) = outbound.peek() else {
        return Ok(0);
    };

    stream.write_all(&batch).await?;
    outbound.clear();
    if let Err(e) = stream.shutdown().await {
        debug!(error = %e, "Peer connection did not close cleanly after delivery");
    }
    Ok(batch.len())
}

/// Sleeps for `period`. Returns true once shutdown is requested.
async fn pause(shutdown: &mut watch::Receiver<bool>, period: Duration) -> bool {
    tokio::select! {
        () = time::sleep(period) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

fn log_socket_error(direction: &'static str, e: &io::Error) {
    match e.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotConnected => {
            debug!(direction, error = %e, "Peer not reachable");
        }
        _ => warn!(direction, error = %e, "Socket error, rebuilding socket"),
    }
}
