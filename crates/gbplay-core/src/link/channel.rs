//! [`LinkChannel`]: a strict one-byte request/response wrapper around a peer's
//! byte stream.
//!
//! # Why one byte at a time? (for beginners)
//!
//! The Game Boy serial port is bit-synchronous: whichever console drives the
//! clock shifts eight bits out while shifting eight bits in.  A transfer is
//! therefore always an *exchange*: every byte sent produces exactly one byte
//! received.  The consoles on the far side of GBPlay run in "external clock"
//! mode, so the server plays the clocking side and every protocol step is
//! expressed as "send this, tell me what came back".
//!
//! Modelling that as a single `async fn exchange_byte(tx) -> rx` lets the game
//! protocols read like ordinary sequential code, with no manual buffer
//! bookkeeping.
//!
//! # Task layout
//!
//! ```text
//!  LinkChannel (shared by handlers)          I/O task (owns the stream)
//!  ────────────────────────────────          ─────────────────────────
//!  exchange_byte(tx)
//!    ├─ wait out pacing interval
//!    ├─ send Outbound{tx, response}  ─────►  drain bytes already readable
//!    │                                       write_all(tx), ack
//!    │                                       arm response slot
//!    └─ await response (timeout)  ◄────────  deliver(next byte) to armed slot
//! ```
//!
//! The I/O task is the only owner of the stream.  It arms the response slot
//! only after the write has gone out, so a byte the peer sent before that
//! point is discarded and can never answer the exchange.  When it exits (peer closed,
//! disconnect requested, write failure, or the channel dropped) both stream
//! halves are dropped, the connection closes, and the one-shot "closed"
//! notification fires.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use super::error::LinkError;

/// Ceiling on how long a peer may take to answer one exchange.
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Spacing between sends applied until a protocol asks for something else.
pub const DEFAULT_PACING: Duration = Duration::from_millis(5);

/// Size of the scratch buffer the I/O task reads into.
const READ_CHUNK: usize = 64;

/// Tunables for a [`LinkChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkSettings {
    /// How long an exchange may wait for the peer's byte before the
    /// connection is force-closed.
    pub exchange_timeout: Duration,
    /// Initial minimum spacing between successive sends.
    pub pacing: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            pacing: DEFAULT_PACING,
        }
    }
}

// ── Shared state between the channel and its I/O task ────────────────────────

/// A byte the channel wants written, where to report the write result, and
/// where the peer's answer goes once the write is out.
struct Outbound {
    byte: u8,
    written: oneshot::Sender<std::io::Result<()>>,
    response: oneshot::Sender<u8>,
}

/// The single outstanding exchange, if any.
#[derive(Default)]
struct ResponseSlot {
    closed: bool,
    waiter: Option<oneshot::Sender<u8>>,
}

struct Shared {
    id: String,
    slot: Mutex<ResponseSlot>,
    shutdown: Notify,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, ResponseSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `waiter` the recipient of the next inbound byte.  Once the
    /// connection is closed the waiter is dropped, failing the exchange.
    fn arm(&self, waiter: oneshot::Sender<u8>) {
        let mut slot = self.slot();
        if !slot.closed {
            slot.waiter = Some(waiter);
        }
    }

    /// Hands an inbound byte to the outstanding exchange, or drops it.
    fn deliver(&self, byte: u8) {
        let waiter = self.slot().waiter.take();
        let delivered = match waiter {
            Some(waiter) => waiter.send(byte).is_ok(),
            None => false,
        };
        if !delivered {
            // The peer is out of step with us; a late or unsolicited byte
            // must never be mistaken for the answer to a future exchange.
            warn!(
                "peer '{}' sent {byte:#04x} with no exchange outstanding; discarding",
                self.id
            );
        }
    }

    /// Marks the connection closed and fails any outstanding exchange.
    /// Returns `true` the first time only.
    fn close(&self) -> bool {
        let mut slot = self.slot();
        let first = !slot.closed;
        slot.closed = true;
        slot.waiter = None;
        first
    }

    fn is_closed(&self) -> bool {
        self.slot().closed
    }
}

// ── LinkChannel ───────────────────────────────────────────────────────────────

/// One peer's end of the emulated link cable.
///
/// Methods take `&self` so a channel can be shared (via `Arc`) between the
/// session that owns it and the per-peer actions it launches.  Exchanges on a
/// single channel are still strictly serialized: a second `exchange_byte`
/// call waits until the first has resolved.
///
/// Creating a channel spawns its I/O task, so it must happen inside a Tokio
/// runtime.
pub struct LinkChannel {
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Outbound>,
    /// Time of the last completed send.  The lock doubles as the
    /// one-outstanding-exchange guard and is held for the whole round trip.
    last_send: tokio::sync::Mutex<Instant>,
    pacing: Mutex<Duration>,
    last_received: AtomicU8,
    exchange_timeout: Duration,
}

impl LinkChannel {
    /// Wraps `stream` and starts the background I/O task.
    ///
    /// `id` identifies the peer in logs and errors; the server uses the
    /// remote `ip:port`.
    pub fn new<S>(stream: S, id: impl Into<String>, settings: LinkSettings) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = id.into();
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            id,
            slot: Mutex::new(ResponseSlot::default()),
            shutdown: Notify::new(),
            closed,
        });

        // Capacity 1: there is never more than one byte in flight.
        let (outbound, outbound_rx) = mpsc::channel(1);
        tokio::spawn(run_io(stream, Arc::clone(&shared), outbound_rx));

        info!("peer '{}' connected", shared.id);

        Self {
            shared,
            outbound,
            last_send: tokio::sync::Mutex::new(Instant::now()),
            pacing: Mutex::new(settings.pacing),
            last_received: AtomicU8::new(0),
            exchange_timeout: settings.exchange_timeout,
        }
    }

    /// Identity of the peer (the remote address for TCP peers).
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The most recent byte received from the peer (0 before any exchange).
    pub fn last_received(&self) -> u8 {
        self.last_received.load(Ordering::Acquire)
    }

    /// Current minimum spacing between sends.
    pub fn pacing(&self) -> Duration {
        *self.pacing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the minimum spacing between successive sends.
    ///
    /// Emulates the transfer latency real hardware imposes; menus need a
    /// slower rate than bulk data.  Takes effect from the next exchange.
    pub fn set_pacing(&self, pacing: Duration) {
        *self.pacing.lock().unwrap_or_else(PoisonError::into_inner) = pacing;
    }

    /// Returns `true` once the connection has closed for any reason.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Sends `tx` and returns the byte the peer answers with.
    ///
    /// Waits out whatever is left of the pacing interval first.  A byte that
    /// arrived before this call sent anything is discarded, never returned.
    ///
    /// # Errors
    ///
    /// - [`LinkError::Timeout`] if no answer arrives within the exchange
    ///   ceiling; the connection is closed before returning.
    /// - [`LinkError::PeerClosed`] if the connection closes first.
    /// - [`LinkError::TransportWrite`] if the transport rejects the write.
    pub async fn exchange_byte(&self, tx: u8) -> Result<u8, LinkError> {
        let mut last_send = self.last_send.lock().await;

        time::sleep_until(*last_send + self.pacing()).await;

        let rx = match time::timeout(self.exchange_timeout, self.round_trip(tx, &mut last_send))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "peer '{}' did not respond within {} ms; disconnecting",
                    self.id(),
                    self.exchange_timeout.as_millis()
                );
                self.disconnect();
                return Err(LinkError::Timeout {
                    peer: self.id().to_string(),
                    timeout: self.exchange_timeout,
                });
            }
        };

        self.last_received.store(rx, Ordering::Release);
        trace!("peer '{}': {tx:#04x} -> {rx:#04x}", self.id());
        Ok(rx)
    }

    async fn round_trip(&self, tx: u8, last_send: &mut Instant) -> Result<u8, LinkError> {
        if self.is_closed() {
            return Err(self.peer_closed());
        }

        let (written_tx, written_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        let request = Outbound {
            byte: tx,
            written: written_tx,
            response: response_tx,
        };
        if self.outbound.send(request).await.is_err() {
            return Err(self.peer_closed());
        }

        match written_rx.await {
            Ok(Ok(())) => *last_send = Instant::now(),
            Ok(Err(source)) => {
                return Err(LinkError::TransportWrite {
                    peer: self.id().to_string(),
                    source,
                });
            }
            Err(_) => return Err(self.peer_closed()),
        }

        response_rx.await.map_err(|_| self.peer_closed())
    }

    /// Polls the peer with `poll` until it answers `expected`.
    ///
    /// There is no iteration limit; each individual exchange can still time
    /// out and abort the wait.
    pub async fn wait_for_byte(&self, poll: u8, expected: u8) -> Result<(), LinkError> {
        while self.exchange_byte(poll).await? != expected {}
        Ok(())
    }

    /// Exchanges every byte of `bytes` in order and returns the final answer
    /// (0 if `bytes` is empty).
    pub async fn send_sequence(&self, bytes: &[u8]) -> Result<u8, LinkError> {
        let mut rx = 0;
        for &byte in bytes {
            rx = self.exchange_byte(byte).await?;
        }
        Ok(rx)
    }

    /// Emulates one tick of a direct cable between this peer and `other`.
    pub async fn forward(&self, other: &LinkChannel) -> Result<(), LinkError> {
        self.forward_with(other, |_, _| {}).await
    }

    /// Like [`forward`](Self::forward), but calls `on_transfer(ours, theirs)`
    /// between the two halves so the caller can inspect the traffic.
    ///
    /// `ours` is this peer's latest byte (what `other` was just sent) and
    /// `theirs` is `other`'s answer (what this peer is about to be sent).
    pub async fn forward_with<F>(&self, other: &LinkChannel, on_transfer: F) -> Result<(), LinkError>
    where
        F: FnOnce(u8, u8),
    {
        let ours = self.last_received();
        let theirs = other.exchange_byte(ours).await?;
        on_transfer(ours, theirs);
        self.exchange_byte(theirs).await?;
        Ok(())
    }

    /// Closes the connection.  Any outstanding exchange fails with
    /// [`LinkError::PeerClosed`].  Calling this more than once has no
    /// further effect.
    pub fn disconnect(&self) {
        if self.shared.close() {
            debug!("disconnecting peer '{}'", self.id());
        }
        self.shared.shutdown.notify_one();
    }

    /// Resolves once the connection has closed, whatever the cause.
    ///
    /// The returned future does not borrow the channel, so it can be moved
    /// into a listener task.  It resolves immediately if the connection is
    /// already gone.
    pub fn closed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut closed = self.shared.closed.subscribe();
        async move {
            loop {
                if *closed.borrow_and_update() {
                    return;
                }
                if closed.changed().await.is_err() {
                    return;
                }
            }
        }
    }

    fn peer_closed(&self) -> LinkError {
        LinkError::PeerClosed {
            peer: self.id().to_string(),
        }
    }
}

impl std::fmt::Debug for LinkChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkChannel")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .field("last_received", &self.last_received())
            .finish()
    }
}

// ── I/O task ──────────────────────────────────────────────────────────────────

/// Owns the stream for the lifetime of the connection.
///
/// Exits when the peer closes, a read or write fails, a disconnect is
/// requested, or the owning [`LinkChannel`] is dropped.  On exit the stream is
/// dropped (closing the connection) and the closed notification fires exactly
/// once.
async fn run_io<S>(stream: S, shared: Arc<Shared>, mut outbound: mpsc::Receiver<Outbound>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = [0u8; READ_CHUNK];

    loop {
        // Reads are polled before writes, so anything the peer has already
        // sent is drained (and discarded) before the next byte goes out.
        tokio::select! {
            biased;

            _ = shared.shutdown.notified() => {
                debug!("peer '{}': disconnect requested", shared.id);
                break;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    debug!("peer '{}': connection closed by peer", shared.id);
                    break;
                }
                Ok(n) => {
                    for &byte in &buf[..n] {
                        shared.deliver(byte);
                    }
                }
                Err(e) => {
                    warn!("peer '{}': read failed: {e}", shared.id);
                    break;
                }
            },
            request = outbound.recv() => match request {
                Some(Outbound { byte, written, response }) => {
                    let result = match writer.write_all(&[byte]).await {
                        Ok(()) => writer.flush().await,
                        Err(e) => Err(e),
                    };
                    let failed = result.is_err();
                    if !failed {
                        shared.arm(response);
                    }
                    // The requester may have timed out already; nothing to do then.
                    let _ = written.send(result);
                    if failed {
                        break;
                    }
                }
                None => {
                    debug!("peer '{}': channel dropped", shared.id);
                    break;
                }
            },
        }
    }

    drop(reader);
    drop(writer);
    shared.close();
    shared.closed.send_replace(true);
    info!("peer '{}' disconnected", shared.id);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
