//! Outbound endpoints with indefinite reconnection.
//!
//! Each [`TargetEndpoint`] is a fixed slot in the hub's target table. Its
//! index never changes; the connection behind it is replaced on every
//! reconnect. One task owns the socket and walks the state machine
//!
//! ```text
//! Connecting --connect ok--> Connected --close/error--> AwaitingRetry
//!     ^                                                      |
//!     +-------------------- retry delay elapsed -------------+
//! ```
//!
//! A failed connect goes straight to `AwaitingRetry`. There is no terminal
//! state short of hub shutdown; a panicking hook ends only the current
//! connection. While connected, the slot holds a bounded channel into the
//! owning task, so [`TargetEndpoint::write`] never blocks and knows at once
//! whether the record was queued or dropped. A peer that stops reading fills
//! the queue and further records are dropped rather than buffered.

use std::{
    io,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use futures::FutureExt;
use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpStream, tcp::OwnedWriteHalf},
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    config::EndpointAddress,
    hooks::{ForwardReport, RelayHooks, panic_message},
    metrics,
};

/// Connection state of a target slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetState {
    /// A connect attempt is in flight.
    Connecting,
    /// The slot holds a live connection to the given peer.
    Connected(SocketAddr),
    /// The slot is empty until the retry delay elapses.
    AwaitingRetry,
}

/// Per-target result of a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum WriteOutcome {
    /// The frame was queued on the live connection.
    Queued,
    /// The target was disconnected; nothing was written.
    Dropped,
}

struct Outbound<R> {
    frame: Bytes,
    record: Arc<R>,
}

/// Why a connection ended.
enum Disconnect {
    Shutdown,
    Closed(Option<io::Error>),
}

/// How one connect attempt ended.
enum Cycle {
    Shutdown,
    Retry,
}

/// One outbound slot.
pub struct TargetEndpoint<R> {
    index: usize,
    address: EndpointAddress,
    queue_capacity: usize,
    slot: Mutex<Option<mpsc::Sender<Outbound<R>>>>,
    state: watch::Sender<TargetState>,
    hooks: RelayHooks<R>,
}

impl<R> std::fmt::Debug for TargetEndpoint<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetEndpoint")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<R: Send + Sync + 'static> TargetEndpoint<R> {
    pub(crate) fn new(
        index: usize,
        address: EndpointAddress,
        queue_capacity: usize,
        hooks: RelayHooks<R>,
    ) -> Self {
        Self {
            index,
            address,
            queue_capacity: queue_capacity.max(1),
            slot: Mutex::new(None),
            state: watch::Sender::new(TargetState::Connecting),
            hooks,
        }
    }

    /// Stable index of this target.
    #[must_use]
    pub fn index(&self) -> usize { self.index }

    /// Configured address of this target.
    #[must_use]
    pub fn address(&self) -> &EndpointAddress { &self.address }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> TargetState { *self.state.borrow() }

    /// Wait until the target is connected and return the peer address.
    pub async fn wait_connected(&self) -> SocketAddr {
        let mut rx = self.state.subscribe();
        loop {
            if let TargetState::Connected(peer) = *rx.borrow_and_update() {
                return peer;
            }
            // The sender lives in `self`, so the channel cannot close here.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Wait until the target leaves the connected state.
    pub async fn wait_disconnected(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|state| !matches!(state, TargetState::Connected(_)))
            .await;
    }

    /// Queue `frame` on the live connection, or report a drop.
    ///
    /// The frame bytes are shared, not copied, between targets. A record is
    /// dropped when the target is disconnected or its queue is full. A write
    /// failure surfaces later through the forward hook with `record`.
    pub fn write(&self, frame: Bytes, record: &Arc<R>) -> WriteOutcome {
        let sent = self.lock_slot().as_ref().map(|tx| {
            tx.try_send(Outbound {
                frame,
                record: Arc::clone(record),
            })
        });
        match sent {
            Some(Ok(())) => {
                metrics::inc_records_relayed(metrics::Outcome::Queued);
                return WriteOutcome::Queued;
            }
            Some(Err(TrySendError::Full(_))) => debug!(
                "record dropped, target queue full: index={}, address={}, capacity={}",
                self.index, self.address, self.queue_capacity
            ),
            Some(Err(TrySendError::Closed(_))) | None => debug!(
                "record dropped, target disconnected: index={}, address={}",
                self.index, self.address
            ),
        }
        metrics::inc_records_relayed(metrics::Outcome::Dropped);
        self.hooks.dropped(self.index, &self.address, record);
        WriteOutcome::Dropped
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<mpsc::Sender<Outbound<R>>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Own the connection until it fails or shutdown is requested.
    async fn drive(&self, stream: TcpStream, shutdown: &CancellationToken) -> Disconnect {
        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(e) => return Disconnect::Closed(Some(e)),
        };
        let (mut reader, mut writer) = stream.into_split();
        let (tx, mut rx) = mpsc::channel(self.queue_capacity);
        *self.lock_slot() = Some(tx);
        self.state.send_replace(TargetState::Connected(peer));
        metrics::inc_targets_connected();
        info!("target connected: index={}, peer_addr={peer}", self.index);
        self.hooks.target_ready(self.index, peer);

        // Targets are not expected to send; inbound bytes are discarded and
        // the read half only detects closure.
        let mut scratch = [0u8; 512];
        let outcome = loop {
            select! {
                biased;
                () = shutdown.cancelled() => break Disconnect::Shutdown,
                next = rx.recv() => {
                    let Some(outbound) = next else { break Disconnect::Shutdown };
                    if let Err(e) = self.forward(&mut writer, &outbound).await {
                        break Disconnect::Closed(Some(e));
                    }
                }
                read = reader.read(&mut scratch) => match read {
                    Ok(0) => break Disconnect::Closed(None),
                    Ok(_) => {}
                    Err(e) => break Disconnect::Closed(Some(e)),
                },
            }
        };

        *self.lock_slot() = None;
        metrics::dec_targets_connected();
        rx.close();
        let abandoned = io::Error::new(io::ErrorKind::NotConnected, "target connection closed");
        while let Ok(outbound) = rx.try_recv() {
            self.report_forward(&outbound.record, Err(&abandoned));
        }
        outcome
    }

    async fn forward(&self, writer: &mut OwnedWriteHalf, outbound: &Outbound<R>) -> io::Result<()> {
        match writer.write_all(&outbound.frame).await {
            Ok(()) => {
                self.report_forward(&outbound.record, Ok(()));
                Ok(())
            }
            Err(e) => {
                self.report_forward(&outbound.record, Err(&e));
                Err(e)
            }
        }
    }

    fn report_forward(&self, record: &R, result: Result<(), &io::Error>) {
        if let Err(e) = result {
            metrics::inc_forward_errors();
            warn!("forward to target failed: index={}, address={}, error={e}", self.index, self.address);
        }
        self.hooks.forward(&ForwardReport {
            target: self.index,
            address: &self.address,
            record,
            result,
        });
    }

    /// Connect once and own the connection until it ends.
    async fn connect_once(&self, retry_delay: Duration, shutdown: &CancellationToken) -> Cycle {
        let address = &self.address;
        self.state.send_replace(TargetState::Connecting);
        let connected = select! {
            biased;
            () = shutdown.cancelled() => return Cycle::Shutdown,
            connected = TcpStream::connect((address.host.as_str(), address.port)) => connected,
        };
        let closed = match connected {
            Ok(stream) => match self.drive(stream, shutdown).await {
                Disconnect::Shutdown => return Cycle::Shutdown,
                Disconnect::Closed(error) => error,
            },
            Err(e) => Some(e),
        };

        self.state.send_replace(TargetState::AwaitingRetry);
        match &closed {
            Some(e) => warn!(
                "target connection closed: index={}, address={address}, error={e}, retry_in={retry_delay:?}",
                self.index
            ),
            None => info!(
                "target connection closed by peer: index={}, address={address}, retry_in={retry_delay:?}",
                self.index
            ),
        }
        self.hooks.target_closed(self.index, address, closed.as_ref());
        Cycle::Retry
    }

    /// Restore the disconnected state after a hook panicked mid-cycle.
    ///
    /// The connection and any frames still queued on it are gone with the
    /// unwound future.
    fn recover_from_panic(&self, panic_msg: &str, retry_delay: Duration) {
        *self.lock_slot() = None;
        let previous = self.state.send_replace(TargetState::AwaitingRetry);
        if matches!(previous, TargetState::Connected(_)) {
            metrics::dec_targets_connected();
        }
        error!(
            "target task panicked: index={}, address={}, panic={panic_msg}, retry_in={retry_delay:?}",
            self.index, self.address
        );
        tracing::error!(panic = %panic_msg, target = self.index, "target task panicked");
    }
}

/// Spawn the task owning `endpoint`'s connection.
pub(crate) fn spawn_target<R: Send + Sync + 'static>(
    endpoint: Arc<TargetEndpoint<R>>,
    retry_delay: Duration,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) {
    tracker.spawn(run_target(endpoint, retry_delay, shutdown));
}

async fn run_target<R: Send + Sync + 'static>(
    endpoint: Arc<TargetEndpoint<R>>,
    retry_delay: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let cycle = AssertUnwindSafe(endpoint.connect_once(retry_delay, &shutdown))
            .catch_unwind()
            .await;
        match cycle {
            Ok(Cycle::Shutdown) => break,
            Ok(Cycle::Retry) => {}
            Err(panic) => endpoint.recover_from_panic(panic_message(panic.as_ref()), retry_delay),
        }

        select! {
            biased;
            () = shutdown.cancelled() => break,
            () = sleep(retry_delay) => {}
        }
    }
    endpoint.state.send_replace(TargetState::AwaitingRetry);
}
