//! Listening endpoints feeding records into the hub.
//!
//! Each [`SourceEndpoint`] is supervised by one task that binds the listener,
//! accepts connections, and rebinds whenever the listener is lost. A failed
//! accept only costs that one connection: the listener is kept and the loop
//! backs off before accepting again. Every
//! accepted connection runs on its own task with its own
//! [`FrameReassembler`](crate::reassembly::FrameReassembler); connections
//! share no mutable state.

mod backoff;
mod connection;

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
pub use backoff::BackoffConfig;
use log::{info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::watch,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{config::EndpointAddress, hub::Router, payload::RecordCodec};

/// One configured listening endpoint.
#[derive(Debug)]
pub struct SourceEndpoint {
    index: usize,
    address: EndpointAddress,
    local: watch::Sender<Option<SocketAddr>>,
}

impl SourceEndpoint {
    pub(crate) fn new(index: usize, address: EndpointAddress) -> Self {
        Self {
            index,
            address,
            local: watch::Sender::new(None),
        }
    }

    /// Position of this source in the configuration.
    #[must_use]
    pub fn index(&self) -> usize { self.index }

    /// Configured listening address.
    #[must_use]
    pub fn address(&self) -> &EndpointAddress { &self.address }

    /// Address the listener is currently bound to, if any.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> { *self.local.borrow() }

    /// Wait until the listener is bound and return its address.
    ///
    /// Useful when the configured port is `0`. Resolves immediately if the
    /// listener is already bound.
    pub async fn wait_listening(&self) -> SocketAddr {
        let mut rx = self.local.subscribe();
        loop {
            if let Some(addr) = *rx.borrow_and_update() {
                return addr;
            }
            // The sender lives in `self`, so the channel cannot close here.
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Source of inbound connections driven by the accept loop.
///
/// `accept` must be cancellation-safe.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub(crate) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Shared state handed to a source supervisor and its connections.
pub(crate) struct SourceContext<C: RecordCodec> {
    pub(crate) router: Arc<Router<C>>,
    pub(crate) max_buffered_bytes: usize,
    pub(crate) backoff: BackoffConfig,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

/// Spawn the supervisor task for `endpoint`.
pub(crate) fn spawn_source<C: RecordCodec>(endpoint: Arc<SourceEndpoint>, ctx: SourceContext<C>) {
    let tracker = ctx.tracker.clone();
    tracker.spawn(run_source(endpoint, ctx));
}

/// Bind, accept, and rebind until shutdown.
async fn run_source<C: RecordCodec>(endpoint: Arc<SourceEndpoint>, ctx: SourceContext<C>) {
    let backoff = ctx.backoff.normalized();
    let mut delay = backoff.initial_delay;
    let address = &endpoint.address;
    let hooks = ctx.router.hooks();

    loop {
        let bound = select! {
            biased;
            () = ctx.shutdown.cancelled() => break,
            bound = bind(address) => bound,
        };
        let (listener, local) = match bound {
            Ok(bound) => bound,
            Err(e) => {
                warn!("source listener bind failed: address={address}, error={e}, retry_in={delay:?}");
                hooks.listener_error(address, &e);
                if !pause(&ctx, delay).await {
                    break;
                }
                delay = backoff.next_delay(delay);
                continue;
            }
        };
        delay = backoff.initial_delay;

        endpoint.local.send_replace(Some(local));
        info!("source listening: address={address}, local_addr={local}");
        hooks.listening(address, local);

        let lost = accept_loop(&endpoint, &listener, &ctx).await;
        endpoint.local.send_replace(None);
        drop(listener);
        match lost {
            Some(e) => warn!("source listener unusable, rebinding: address={address}, error={e}"),
            None => break,
        }
    }
    endpoint.local.send_replace(None);
}

async fn bind(address: &EndpointAddress) -> io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind((address.host.as_str(), address.port)).await?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}

/// Sleep for `delay` unless shutdown comes first; `false` on shutdown.
async fn pause<C: RecordCodec>(ctx: &SourceContext<C>, delay: Duration) -> bool {
    select! {
        biased;
        () = ctx.shutdown.cancelled() => false,
        () = sleep(delay) => true,
    }
}

/// Accept until shutdown (`None`) or until the listener itself fails
/// (`Some`).
///
/// An accept error with the listener still bound is per-connection, for
/// example an aborted handshake or descriptor exhaustion. The listener and
/// its backlog are kept and the next accept waits out a back-off.
async fn accept_loop<C: RecordCodec, L: AcceptListener>(
    endpoint: &SourceEndpoint,
    listener: &L,
    ctx: &SourceContext<C>,
) -> Option<io::Error> {
    let backoff = ctx.backoff.normalized();
    let mut delay = backoff.initial_delay;
    let address = &endpoint.address;
    loop {
        let accepted = select! {
            biased;
            () = ctx.shutdown.cancelled() => return None,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                connection::spawn_connection(stream, endpoint.index, peer, ctx);
                delay = backoff.initial_delay;
            }
            Err(e) => {
                ctx.router.hooks().listener_error(address, &e);
                if let Err(lost) = listener.local_addr() {
                    return Some(lost);
                }
                warn!("source accept failed: address={address}, error={e}, retry_in={delay:?}");
                if !pause(ctx, delay).await {
                    return None;
                }
                delay = backoff.next_delay(delay);
            }
        }
    }
}
