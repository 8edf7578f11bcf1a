//! A downstream server that reassembles frames and queues their payloads.

use std::{io, net::SocketAddr, time::Duration};

use bytes::Bytes;
use futures::StreamExt;
use raddec_relay::{
    config::EndpointAddress,
    reassembly::{DEFAULT_MAX_BUFFERED_BYTES, FrameReassembler, ReassemblyEvent},
};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinSet,
    time::timeout,
};
use tokio_util::codec::FramedRead;

/// How long [`CollectingTarget::recv`] waits before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Listens on a loopback port and collects every payload it receives.
///
/// Dropping the collector, or calling [`restart`](Self::restart), closes the
/// listener and every accepted connection.
pub struct CollectingTarget {
    addr: SocketAddr,
    rx: mpsc::UnboundedReceiver<Bytes>,
    tasks: JoinSet<()>,
}

impl CollectingTarget {
    /// Bind on an OS-assigned loopback port.
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn bind() -> io::Result<Self> { Self::bind_to(SocketAddr::from(([127, 0, 0, 1], 0))).await }

    /// Bind on `addr`.
    ///
    /// # Errors
    ///
    /// Returns the bind error.
    pub async fn bind_to(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        tasks.spawn(accept(listener, tx));
        Ok(Self { addr, rx, tasks })
    }

    /// Bound address.
    #[must_use]
    pub fn addr(&self) -> SocketAddr { self.addr }

    /// Address to configure a relay target with.
    #[must_use]
    pub fn endpoint(&self) -> EndpointAddress {
        EndpointAddress::new(self.addr.ip().to_string(), self.addr.port())
    }

    /// Next payload, or `None` after [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Option<Bytes> {
        timeout(RECV_TIMEOUT, self.rx.recv()).await.ok().flatten()
    }

    /// Next payload if one arrives within `wait`.
    pub async fn try_recv_within(&mut self, wait: Duration) -> Option<Bytes> {
        timeout(wait, self.rx.recv()).await.ok().flatten()
    }

    /// Close the listener and all connections.
    pub async fn close(mut self) -> SocketAddr {
        self.tasks.shutdown().await;
        self.addr
    }

    /// Close everything, then listen again on the same port.
    ///
    /// # Errors
    ///
    /// Returns the rebind error.
    pub async fn restart(self) -> io::Result<Self> {
        let addr = self.close().await;
        Self::bind_to(addr).await
    }
}

async fn accept(listener: TcpListener, tx: mpsc::UnboundedSender<Bytes>) {
    let mut connections = JoinSet::new();
    while let Ok((stream, _)) = listener.accept().await {
        connections.spawn(collect(stream, tx.clone()));
    }
}

async fn collect(stream: TcpStream, tx: mpsc::UnboundedSender<Bytes>) {
    let mut frames = FramedRead::new(stream, FrameReassembler::new(DEFAULT_MAX_BUFFERED_BYTES));
    while let Some(Ok(event)) = frames.next().await {
        if let ReassemblyEvent::Frame(payload) = event
            && tx.send(payload).is_err()
        {
            break;
        }
    }
}
