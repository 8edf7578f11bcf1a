//! Inbound connection handling for [`SourceEndpoint`](super::SourceEndpoint).

use std::{net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use log::{debug, error, warn};
use tokio::{net::TcpStream, select};
use tokio_util::{codec::FramedRead, sync::CancellationToken};

use super::SourceContext;
use crate::{
    error::{ReassemblyError, SourceError},
    hooks::{InboundConnection, panic_message},
    hub::Router,
    metrics,
    payload::RecordCodec,
    reassembly::{FrameReassembler, ReassemblyEvent},
};

/// Spawn a task reading frames from one accepted connection, logging and
/// discarding any panics.
pub(super) fn spawn_connection<C: RecordCodec>(
    stream: TcpStream,
    source: usize,
    peer: SocketAddr,
    ctx: &SourceContext<C>,
) {
    let router = Arc::clone(&ctx.router);
    let shutdown = ctx.shutdown.clone();
    let reassembler = FrameReassembler::new(ctx.max_buffered_bytes);
    let registration = router.registry().register(source, peer);
    let conn = InboundConnection {
        id: registration.id(),
        source,
        peer,
    };

    ctx.tracker.spawn(async move {
        metrics::inc_inbound_connections();
        let fut = AssertUnwindSafe(process_stream(
            stream,
            conn,
            reassembler,
            &router,
            &shutdown,
        ))
        .catch_unwind();

        if let Err(panic) = fut.await {
            let panic_msg = panic_message(panic.as_ref());
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer}");
            tracing::error!(panic = %panic_msg, %peer, "connection task panicked");
        }
        metrics::dec_inbound_connections();
        drop(registration);
    });
}

async fn process_stream<C: RecordCodec>(
    stream: TcpStream,
    conn: InboundConnection,
    reassembler: FrameReassembler,
    router: &Router<C>,
    shutdown: &CancellationToken,
) {
    debug!("inbound connection opened: peer_addr={}, source={}", conn.peer, conn.source);
    router.hooks().inbound_open(&conn);

    let mut frames = FramedRead::new(stream, reassembler);
    let fatal = loop {
        let next = select! {
            biased;
            () = shutdown.cancelled() => break None,
            next = frames.next() => next,
        };
        match next {
            None => break None,
            Some(Ok(ReassemblyEvent::Frame(payload))) => receive_payload(router, &conn, payload),
            Some(Ok(ReassemblyEvent::Framing(err))) => {
                report(router, &conn, &SourceError::Framing(err));
            }
            Some(Err(err)) => break Some(err),
        }
    };

    log_close(&conn, fatal.as_ref());
    router.hooks().inbound_close(&conn, fatal.as_ref());
}

fn receive_payload<C: RecordCodec>(router: &Router<C>, conn: &InboundConnection, payload: Bytes) {
    match router.codec().decode(&payload) {
        Ok(record) => router.handle_source_record(record),
        Err(error) => report(router, conn, &SourceError::Decode { error, payload }),
    }
}

fn report<C: RecordCodec>(router: &Router<C>, conn: &InboundConnection, error: &SourceError) {
    let kind = match error {
        SourceError::Framing(_) => metrics::SourceErrorKind::Framing,
        SourceError::Decode { .. } => metrics::SourceErrorKind::Decode,
    };
    metrics::inc_source_errors(kind);
    tracing::warn!(peer = %conn.peer, source = conn.source, %error, "inbound frame rejected");
    router.hooks().source_error(conn, error);
}

fn log_close(conn: &InboundConnection, fatal: Option<&ReassemblyError>) {
    match fatal {
        Some(e) => warn!(
            "inbound connection closed on error: peer_addr={}, source={}, error={e}",
            conn.peer, conn.source
        ),
        None => debug!(
            "inbound connection closed: peer_addr={}, source={}",
            conn.peer, conn.source
        ),
    }
}
