//! End-to-end relay behaviour over loopback sockets.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use raddec_relay::{
    FramingError,
    ReassemblyError,
    RelayBuilder,
    RelayConfig,
    SourceError,
    TargetState,
    TargetWrite,
    WriteOutcome,
    config::EndpointConfig,
    error::BoxError,
    hooks::ForwardReport,
    payload::{EncodingOptions, RawCodec, RecordCodec},
};
use raddec_relay_testing::{
    CollectingTarget,
    corrupt_close_marker,
    frame_bytes,
    loopback,
    send_frames,
};
use rstest::rstest;
use tokio::{sync::mpsc, time::timeout};

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

async fn within<F: Future>(fut: F) -> F::Output {
    timeout(WAIT, fut).await.expect("timed out")
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    within(async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}

#[tokio::test]
async fn inbound_frames_reach_every_target() {
    let mut first = CollectingTarget::bind().await.expect("bind");
    let mut second = CollectingTarget::bind().await.expect("bind");
    let hub = RelayBuilder::new(RawCodec)
        .source(loopback(0))
        .target(first.endpoint())
        .target(second.endpoint())
        .start();

    let source = within(hub.source(0).expect("source").wait_listening()).await;
    within(hub.target(0).expect("target").wait_connected()).await;
    within(hub.target(1).expect("target").wait_connected()).await;

    send_frames(source, &[frame_bytes(b"hello"), frame_bytes(b"")])
        .await
        .expect("send");

    for target in [&mut first, &mut second] {
        assert_eq!(target.recv().await.as_deref(), Some(&b"hello"[..]));
        assert_eq!(target.recv().await.as_deref(), Some(&b""[..]));
    }
    hub.shutdown().await;
}

#[tokio::test]
async fn split_writes_are_reassembled_before_relaying() {
    let mut collector = CollectingTarget::bind().await.expect("bind");
    let hub = RelayBuilder::new(RawCodec)
        .source(loopback(0))
        .target(collector.endpoint())
        .start();
    let source = within(hub.source(0).expect("source").wait_listening()).await;
    within(hub.target(0).expect("target").wait_connected()).await;

    let frame = frame_bytes(b"fragmented payload");
    let chunks: Vec<Vec<u8>> = frame.chunks(3).map(<[u8]>::to_vec).collect();
    send_frames(source, &chunks).await.expect("send");

    assert_eq!(
        collector.recv().await.as_deref(),
        Some(&b"fragmented payload"[..])
    );
    hub.shutdown().await;
}

#[rstest]
#[case(&[1], &[1])]
#[case(&[1, 7, 0], &[1, 0])]
#[case(&[9], &[])]
#[tokio::test]
async fn explicit_indices_select_targets(#[case] indices: &[usize], #[case] expected: &[usize]) {
    let mut collectors = vec![
        CollectingTarget::bind().await.expect("bind"),
        CollectingTarget::bind().await.expect("bind"),
    ];
    let hub = RelayBuilder::new(RawCodec)
        .target(collectors[0].endpoint())
        .target(collectors[1].endpoint())
        .start();
    within(hub.target(0).expect("target").wait_connected()).await;
    within(hub.target(1).expect("target").wait_connected()).await;

    let writes = hub
        .relay(Bytes::from_static(b"addressed"), Some(indices))
        .expect("relay");
    let written: Vec<usize> = writes.iter().map(|w| w.target).collect();
    assert_eq!(written, expected);
    assert!(writes.iter().all(|w| w.outcome == WriteOutcome::Queued));

    for (index, collector) in collectors.iter_mut().enumerate() {
        let received = collector.try_recv_within(QUIET).await;
        if expected.contains(&index) {
            assert_eq!(received.as_deref(), Some(&b"addressed"[..]));
        } else {
            assert_eq!(received, None);
        }
    }
    hub.shutdown().await;
}

#[tokio::test]
async fn disconnected_target_drops_without_affecting_others() {
    let dead = CollectingTarget::bind().await.expect("bind").close().await;
    let mut live = CollectingTarget::bind().await.expect("bind");
    let dropped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&dropped);

    let hub = RelayBuilder::new(RawCodec)
        .target(loopback(dead.port()))
        .target(live.endpoint())
        .retry_delay(Duration::from_secs(60))
        .on_dropped(move |index, _, record: &Bytes| {
            assert_eq!(index, 0);
            assert_eq!(record.as_ref(), b"partial");
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .start();
    within(hub.target(1).expect("target").wait_connected()).await;
    eventually(|| hub.target(0).expect("target").state() == TargetState::AwaitingRetry).await;

    let writes = hub
        .relay(Bytes::from_static(b"partial"), None)
        .expect("relay");
    assert_eq!(writes, [
        TargetWrite {
            target: 0,
            outcome: WriteOutcome::Dropped,
        },
        TargetWrite {
            target: 1,
            outcome: WriteOutcome::Queued,
        },
    ]);
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
    assert_eq!(live.recv().await.as_deref(), Some(&b"partial"[..]));
    hub.shutdown().await;
}

#[tokio::test]
async fn target_reconnects_at_the_same_index() {
    let collector = CollectingTarget::bind().await.expect("bind");
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
    let hub = RelayBuilder::new(RawCodec)
        .target(collector.endpoint())
        .retry_delay(Duration::from_millis(200))
        .on_target_closed(move |index, _, _| {
            let _ = closed_tx.send(index);
        })
        .start();
    let target = hub.target(0).expect("target");
    within(target.wait_connected()).await;

    let mut collector = collector.restart().await.expect("rebind");
    assert_eq!(within(closed_rx.recv()).await, Some(0));
    within(target.wait_connected()).await;

    let writes = hub.relay(Bytes::from_static(b"again"), None).expect("relay");
    assert_eq!(writes[0].outcome, WriteOutcome::Queued);
    assert_eq!(collector.recv().await.as_deref(), Some(&b"again"[..]));
    assert_eq!(hub.target_count(), 1);
    hub.shutdown().await;
}

#[tokio::test]
async fn two_sources_feed_one_target() {
    let mut collector = CollectingTarget::bind().await.expect("bind");
    let hub = RelayBuilder::new(RawCodec)
        .source(loopback(0))
        .source(loopback(0))
        .target(collector.endpoint())
        .start();
    let first = within(hub.source(0).expect("source").wait_listening()).await;
    let second = within(hub.source(1).expect("source").wait_listening()).await;
    within(hub.target(0).expect("target").wait_connected()).await;

    send_frames(first, &[frame_bytes(b"one")]).await.expect("send");
    send_frames(second, &[frame_bytes(b"two")]).await.expect("send");

    let mut received = vec![
        collector.recv().await.expect("first record"),
        collector.recv().await.expect("second record"),
    ];
    received.sort();
    assert_eq!(received, [Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
    hub.shutdown().await;
}

#[tokio::test]
async fn corrupted_close_marker_is_reported_and_stream_recovers() {
    let mut collector = CollectingTarget::bind().await.expect("bind");
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    let hub = RelayBuilder::new(RawCodec)
        .source(loopback(0))
        .target(collector.endpoint())
        .on_source_error(move |_, error| {
            if let SourceError::Framing(e) = error {
                let _ = err_tx.send(e.clone());
            }
        })
        .start();
    let source = within(hub.source(0).expect("source").wait_listening()).await;
    within(hub.target(0).expect("target").wait_connected()).await;

    send_frames(source, &[corrupt_close_marker(b"bad"), frame_bytes(b"good")])
        .await
        .expect("send");

    assert_eq!(collector.recv().await.as_deref(), Some(&b"good"[..]));
    assert_eq!(
        within(err_rx.recv()).await,
        Some(FramingError::MissingCloseMarker)
    );
    hub.shutdown().await;
}

#[tokio::test]
async fn local_handler_runs_with_forwarding_disabled() {
    let mut collector = CollectingTarget::bind().await.expect("bind");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let hub = RelayBuilder::new(RawCodec)
        .source(loopback(0))
        .target(collector.endpoint())
        .enable_forwarding(false)
        .on_record(move |record: &Bytes| {
            let _ = tx.send(record.clone());
        })
        .start();
    let source = within(hub.source(0).expect("source").wait_listening()).await;
    within(hub.target(0).expect("target").wait_connected()).await;

    send_frames(source, &[frame_bytes(b"local only")])
        .await
        .expect("send");

    assert_eq!(
        within(rx.recv()).await.as_deref(),
        Some(&b"local only"[..])
    );
    assert_eq!(collector.try_recv_within(QUIET).await, None);
    hub.shutdown().await;
}

#[tokio::test]
async fn inbound_connections_are_tracked_while_open() {
    let hub = RelayBuilder::new(RawCodec).source(loopback(0)).start();
    let source = within(hub.source(0).expect("source").wait_listening()).await;

    let stream = tokio::net::TcpStream::connect(source)
        .await
        .expect("connect");
    let local = stream.local_addr().expect("local addr");
    eventually(|| hub.inbound_connections().len() == 1).await;
    let (_, entry) = hub.inbound_connections().remove(0);
    assert_eq!(entry.source, 0);
    assert_eq!(entry.peer, local);

    drop(stream);
    eventually(|| hub.inbound_connections().is_empty()).await;
    hub.shutdown().await;
}

#[tokio::test]
async fn shutdown_releases_every_endpoint() {
    let collector = CollectingTarget::bind().await.expect("bind");
    let hub = RelayBuilder::new(RawCodec)
        .source(loopback(0))
        .target(collector.endpoint())
        .start();
    within(hub.source(0).expect("source").wait_listening()).await;
    within(hub.target(0).expect("target").wait_connected()).await;

    within(hub.shutdown()).await;

    assert_eq!(hub.source(0).expect("source").local_addr(), None);
    let target = hub.target(0).expect("target");
    assert_eq!(target.state(), TargetState::AwaitingRetry);
    let writes = hub.relay(Bytes::from_static(b"late"), None).expect("relay");
    assert_eq!(writes[0].outcome, WriteOutcome::Dropped);
}

#[tokio::test]
async fn config_entries_without_address_are_skipped() {
    let collector = CollectingTarget::bind().await.expect("bind");
    let config = RelayConfig {
        targets: vec![
            EndpointConfig {
                address: None,
                port: Some(1),
            },
            EndpointConfig {
                address: Some("127.0.0.1".into()),
                port: Some(collector.addr().port()),
            },
        ],
        ..RelayConfig::default()
    };
    let hub = RelayBuilder::from_config(RawCodec, &config).start();
    assert_eq!(hub.target_count(), 1);
    assert_eq!(hub.source_count(), 0);
    within(hub.target(0).expect("target").wait_connected()).await;
    hub.shutdown().await;
}

/// Raw codec that rejects payloads starting with `!`.
struct RejectBang;

impl RecordCodec for RejectBang {
    type Record = Bytes;

    fn encode(&self, record: &Bytes, _: &EncodingOptions) -> Result<Vec<u8>, BoxError> {
        Ok(record.to_vec())
    }

    fn decode(&self, payload: &[u8]) -> Result<Bytes, BoxError> {
        if payload.first() == Some(&b'!') {
            return Err("payload rejected".into());
        }
        Ok(Bytes::copy_from_slice(payload))
    }
}

#[tokio::test]
async fn decode_errors_are_reported_and_skipped() {
    let mut collector = CollectingTarget::bind().await.expect("bind");
    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    let hub = RelayBuilder::new(RejectBang)
        .source(loopback(0))
        .target(collector.endpoint())
        .on_source_error(move |_, error| {
            if let SourceError::Decode { payload, .. } = error {
                let _ = err_tx.send(payload.clone());
            }
        })
        .start();
    let source = within(hub.source(0).expect("source").wait_listening()).await;
    within(hub.target(0).expect("target").wait_connected()).await;

    send_frames(source, &[frame_bytes(b"!bad"), frame_bytes(b"good")])
        .await
        .expect("send");

    assert_eq!(collector.recv().await.as_deref(), Some(&b"good"[..]));
    assert_eq!(within(err_rx.recv()).await.as_deref(), Some(&b"!bad"[..]));
    assert_eq!(collector.try_recv_within(QUIET).await, None);
    hub.shutdown().await;
}

#[tokio::test]
async fn oversized_frame_closes_only_its_connection() {
    let mut collector = CollectingTarget::bind().await.expect("bind");
    let (close_tx, mut close_rx) = mpsc::unbounded_channel();
    let hub = RelayBuilder::new(RawCodec)
        .source(loopback(0))
        .target(collector.endpoint())
        .max_buffered_bytes(64)
        .on_inbound_close(move |_, error| {
            let overflow = match error {
                Some(ReassemblyError::BufferOverflow { required, max }) => Some((*required, *max)),
                _ => None,
            };
            let _ = close_tx.send(overflow);
        })
        .start();
    let source = within(hub.source(0).expect("source").wait_listening()).await;
    within(hub.target(0).expect("target").wait_connected()).await;

    // Header announcing a 1000-byte payload.
    send_frames(source, &[b"RAD\x00\x00\x03\xe8DEC".to_vec()])
        .await
        .expect("send");
    assert_eq!(within(close_rx.recv()).await, Some(Some((1010, 64))));
    eventually(|| hub.inbound_connections().is_empty()).await;

    send_frames(source, &[frame_bytes(b"still accepting")])
        .await
        .expect("send");
    assert_eq!(
        collector.recv().await.as_deref(),
        Some(&b"still accepting"[..])
    );
    hub.shutdown().await;
}

#[tokio::test]
async fn frames_pending_at_shutdown_are_reported_not_connected() {
    let _collector = CollectingTarget::bind().await.expect("bind");
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let hub = RelayBuilder::new(RawCodec)
        .target(_collector.endpoint())
        .on_forward(move |report: &ForwardReport<'_, Bytes>| {
            let kind = report.result.err().map(std::io::Error::kind);
            let _ = report_tx.send((report.record.clone(), kind));
        })
        .start();
    within(hub.target(0).expect("target").wait_connected()).await;

    // The target task cannot run before shutdown is requested.
    for record in [&b"a"[..], b"b"] {
        let writes = hub
            .relay(Bytes::copy_from_slice(record), None)
            .expect("relay");
        assert_eq!(writes[0].outcome, WriteOutcome::Queued);
    }
    hub.shutdown().await;

    let not_connected = Some(std::io::ErrorKind::NotConnected);
    assert_eq!(
        report_rx.recv().await,
        Some((Bytes::from_static(b"a"), not_connected))
    );
    assert_eq!(
        report_rx.recv().await,
        Some((Bytes::from_static(b"b"), not_connected))
    );
}

#[tokio::test]
async fn panicking_hook_does_not_end_the_target() {
    let mut collector = CollectingTarget::bind().await.expect("bind");
    let ready_calls = Arc::new(AtomicUsize::new(0));
    let calls = Arc::clone(&ready_calls);
    let hub = RelayBuilder::new(RawCodec)
        .target(collector.endpoint())
        .retry_delay(Duration::from_millis(50))
        .on_target_ready(move |_, _| {
            assert!(
                calls.fetch_add(1, Ordering::SeqCst) > 0,
                "first ready notification fails"
            );
        })
        .start();

    eventually(|| ready_calls.load(Ordering::SeqCst) >= 2).await;
    let target = hub.target(0).expect("target");
    within(target.wait_connected()).await;

    let writes = hub
        .relay(Bytes::from_static(b"after panic"), None)
        .expect("relay");
    assert_eq!(writes[0].outcome, WriteOutcome::Queued);
    assert_eq!(collector.recv().await.as_deref(), Some(&b"after panic"[..]));
    hub.shutdown().await;
}
