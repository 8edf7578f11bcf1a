#![cfg(feature = "metrics")]
//! Tests for `raddec_relay` metrics helpers.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use raddec_relay::metrics::{self as relay_metrics, Outcome, SourceErrorKind};
use rstest::rstest;

/// Creates a debugging recorder and snapshotter for metrics testing.
fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

fn counter_with_label(snapshotter: &Snapshotter, name: &str, label: (&str, &str)) -> u64 {
    snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .filter(|(k, _, _, _)| {
            k.key().name() == name
                && k.key()
                    .labels()
                    .any(|l| l.key() == label.0 && l.value() == label.1)
        })
        .map(|(_, _, _, v)| match v {
            DebugValue::Counter(c) => c,
            _ => 0,
        })
        .sum()
}

#[rstest]
#[case(Outcome::Queued, "queued")]
#[case(Outcome::Dropped, "dropped")]
fn relay_outcomes_are_labelled(#[case] outcome: Outcome, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        relay_metrics::inc_records_relayed(outcome);
        relay_metrics::inc_records_relayed(outcome);
    });
    assert_eq!(
        counter_with_label(&snapshotter, relay_metrics::RECORDS_RELAYED, ("outcome", label)),
        2
    );
}

#[rstest]
#[case(SourceErrorKind::Framing, "framing")]
#[case(SourceErrorKind::Decode, "decode")]
fn source_errors_are_labelled(#[case] kind: SourceErrorKind, #[case] label: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || relay_metrics::inc_source_errors(kind));
    assert_eq!(
        counter_with_label(&snapshotter, relay_metrics::SOURCE_ERRORS, ("kind", label)),
        1
    );
}

#[test]
fn connection_gauges_track_open_and_close() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        relay_metrics::inc_inbound_connections();
        relay_metrics::inc_inbound_connections();
        relay_metrics::dec_inbound_connections();
        relay_metrics::inc_targets_connected();
    });

    let metrics = snapshotter.snapshot().into_vec();
    let gauge = |name: &str| {
        metrics.iter().find_map(|(k, _, _, v)| match v {
            DebugValue::Gauge(g) if k.key().name() == name => Some(g.into_inner()),
            _ => None,
        })
    };
    assert_eq!(gauge(relay_metrics::INBOUND_CONNECTIONS), Some(1.0));
    assert_eq!(gauge(relay_metrics::TARGETS_CONNECTED), Some(1.0));
}

#[test]
fn record_and_forward_error_counters_increment() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        relay_metrics::inc_records_received();
        relay_metrics::inc_forward_errors();
    });

    let metrics = snapshotter.snapshot().into_vec();
    for name in [relay_metrics::RECORDS_RECEIVED, relay_metrics::FORWARD_ERRORS] {
        let found = metrics.iter().any(|(k, _, _, v)| {
            k.key().name() == name && matches!(v, DebugValue::Counter(c) if *c > 0)
        });
        assert!(found, "{name} not recorded");
    }
}
