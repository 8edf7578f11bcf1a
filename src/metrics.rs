//! Metric helpers for the relay.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Gauge of open inbound connections.
pub const INBOUND_CONNECTIONS: &str = "raddec_relay_inbound_connections";
/// Gauge of targets currently connected.
pub const TARGETS_CONNECTED: &str = "raddec_relay_targets_connected";
/// Counter of records decoded from sources.
pub const RECORDS_RECEIVED: &str = "raddec_relay_records_received_total";
/// Counter of per-target relay outcomes, labelled by `outcome`.
pub const RECORDS_RELAYED: &str = "raddec_relay_records_relayed_total";
/// Counter of inbound errors, labelled by `kind`.
pub const SOURCE_ERRORS: &str = "raddec_relay_source_errors_total";
/// Counter of failed writes to targets.
pub const FORWARD_ERRORS: &str = "raddec_relay_forward_errors_total";

/// Per-target result of a relay.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    /// Frame queued on a connected target.
    Queued,
    /// Target disconnected; nothing written.
    Dropped,
}

impl Outcome {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "metrics disabled"))]
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Queued => "queued",
            Outcome::Dropped => "dropped",
        }
    }
}

/// Kind of inbound error.
#[derive(Clone, Copy, Debug)]
pub enum SourceErrorKind {
    /// Stream desynchronised.
    Framing,
    /// Record codec rejected a payload.
    Decode,
}

impl SourceErrorKind {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "metrics disabled"))]
    fn as_str(self) -> &'static str {
        match self {
            SourceErrorKind::Framing => "framing",
            SourceErrorKind::Decode => "decode",
        }
    }
}

/// Increment the open inbound connections gauge.
pub fn inc_inbound_connections() {
    #[cfg(feature = "metrics")]
    gauge!(INBOUND_CONNECTIONS).increment(1.0);
}

/// Decrement the open inbound connections gauge.
pub fn dec_inbound_connections() {
    #[cfg(feature = "metrics")]
    gauge!(INBOUND_CONNECTIONS).decrement(1.0);
}

/// Increment the connected targets gauge.
pub fn inc_targets_connected() {
    #[cfg(feature = "metrics")]
    gauge!(TARGETS_CONNECTED).increment(1.0);
}

/// Decrement the connected targets gauge.
pub fn dec_targets_connected() {
    #[cfg(feature = "metrics")]
    gauge!(TARGETS_CONNECTED).decrement(1.0);
}

/// Record a decoded inbound record.
pub fn inc_records_received() {
    #[cfg(feature = "metrics")]
    counter!(RECORDS_RECEIVED).increment(1);
}

/// Record the outcome of relaying to one target.
pub fn inc_records_relayed(outcome: Outcome) {
    #[cfg(feature = "metrics")]
    counter!(RECORDS_RELAYED, "outcome" => outcome.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record an inbound framing or decode error.
pub fn inc_source_errors(kind: SourceErrorKind) {
    #[cfg(feature = "metrics")]
    counter!(SOURCE_ERRORS, "kind" => kind.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a failed write to a target.
pub fn inc_forward_errors() {
    #[cfg(feature = "metrics")]
    counter!(FORWARD_ERRORS).increment(1);
}
