//! Error taxonomy for the relay.
//!
//! - [`FramingError`]: the inbound stream lost synchronisation with the frame
//!   markers. Recoverable; the reassembler skips ahead and continues.
//! - [`ReassemblyError`]: fatal for one inbound connection (buffer bound
//!   exceeded or socket failure).
//! - [`SourceError`]: what an inbound connection reports for a single frame,
//!   either a framing problem or a payload the record codec rejected.
//! - [`EncodeError`] and [`RelayError`]: outbound encoding failures. The
//!   record is dropped for every target.

use std::io;

use bytes::Bytes;
use thiserror::Error;

/// Boxed error returned by payload codecs.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stream-level framing violations detected by the reassembler.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// Bytes that precede the next open marker.
    #[error("{} orphan bytes before frame marker", bytes.len())]
    OrphanBytes {
        /// The discarded bytes.
        bytes: Bytes,
    },

    /// An open marker was not followed by the close marker.
    #[error("cannot identify frame: close marker missing")]
    MissingCloseMarker,

    /// A complete frame was followed by bytes that cannot start a new frame.
    #[error("frame too long: {declared} byte payload followed by unframed bytes")]
    FrameTooLong {
        /// Payload length announced by the frame header.
        declared: usize,
    },

    /// The peer closed the connection with a partial frame buffered.
    #[error("connection closed mid-frame with {bytes_received} bytes buffered")]
    TruncatedFrame {
        /// Bytes discarded at end of stream.
        bytes_received: usize,
    },
}

/// Errors raised while wrapping a payload into a frame.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The payload does not fit the 4-byte length field.
    #[error("payload of {size} bytes exceeds the frame length field")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
    },
}

/// Fatal errors for a single inbound connection.
#[derive(Debug, Error)]
pub enum ReassemblyError {
    /// A frame cannot complete without exceeding the buffer bound.
    #[error("partial frame buffer would exceed {max} bytes (needs {required})")]
    BufferOverflow {
        /// Bytes the pending frame requires.
        required: usize,
        /// Configured buffer bound.
        max: usize,
    },

    /// Socket read failure.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Per-frame problems reported by an inbound connection.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The stream was desynchronised.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A well-framed payload was rejected by the record codec.
    #[error("record decode error: {error}")]
    Decode {
        /// Codec failure.
        #[source]
        error: BoxError,
        /// Raw payload bytes of the rejected frame.
        payload: Bytes,
    },
}

/// Errors parsing a `HOST[:PORT]` endpoint string.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    /// No host before the port separator.
    #[error("missing host in `{input}`")]
    MissingHost {
        /// The rejected input.
        input: String,
    },

    /// A `[` without the matching `]`.
    #[error("unterminated IPv6 literal in `{input}`")]
    UnterminatedIpv6 {
        /// The rejected input.
        input: String,
    },

    /// The port is not a `u16`.
    #[error("invalid port in `{input}`: {source}")]
    InvalidPort {
        /// The rejected input.
        input: String,
        /// Integer parse failure.
        source: std::num::ParseIntError,
    },
}

/// Errors returned by [`crate::hub::RelayHub::relay`].
#[derive(Debug, Error)]
pub enum RelayError {
    /// The record codec failed to serialise the record.
    #[error("record encode error: {0}")]
    Encode(#[source] BoxError),

    /// The encoded payload could not be framed.
    #[error(transparent)]
    Frame(#[from] EncodeError),
}
