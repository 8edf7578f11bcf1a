//! Per-connection reassembly of frames from an arbitrarily chunked stream.
//!
//! [`FrameReassembler`] is a [`Decoder`] driven by `FramedRead`. Bytes of an
//! incomplete frame stay in the read buffer across socket reads until the
//! frame completes. Desynchronisation is reported as a
//! [`ReassemblyEvent::Framing`] item rather than a decoder error, so the
//! stream keeps running after a malformed frame; only exceeding the buffer
//! bound terminates the connection.
//!
//! The open marker is searched for only once the previous frame has been
//! consumed, so marker bytes inside a payload never trigger
//! resynchronisation.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::{
    error::{FramingError, ReassemblyError},
    frame::{
        FrameDecode,
        HEADER_LEN,
        InvalidFrame,
        OPEN_MARKER,
        decode_frame,
        is_marker_prefix,
        payload_len,
        resync_offset,
    },
};

/// Default bound on buffered bytes per inbound connection (16 MiB).
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 16 * 1024 * 1024;

/// Items yielded by [`FrameReassembler`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReassemblyEvent {
    /// Payload of a complete frame.
    Frame(Bytes),
    /// The stream desynchronised; the offending bytes were discarded.
    Framing(FramingError),
}

/// Stateful frame decoder for one connection.
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use raddec_relay::reassembly::{FrameReassembler, ReassemblyEvent};
/// use tokio_util::codec::Decoder;
///
/// let mut reassembler = FrameReassembler::default();
/// let mut buf = BytesMut::from(&b"RAD\x00\x00\x00\x02DE"[..]);
/// assert_eq!(reassembler.decode(&mut buf).expect("decode"), None);
///
/// buf.extend_from_slice(b"Chi");
/// assert_eq!(
///     reassembler.decode(&mut buf).expect("decode"),
///     Some(ReassemblyEvent::Frame("hi".into()))
/// );
/// ```
#[derive(Clone, Copy, Debug)]
pub struct FrameReassembler {
    max_buffered_bytes: usize,
}

impl FrameReassembler {
    /// Create a reassembler that refuses to buffer more than
    /// `max_buffered_bytes`. The bound is raised to at least one header.
    #[must_use]
    pub fn new(max_buffered_bytes: usize) -> Self {
        Self {
            max_buffered_bytes: max_buffered_bytes.max(HEADER_LEN),
        }
    }

    /// Return the configured buffer bound.
    #[must_use]
    pub fn max_buffered_bytes(&self) -> usize { self.max_buffered_bytes }

    /// Called when the buffer holds a valid but incomplete frame prefix.
    fn await_more(&self, src: &mut BytesMut) -> Result<Option<ReassemblyEvent>, ReassemblyError> {
        let required = payload_len(src).map_or(src.len(), |n| HEADER_LEN.saturating_add(n));
        if required > self.max_buffered_bytes {
            return Err(ReassemblyError::BufferOverflow {
                required,
                max: self.max_buffered_bytes,
            });
        }
        src.reserve(required.saturating_sub(src.len()));
        Ok(None)
    }
}

impl Default for FrameReassembler {
    fn default() -> Self { Self::new(DEFAULT_MAX_BUFFERED_BYTES) }
}

impl Decoder for FrameReassembler {
    type Item = ReassemblyEvent;
    type Error = ReassemblyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let start = resync_offset(src, 0);
        if start > 0 {
            let orphan = src.split_to(start).freeze();
            tracing::debug!(bytes = orphan.len(), "discarding orphan bytes");
            return Ok(Some(ReassemblyEvent::Framing(FramingError::OrphanBytes {
                bytes: orphan,
            })));
        }

        let step = match decode_frame(src, 0) {
            FrameDecode::Complete { consumed, .. } => Ok(consumed),
            FrameDecode::NeedMoreData => return self.await_more(src),
            FrameDecode::Invalid(kind) => Err(kind),
        };
        match step {
            Ok(consumed) => {
                let trailing = src.get(consumed..).unwrap_or_default();
                if !is_marker_prefix(trailing, &OPEN_MARKER) {
                    let declared = consumed - HEADER_LEN;
                    let skip = resync_offset(src, consumed);
                    src.advance(skip);
                    return Ok(Some(ReassemblyEvent::Framing(FramingError::FrameTooLong {
                        declared,
                    })));
                }
                let mut frame = src.split_to(consumed);
                frame.advance(HEADER_LEN);
                Ok(Some(ReassemblyEvent::Frame(frame.freeze())))
            }
            Err(InvalidFrame::MissingCloseMarker) => {
                let skip = resync_offset(src, 1);
                src.advance(skip);
                Ok(Some(ReassemblyEvent::Framing(
                    FramingError::MissingCloseMarker,
                )))
            }
            Err(InvalidFrame::MissingOpenMarker) => {
                let skip = resync_offset(src, 1);
                let orphan = src.split_to(skip).freeze();
                Ok(Some(ReassemblyEvent::Framing(FramingError::OrphanBytes {
                    bytes: orphan,
                })))
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(event) = self.decode(src)? {
            return Ok(Some(event));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let bytes_received = src.len();
        src.clear();
        Ok(Some(ReassemblyEvent::Framing(FramingError::TruncatedFrame {
            bytes_received,
        })))
    }
}
