//! Wire framing for relayed records.
//!
//! A frame is laid out as:
//!
//! ```text
//! +-------+----------------+-------+-----------------+
//! | "RAD" | length (u32 BE) | "DEC" | payload (length) |
//! +-------+----------------+-------+-----------------+
//!   3 B        4 B            3 B        n B
//! ```
//!
//! The same format is used for inbound decoding and outbound re-encoding.
//! Functions here are stateless; stream reassembly lives in
//! [`crate::reassembly`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    byte_order::{read_network_u32, write_network_u32},
    error::EncodeError,
};

/// Marker opening every frame.
pub const OPEN_MARKER: [u8; 3] = *b"RAD";
/// Marker closing every frame header.
pub const CLOSE_MARKER: [u8; 3] = *b"DEC";
/// Bytes preceding the payload: open marker, length, close marker.
pub const HEADER_LEN: usize = 10;

const LENGTH_OFFSET: usize = 3;
const CLOSE_OFFSET: usize = 7;

/// Outcome of [`decode_frame`].
#[derive(Debug, PartialEq, Eq)]
pub enum FrameDecode<'a> {
    /// A whole frame starts at the offset.
    Complete {
        /// Payload bytes, borrowed from the input window.
        payload: &'a [u8],
        /// Total frame size, header included.
        consumed: usize,
    },
    /// The bytes seen so far are a valid frame prefix.
    NeedMoreData,
    /// The bytes at the offset cannot start a frame.
    Invalid(InvalidFrame),
}

/// Reasons a window cannot be decoded as a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidFrame {
    /// The window does not begin with the open marker.
    MissingOpenMarker,
    /// The close marker is absent at its fixed offset.
    MissingCloseMarker,
}

/// Wrap `payload` in a frame.
///
/// # Errors
///
/// Returns [`EncodeError::PayloadTooLarge`] when the payload length does not
/// fit the 4-byte length field.
///
/// # Examples
///
/// ```
/// use raddec_relay::frame::encode_frame;
///
/// let frame = encode_frame(b"hello").expect("small payload");
/// assert_eq!(&frame[..], b"RAD\x00\x00\x00\x05DEChello");
/// ```
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, EncodeError> {
    let mut dst = BytesMut::new();
    encode_frame_into(payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Append a frame carrying `payload` to `dst`.
///
/// # Errors
///
/// Returns [`EncodeError::PayloadTooLarge`] when the payload length does not
/// fit the 4-byte length field. `dst` is left untouched in that case.
pub fn encode_frame_into(payload: &[u8], dst: &mut BytesMut) -> Result<(), EncodeError> {
    let len = u32::try_from(payload.len()).map_err(|_| EncodeError::PayloadTooLarge {
        size: payload.len(),
    })?;
    dst.reserve(HEADER_LEN + payload.len());
    dst.put_slice(&OPEN_MARKER);
    dst.put_slice(&write_network_u32(len));
    dst.put_slice(&CLOSE_MARKER);
    dst.put_slice(payload);
    Ok(())
}

/// Decode the frame starting at `offset` in `buf` without mutating it.
///
/// Partial markers are validated as far as they have arrived, so a window is
/// only reported as [`FrameDecode::NeedMoreData`] while it could still become
/// a valid frame.
///
/// # Examples
///
/// ```
/// use raddec_relay::frame::{FrameDecode, decode_frame};
///
/// let wire = b"RAD\x00\x00\x00\x05DEChello";
/// assert_eq!(
///     decode_frame(wire, 0),
///     FrameDecode::Complete {
///         payload: b"hello",
///         consumed: 15
///     }
/// );
/// assert_eq!(decode_frame(&wire[..12], 0), FrameDecode::NeedMoreData);
/// ```
#[must_use]
pub fn decode_frame(buf: &[u8], offset: usize) -> FrameDecode<'_> {
    let Some(window) = buf.get(offset..) else {
        return FrameDecode::NeedMoreData;
    };
    if !is_marker_prefix(window, &OPEN_MARKER) {
        return FrameDecode::Invalid(InvalidFrame::MissingOpenMarker);
    }
    if let Some(close) = window.get(CLOSE_OFFSET..)
        && !is_marker_prefix(close, &CLOSE_MARKER)
    {
        return FrameDecode::Invalid(InvalidFrame::MissingCloseMarker);
    }
    let Some(payload_len) = payload_len(window) else {
        return FrameDecode::NeedMoreData;
    };
    let consumed = HEADER_LEN.saturating_add(payload_len);
    match window.get(HEADER_LEN..consumed) {
        Some(payload) => FrameDecode::Complete { payload, consumed },
        None => FrameDecode::NeedMoreData,
    }
}

/// Payload length announced by a header at the start of `window`.
pub(crate) fn payload_len(window: &[u8]) -> Option<usize> {
    let field = window.get(LENGTH_OFFSET..CLOSE_OFFSET)?;
    let field = <[u8; 4]>::try_from(field).ok()?;
    usize::try_from(read_network_u32(field)).ok()
}

/// Offset of the first complete open marker at or after `from`.
pub(crate) fn find_open_marker(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(OPEN_MARKER.len())
        .position(|w| w == OPEN_MARKER)
        .map(|pos| pos + from)
}

/// Offset from which `buf` may still contain a frame start.
///
/// This is the first complete open marker at or after `from`, otherwise the
/// start of the longest trailing partial open marker, otherwise `buf.len()`.
pub(crate) fn resync_offset(buf: &[u8], from: usize) -> usize {
    if let Some(pos) = find_open_marker(buf, from) {
        return pos;
    }
    let start = buf.len().saturating_sub(OPEN_MARKER.len() - 1).max(from);
    (start..buf.len())
        .find(|&i| buf.get(i..).is_some_and(|tail| is_marker_prefix(tail, &OPEN_MARKER)))
        .unwrap_or(buf.len())
}

/// True when the leading bytes of `window` agree with `marker`.
pub(crate) fn is_marker_prefix(window: &[u8], marker: &[u8; 3]) -> bool {
    let n = window.len().min(marker.len());
    window.get(..n) == marker.get(..n)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    const HELLO_FRAME: [u8; 15] = [
        0x52, 0x41, 0x44, 0x00, 0x00, 0x00, 0x05, 0x44, 0x45, 0x43, 0x68, 0x65, 0x6c, 0x6c, 0x6f,
    ];

    #[test]
    fn hello_payload_encodes_to_known_bytes() {
        let frame = encode_frame(&[0x68, 0x65, 0x6c, 0x6c, 0x6f]).expect("encode");
        assert_eq!(&frame[..], &HELLO_FRAME);
    }

    #[test]
    fn hello_frame_decodes_to_payload() {
        assert_eq!(
            decode_frame(&HELLO_FRAME, 0),
            FrameDecode::Complete {
                payload: b"hello",
                consumed: 15,
            }
        );
    }

    #[test]
    fn empty_payload_is_a_header_only_frame() {
        let frame = encode_frame(&[]).expect("encode");
        assert_eq!(frame.len(), HEADER_LEN);
        assert_eq!(
            decode_frame(&frame, 0),
            FrameDecode::Complete {
                payload: &[],
                consumed: HEADER_LEN,
            }
        );
    }

    #[test]
    fn decode_honours_offset() {
        let mut buf = b"junk".to_vec();
        buf.extend_from_slice(&HELLO_FRAME);
        assert_eq!(
            decode_frame(&buf, 4),
            FrameDecode::Complete {
                payload: b"hello",
                consumed: 15,
            }
        );
        assert_eq!(
            decode_frame(&buf, 0),
            FrameDecode::Invalid(InvalidFrame::MissingOpenMarker)
        );
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    #[case(9)]
    #[case(10)]
    #[case(14)]
    fn prefixes_need_more_data(#[case] len: usize) {
        assert_eq!(decode_frame(&HELLO_FRAME[..len], 0), FrameDecode::NeedMoreData);
    }

    #[rstest]
    #[case(b"RAD\x00\x00\x00\x05DXChello".as_slice())]
    #[case(b"RAD\x00\x00\x00\x05X".as_slice())]
    fn corrupted_close_marker_is_invalid(#[case] wire: &[u8]) {
        assert_eq!(
            decode_frame(wire, 0),
            FrameDecode::Invalid(InvalidFrame::MissingCloseMarker)
        );
    }

    #[test]
    fn decode_does_not_read_past_declared_length() {
        let mut buf = HELLO_FRAME.to_vec();
        buf.extend_from_slice(b"RAD");
        let FrameDecode::Complete { payload, consumed } = decode_frame(&buf, 0) else {
            panic!("expected complete frame");
        };
        assert_eq!(payload, b"hello");
        assert_eq!(consumed, HELLO_FRAME.len());
    }

    #[rstest]
    #[case(b"".as_slice(), 0, 0)]
    #[case(b"xxRADyy".as_slice(), 0, 2)]
    #[case(b"xxRA".as_slice(), 0, 2)]
    #[case(b"xxxR".as_slice(), 0, 3)]
    #[case(b"xxxx".as_slice(), 0, 4)]
    #[case(b"RADxxRAD".as_slice(), 1, 5)]
    fn resync_offset_finds_next_frame_start(
        #[case] buf: &[u8],
        #[case] from: usize,
        #[case] expected: usize,
    ) {
        assert_eq!(resync_offset(buf, from), expected);
    }

    proptest! {
        #[test]
        fn payloads_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let frame = encode_frame(&payload).expect("encode");
            prop_assert_eq!(frame.len(), HEADER_LEN + payload.len());
            prop_assert_eq!(
                decode_frame(&frame, 0),
                FrameDecode::Complete { payload: &payload[..], consumed: frame.len() }
            );
        }
    }
}
