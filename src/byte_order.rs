//! Helpers for the network byte-order length field.
//!
//! The frame length is the only multi-byte integer on the wire. Keeping the
//! conversion here scopes the Clippy expectation to a single place.

/// Serialise a `u32` in network byte order (big-endian).
///
/// # Examples
///
/// ```
/// use raddec_relay::byte_order::write_network_u32;
///
/// assert_eq!(write_network_u32(0x1234_5678), [0x12, 0x34, 0x56, 0x78]);
/// ```
#[must_use]
pub fn write_network_u32(value: u32) -> [u8; 4] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u32` from its on-wire representation.
///
/// # Examples
///
/// ```
/// use raddec_relay::byte_order::read_network_u32;
///
/// assert_eq!(read_network_u32([0x00, 0x00, 0x00, 0x05]), 5);
/// ```
#[must_use]
pub fn read_network_u32(bytes: [u8; 4]) -> u32 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u32::from_be_bytes(bytes)
}
