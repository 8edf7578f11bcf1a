//! Record codecs plugged into the relay.
//!
//! The relay never interprets records. A [`RecordCodec`] turns frame
//! payloads into records on the inbound path and records into payloads on the
//! outbound path. [`RawCodec`] relays payload bytes untouched and
//! [`BincodeCodec`] carries typed records encoded with `bincode`.

use std::marker::PhantomData;

use bincode::{Decode, Encode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BoxError;

/// Switches forwarded verbatim to [`RecordCodec::encode`].
///
/// They select which optional record fields are serialised. Codecs that have
/// no optional fields ignore them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncodingOptions {
    /// Serialise the record timestamp.
    pub include_timestamp: bool,
    /// Serialise the captured packets.
    pub include_packets: bool,
}

impl Default for EncodingOptions {
    fn default() -> Self {
        Self {
            include_timestamp: true,
            include_packets: true,
        }
    }
}

/// Conversion between records and frame payloads.
///
/// Both methods are called synchronously on the relay's tasks and should not
/// block.
pub trait RecordCodec: Send + Sync + 'static {
    /// Record type carried through the relay.
    type Record: Send + Sync + 'static;

    /// Serialise `record` into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialised. The record is
    /// then dropped for every target.
    fn encode(&self, record: &Self::Record, options: &EncodingOptions) -> Result<Vec<u8>, BoxError>;

    /// Parse a record from a frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed payloads. The error is reported as a
    /// record decode error and the connection continues.
    fn decode(&self, payload: &[u8]) -> Result<Self::Record, BoxError>;
}

/// Codec whose records are the raw payload bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawCodec;

impl RecordCodec for RawCodec {
    type Record = Bytes;

    fn encode(&self, record: &Bytes, _options: &EncodingOptions) -> Result<Vec<u8>, BoxError> {
        Ok(record.to_vec())
    }

    fn decode(&self, payload: &[u8]) -> Result<Bytes, BoxError> {
        Ok(Bytes::copy_from_slice(payload))
    }
}

/// Codec for typed records using `bincode`'s standard configuration.
///
/// The whole payload must be consumed by a decode; trailing bytes are
/// rejected.
///
/// # Examples
///
/// ```
/// use bincode::{Decode, Encode};
/// use raddec_relay::payload::{BincodeCodec, EncodingOptions, RecordCodec};
///
/// #[derive(Debug, PartialEq, Encode, Decode)]
/// struct Sighting {
///     transmitter: u64,
///     rssi: i8,
/// }
///
/// let codec = BincodeCodec::<Sighting>::new();
/// let record = Sighting {
///     transmitter: 0xfee1_5600_0001,
///     rssi: -70,
/// };
/// let bytes = codec
///     .encode(&record, &EncodingOptions::default())
///     .expect("encode");
/// assert_eq!(codec.decode(&bytes).expect("decode"), record);
/// ```
pub struct BincodeCodec<T> {
    _record: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    /// Create a codec for records of type `T`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self { Self::new() }
}

impl<T> std::fmt::Debug for BincodeCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BincodeCodec").finish()
    }
}

/// Returned when a bincode payload carries bytes after the record.
#[derive(Debug, thiserror::Error)]
#[error("{trailing} trailing bytes after record")]
pub struct TrailingBytes {
    /// Unconsumed byte count.
    pub trailing: usize,
}

impl<T> RecordCodec for BincodeCodec<T>
where
    T: Encode + Decode<()> + Send + Sync + 'static,
{
    type Record = T;

    fn encode(&self, record: &T, _options: &EncodingOptions) -> Result<Vec<u8>, BoxError> {
        Ok(bincode::encode_to_vec(record, bincode::config::standard())?)
    }

    fn decode(&self, payload: &[u8]) -> Result<T, BoxError> {
        let (record, read) = bincode::decode_from_slice(payload, bincode::config::standard())?;
        if read != payload.len() {
            return Err(Box::new(TrailingBytes {
                trailing: payload.len() - read,
            }));
        }
        Ok(record)
    }
}
