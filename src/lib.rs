#![doc(html_root_url = "https://docs.rs/raddec-relay/latest")]
//! Public API for the `raddec-relay` library.
//!
//! The crate relays opaque records between TCP sources and TCP targets. Each
//! inbound connection is decoded with the `RAD`/`DEC` length-delimited
//! framing into records, and every record is re-framed once and fanned out to
//! a fixed, index-stable table of outbound connections that reconnect
//! indefinitely.
//!
//! ```no_run
//! use raddec_relay::{RelayBuilder, config::EndpointAddress, payload::RawCodec};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let hub = RelayBuilder::new(RawCodec)
//!     .source(EndpointAddress::new("0.0.0.0", 50001))
//!     .target(EndpointAddress::new("collector.local", 50001))
//!     .start();
//! let _ = tokio::signal::ctrl_c().await;
//! hub.shutdown().await;
//! # }
//! ```

pub mod byte_order;
pub mod config;
pub mod error;
pub mod frame;
pub mod hooks;
pub mod hub;
pub mod metrics;
pub mod payload;
pub mod reassembly;
pub mod registry;
pub mod source;
pub mod target;

pub use config::{EndpointAddress, RelayConfig};
pub use error::{
    AddressParseError,
    EncodeError,
    FramingError,
    ReassemblyError,
    RelayError,
    SourceError,
};
pub use frame::{decode_frame, encode_frame};
pub use hub::{RelayBuilder, RelayHub, TargetWrite};
pub use payload::{BincodeCodec, EncodingOptions, RawCodec, RecordCodec};
pub use target::{TargetState, WriteOutcome};
