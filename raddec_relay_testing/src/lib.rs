//! Utilities for exercising a [`RelayHub`](raddec_relay::RelayHub) over real
//! loopback sockets in tests.
//!
//! [`CollectingTarget`] stands in for a downstream consumer and hands every
//! reassembled payload to the test; [`send_frames`] plays the part of an
//! upstream producer.
//!
//! ```rust,no_run
//! use raddec_relay::{RelayBuilder, payload::RawCodec};
//! use raddec_relay_testing::{CollectingTarget, frame_bytes, send_frames};
//!
//! # async fn example() -> std::io::Result<()> {
//! let mut target = CollectingTarget::bind().await?;
//! let hub = RelayBuilder::new(RawCodec)
//!     .source(raddec_relay_testing::loopback(0))
//!     .target(target.endpoint())
//!     .start();
//! let source = hub.source(0).expect("source").wait_listening().await;
//! hub.target(0).expect("target").wait_connected().await;
//! send_frames(source, &[frame_bytes(b"hello")]).await?;
//! assert_eq!(target.recv().await.as_deref(), Some(&b"hello"[..]));
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod frames;

pub use collector::{CollectingTarget, RECV_TIMEOUT};
pub use frames::{corrupt_close_marker, frame_bytes, loopback, send_frames};
