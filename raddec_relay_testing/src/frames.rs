//! Frame builders and an upstream sender.

use std::net::SocketAddr;

use raddec_relay::{config::EndpointAddress, frame::encode_frame};
use tokio::{io::AsyncWriteExt, net::TcpStream};

/// Encode `payload` into a complete wire frame.
///
/// # Panics
///
/// Panics if the payload exceeds the frame length limit.
#[must_use]
pub fn frame_bytes(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload)
        .expect("test payload fits in a frame")
        .to_vec()
}

/// Encode `payload` and replace the close marker with `XXX`.
#[must_use]
pub fn corrupt_close_marker(payload: &[u8]) -> Vec<u8> {
    let mut bytes = frame_bytes(payload);
    bytes[7..10].copy_from_slice(b"XXX");
    bytes
}

/// Loopback endpoint on `port`; `0` lets the OS pick.
#[must_use]
pub fn loopback(port: u16) -> EndpointAddress { EndpointAddress::new("127.0.0.1", port) }

/// Connect to `addr`, write every chunk in order, and close the connection.
///
/// # Errors
///
/// Returns any connect or write error.
pub async fn send_frames(addr: SocketAddr, chunks: &[Vec<u8>]) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    for chunk in chunks {
        stream.write_all(chunk).await?;
        stream.flush().await?;
    }
    stream.shutdown().await
}
