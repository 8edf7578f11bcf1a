//! Command line interface for the `raddec-relay` binary.
//!
//! Endpoints are taken as plain strings here so the build script can render
//! the man page without linking the library; the binary parses them with
//! [`EndpointAddress::parse`](raddec_relay::config::EndpointAddress::parse).

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `raddec-relay` binary.
#[derive(Debug, Parser)]
#[command(
    name = "raddec-relay",
    version,
    about = "Relay RADDEC frames from TCP sources to reconnecting TCP targets"
)]
pub struct Cli {
    /// Address to listen on, as HOST or HOST:PORT (port defaults to 50001).
    /// May be repeated.
    #[arg(short, long = "source", value_name = "HOST[:PORT]")]
    pub sources: Vec<String>,

    /// Address to forward records to. May be repeated; order fixes the
    /// target index.
    #[arg(short, long = "target", value_name = "HOST[:PORT]")]
    pub targets: Vec<String>,

    /// Accept and decode records without forwarding them.
    #[arg(long)]
    pub no_forwarding: bool,

    /// Delay between reconnection attempts, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub retry_delay_ms: u64,

    /// Bound on buffered partial-frame bytes per inbound connection.
    #[arg(long, value_name = "BYTES")]
    pub max_buffered_bytes: Option<usize>,

    /// Frames queued per connected target before records are dropped.
    #[arg(long, value_name = "FRAMES")]
    pub target_queue_capacity: Option<usize>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR")]
    pub metrics_listen: Option<SocketAddr>,
}
