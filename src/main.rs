//! `raddec-relay` binary.
//!
//! Relays raw frames from every `--source` to every `--target` until
//! interrupted with Ctrl+C.

mod cli;

use std::error::Error;

use clap::Parser;
use raddec_relay::{
    RelayBuilder,
    config::EndpointAddress,
    error::AddressParseError,
    payload::RawCodec,
};

fn parse_endpoints(inputs: &[String]) -> Result<Vec<EndpointAddress>, AddressParseError> {
    inputs.iter().map(|input| EndpointAddress::parse(input)).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let sources = parse_endpoints(&cli.sources)?;
    let targets = parse_endpoints(&cli.targets)?;
    if sources.is_empty() {
        tracing::warn!("no sources configured; only the targets will be maintained");
    }

    #[cfg(feature = "metrics")]
    if let Some(addr) = cli.metrics_listen {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        tracing::info!(%addr, "serving Prometheus metrics");
    }
    #[cfg(not(feature = "metrics"))]
    if cli.metrics_listen.is_some() {
        tracing::warn!("built without the metrics feature; --metrics-listen ignored");
    }

    let mut builder = RelayBuilder::new(RawCodec)
        .enable_forwarding(!cli.no_forwarding)
        .retry_delay(std::time::Duration::from_millis(cli.retry_delay_ms))
        .on_record(|record| tracing::trace!(len = record.len(), "record received"));
    if let Some(max) = cli.max_buffered_bytes {
        builder = builder.max_buffered_bytes(max);
    }
    if let Some(capacity) = cli.target_queue_capacity {
        builder = builder.target_queue_capacity(capacity);
    }
    for address in sources {
        builder = builder.source(address);
    }
    for address in targets {
        builder = builder.target(address);
    }

    let hub = builder.start();
    tracing::info!(
        sources = hub.source_count(),
        targets = hub.target_count(),
        "relay started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    hub.shutdown().await;
    Ok(())
}
