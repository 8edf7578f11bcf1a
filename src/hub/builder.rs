//! Builder for [`RelayHub`].

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{
    RelayHub,
    router::{Router, RouterParts},
};
use crate::{
    config::{
        DEFAULT_RETRY_DELAY,
        DEFAULT_TARGET_QUEUE_CAPACITY,
        EndpointAddress,
        RelayConfig,
    },
    error::{ReassemblyError, SourceError},
    hooks::{ForwardReport, InboundConnection, RelayHooks},
    payload::{EncodingOptions, RecordCodec},
    reassembly::DEFAULT_MAX_BUFFERED_BYTES,
    source::{BackoffConfig, SourceContext, SourceEndpoint, spawn_source},
    target::{TargetEndpoint, spawn_target},
};

/// Configures and starts a [`RelayHub`].
///
/// Sources and targets keep the order in which they are added; a target's
/// position is its permanent index.
///
/// # Examples
///
/// ```no_run
/// use raddec_relay::{
///     config::EndpointAddress,
///     hub::RelayBuilder,
///     payload::RawCodec,
/// };
///
/// # #[tokio::main]
/// # async fn main() {
/// let hub = RelayBuilder::new(RawCodec)
///     .source(EndpointAddress::new("0.0.0.0", 50001))
///     .target(EndpointAddress::new("10.0.0.2", 50001))
///     .on_record(|record| println!("{} byte record", record.len()))
///     .start();
/// hub.shutdown().await;
/// # }
/// ```
pub struct RelayBuilder<C: RecordCodec> {
    codec: C,
    sources: Vec<EndpointAddress>,
    targets: Vec<EndpointAddress>,
    forwarding: bool,
    encoding: EncodingOptions,
    retry_delay: Duration,
    max_buffered_bytes: usize,
    target_queue_capacity: usize,
    listener_backoff: BackoffConfig,
    record_handler: Option<crate::hooks::RecordHandler<C::Record>>,
    hooks: RelayHooks<C::Record>,
}

impl<C: RecordCodec> RelayBuilder<C> {
    /// Create a builder with no endpoints and default settings.
    #[must_use]
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            sources: Vec::new(),
            targets: Vec::new(),
            forwarding: true,
            encoding: EncodingOptions::default(),
            retry_delay: DEFAULT_RETRY_DELAY,
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
            target_queue_capacity: DEFAULT_TARGET_QUEUE_CAPACITY,
            listener_backoff: BackoffConfig::default(),
            record_handler: None,
            hooks: RelayHooks::default(),
        }
    }

    /// Create a builder from declarative configuration.
    ///
    /// Endpoint entries without an address are skipped.
    #[must_use]
    pub fn from_config(codec: C, config: &RelayConfig) -> Self {
        let mut builder = Self::new(codec)
            .enable_forwarding(config.enable_forwarding)
            .encoding_options(config.encoding_options)
            .retry_delay(config.retry_delay())
            .max_buffered_bytes(config.max_buffered_bytes)
            .target_queue_capacity(config.target_queue_capacity)
            .listener_backoff(config.listener_backoff);
        builder.sources = config.source_addresses();
        builder.targets = config.target_addresses();
        builder
    }

    /// Add a listening endpoint.
    #[must_use]
    pub fn source(mut self, address: EndpointAddress) -> Self {
        self.sources.push(address);
        self
    }

    /// Add an outbound endpoint; its index is the number of targets added
    /// before it.
    #[must_use]
    pub fn target(mut self, address: EndpointAddress) -> Self {
        self.targets.push(address);
        self
    }

    /// Enable or disable forwarding of inbound records to all targets.
    #[must_use]
    pub fn enable_forwarding(mut self, enabled: bool) -> Self {
        self.forwarding = enabled;
        self
    }

    /// Options passed to the record codec when encoding.
    #[must_use]
    pub fn encoding_options(mut self, options: EncodingOptions) -> Self {
        self.encoding = options;
        self
    }

    /// Fixed delay between reconnection attempts, at least 1 ms.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay.max(Duration::from_millis(1));
        self
    }

    /// Bound on buffered partial-frame bytes per inbound connection.
    #[must_use]
    pub fn max_buffered_bytes(mut self, max: usize) -> Self {
        self.max_buffered_bytes = max;
        self
    }

    /// Frames queued per connected target, at least one. Records relayed
    /// to a target whose queue is full are dropped.
    #[must_use]
    pub fn target_queue_capacity(mut self, capacity: usize) -> Self {
        self.target_queue_capacity = capacity.max(1);
        self
    }

    /// Back-off between failed listener accepts and binds.
    #[must_use]
    pub fn listener_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.listener_backoff = backoff;
        self
    }

    /// Handle every record received from any source locally.
    #[must_use]
    pub fn on_record<F>(mut self, f: F) -> Self
    where
        F: Fn(&C::Record) + Send + Sync + 'static,
    {
        self.record_handler = Some(Arc::new(f));
        self
    }

    /// Notify when a source listener is bound.
    #[must_use]
    pub fn on_listening<F>(mut self, f: F) -> Self
    where
        F: Fn(&EndpointAddress, SocketAddr) + Send + Sync + 'static,
    {
        self.hooks.on_listening = Some(Arc::new(f));
        self
    }

    /// Notify when a source listener fails to bind or to accept.
    #[must_use]
    pub fn on_listener_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&EndpointAddress, &io::Error) + Send + Sync + 'static,
    {
        self.hooks.on_listener_error = Some(Arc::new(f));
        self
    }

    /// Notify when an inbound connection is accepted.
    #[must_use]
    pub fn on_inbound_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&InboundConnection) + Send + Sync + 'static,
    {
        self.hooks.on_inbound_open = Some(Arc::new(f));
        self
    }

    /// Notify when an inbound connection ends.
    #[must_use]
    pub fn on_inbound_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&InboundConnection, Option<&ReassemblyError>) + Send + Sync + 'static,
    {
        self.hooks.on_inbound_close = Some(Arc::new(f));
        self
    }

    /// Notify on framing and record decode errors.
    #[must_use]
    pub fn on_source_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&InboundConnection, &SourceError) + Send + Sync + 'static,
    {
        self.hooks.on_source_error = Some(Arc::new(f));
        self
    }

    /// Notify when a target connects.
    #[must_use]
    pub fn on_target_ready<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, SocketAddr) + Send + Sync + 'static,
    {
        self.hooks.on_target_ready = Some(Arc::new(f));
        self
    }

    /// Notify when a target connection closes or a connect attempt fails.
    #[must_use]
    pub fn on_target_closed<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &EndpointAddress, Option<&io::Error>) + Send + Sync + 'static,
    {
        self.hooks.on_target_closed = Some(Arc::new(f));
        self
    }

    /// Notify after every write on a connected target.
    #[must_use]
    pub fn on_forward<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&ForwardReport<'a, C::Record>) + Send + Sync + 'static,
    {
        self.hooks.on_forward = Some(Arc::new(f));
        self
    }

    /// Notify when a record is dropped for a disconnected or full target.
    #[must_use]
    pub fn on_dropped<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &EndpointAddress, &C::Record) + Send + Sync + 'static,
    {
        self.hooks.on_dropped = Some(Arc::new(f));
        self
    }

    /// Spawn every endpoint and return the running hub.
    ///
    /// Targets start connecting and sources start binding immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn start(self) -> RelayHub<C> {
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let targets: Vec<_> = self
            .targets
            .into_iter()
            .enumerate()
            .map(|(index, address)| {
                Arc::new(TargetEndpoint::new(
                    index,
                    address,
                    self.target_queue_capacity,
                    self.hooks.clone(),
                ))
            })
            .collect();
        for target in &targets {
            spawn_target(Arc::clone(target), self.retry_delay, shutdown.clone(), &tracker);
        }

        let router = Arc::new(Router::new(RouterParts {
            codec: self.codec,
            encoding: self.encoding,
            forwarding: self.forwarding,
            record_handler: self.record_handler,
            targets,
            hooks: self.hooks,
        }));

        let sources: Vec<_> = self
            .sources
            .into_iter()
            .enumerate()
            .map(|(index, address)| Arc::new(SourceEndpoint::new(index, address)))
            .collect();
        for source in &sources {
            spawn_source(Arc::clone(source), SourceContext {
                router: Arc::clone(&router),
                max_buffered_bytes: self.max_buffered_bytes,
                backoff: self.listener_backoff,
                shutdown: shutdown.clone(),
                tracker: tracker.clone(),
            });
        }

        RelayHub {
            router,
            sources,
            shutdown,
            tracker,
        }
    }
}
