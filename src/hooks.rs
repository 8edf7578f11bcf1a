//! Observability callbacks invoked by the relay.
//!
//! Every hook is optional and unset hooks are no-ops. Hooks run inline on the
//! relay's tasks, so they must return quickly; hand work off to a channel if
//! it may block. The relay also logs each of these events, so hooks are only
//! needed when an application wants to react to them.

use std::{any::Any, io, net::SocketAddr, sync::Arc};

use crate::{
    config::EndpointAddress,
    error::{ReassemblyError, SourceError},
    registry::ConnectionId,
};

/// Identity of one inbound connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InboundConnection {
    /// Registry identifier.
    pub id: ConnectionId,
    /// Index of the source that accepted the connection.
    pub source: usize,
    /// Remote peer address.
    pub peer: SocketAddr,
}

/// Result of a completed write to a target.
#[derive(Debug)]
pub struct ForwardReport<'a, R> {
    /// Stable index of the target.
    pub target: usize,
    /// Configured address of the target.
    pub address: &'a EndpointAddress,
    /// The record that was forwarded.
    pub record: &'a R,
    /// `Ok` when the frame reached the socket, otherwise the write failure.
    pub result: Result<(), &'a io::Error>,
}

/// Called with the configured and bound addresses once a source listens.
pub type ListeningHandler = Arc<dyn Fn(&EndpointAddress, SocketAddr) + Send + Sync>;
/// Called when binding or accepting on a source listener fails.
pub type ListenerErrorHandler = Arc<dyn Fn(&EndpointAddress, &io::Error) + Send + Sync>;
/// Called when an inbound connection is accepted.
pub type InboundOpenHandler = Arc<dyn Fn(&InboundConnection) + Send + Sync>;
/// Called when an inbound connection ends, with the fatal error if any.
pub type InboundCloseHandler =
    Arc<dyn Fn(&InboundConnection, Option<&ReassemblyError>) + Send + Sync>;
/// Called for framing and record decode errors on an inbound connection.
pub type SourceErrorHandler = Arc<dyn Fn(&InboundConnection, &SourceError) + Send + Sync>;
/// Called with a target's index and peer address once it connects.
pub type TargetReadyHandler = Arc<dyn Fn(usize, SocketAddr) + Send + Sync>;
/// Called when a target connection closes or fails to connect.
pub type TargetClosedHandler =
    Arc<dyn Fn(usize, &EndpointAddress, Option<&io::Error>) + Send + Sync>;
/// Called after every write attempt on a connected target.
pub type ForwardHandler<R> = Arc<dyn for<'a> Fn(&ForwardReport<'a, R>) + Send + Sync>;
/// Called when a record is not written because the target is disconnected.
pub type DroppedHandler<R> = Arc<dyn Fn(usize, &EndpointAddress, &R) + Send + Sync>;
/// Local consumer of every record received from any source.
pub type RecordHandler<R> = Arc<dyn Fn(&R) + Send + Sync>;

/// The full set of relay notifications.
#[expect(
    clippy::struct_field_names,
    reason = "on_ prefix is idiomatic for callback fields"
)]
pub struct RelayHooks<R> {
    pub(crate) on_listening: Option<ListeningHandler>,
    pub(crate) on_listener_error: Option<ListenerErrorHandler>,
    pub(crate) on_inbound_open: Option<InboundOpenHandler>,
    pub(crate) on_inbound_close: Option<InboundCloseHandler>,
    pub(crate) on_source_error: Option<SourceErrorHandler>,
    pub(crate) on_target_ready: Option<TargetReadyHandler>,
    pub(crate) on_target_closed: Option<TargetClosedHandler>,
    pub(crate) on_forward: Option<ForwardHandler<R>>,
    pub(crate) on_dropped: Option<DroppedHandler<R>>,
}

impl<R> Default for RelayHooks<R> {
    fn default() -> Self {
        Self {
            on_listening: None,
            on_listener_error: None,
            on_inbound_open: None,
            on_inbound_close: None,
            on_source_error: None,
            on_target_ready: None,
            on_target_closed: None,
            on_forward: None,
            on_dropped: None,
        }
    }
}

impl<R> Clone for RelayHooks<R> {
    fn clone(&self) -> Self {
        Self {
            on_listening: self.on_listening.clone(),
            on_listener_error: self.on_listener_error.clone(),
            on_inbound_open: self.on_inbound_open.clone(),
            on_inbound_close: self.on_inbound_close.clone(),
            on_source_error: self.on_source_error.clone(),
            on_target_ready: self.on_target_ready.clone(),
            on_target_closed: self.on_target_closed.clone(),
            on_forward: self.on_forward.clone(),
            on_dropped: self.on_dropped.clone(),
        }
    }
}

impl<R> std::fmt::Debug for RelayHooks<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn set<T>(hook: Option<&T>) -> &'static str {
            if hook.is_some() { "Some(<hook>)" } else { "None" }
        }
        f.debug_struct("RelayHooks")
            .field("on_listening", &set(self.on_listening.as_ref()))
            .field("on_listener_error", &set(self.on_listener_error.as_ref()))
            .field("on_inbound_open", &set(self.on_inbound_open.as_ref()))
            .field("on_inbound_close", &set(self.on_inbound_close.as_ref()))
            .field("on_source_error", &set(self.on_source_error.as_ref()))
            .field("on_target_ready", &set(self.on_target_ready.as_ref()))
            .field("on_target_closed", &set(self.on_target_closed.as_ref()))
            .field("on_forward", &set(self.on_forward.as_ref()))
            .field("on_dropped", &set(self.on_dropped.as_ref()))
            .finish()
    }
}

impl<R> RelayHooks<R> {
    pub(crate) fn listening(&self, address: &EndpointAddress, local: SocketAddr) {
        if let Some(hook) = &self.on_listening {
            hook(address, local);
        }
    }

    pub(crate) fn listener_error(&self, address: &EndpointAddress, error: &io::Error) {
        if let Some(hook) = &self.on_listener_error {
            hook(address, error);
        }
    }

    pub(crate) fn inbound_open(&self, conn: &InboundConnection) {
        if let Some(hook) = &self.on_inbound_open {
            hook(conn);
        }
    }

    pub(crate) fn inbound_close(&self, conn: &InboundConnection, error: Option<&ReassemblyError>) {
        if let Some(hook) = &self.on_inbound_close {
            hook(conn, error);
        }
    }

    pub(crate) fn source_error(&self, conn: &InboundConnection, error: &SourceError) {
        if let Some(hook) = &self.on_source_error {
            hook(conn, error);
        }
    }

    pub(crate) fn target_ready(&self, index: usize, peer: SocketAddr) {
        if let Some(hook) = &self.on_target_ready {
            hook(index, peer);
        }
    }

    pub(crate) fn target_closed(
        &self,
        index: usize,
        address: &EndpointAddress,
        error: Option<&io::Error>,
    ) {
        if let Some(hook) = &self.on_target_closed {
            hook(index, address, error);
        }
    }

    pub(crate) fn forward(&self, report: &ForwardReport<'_, R>) {
        if let Some(hook) = &self.on_forward {
            hook(report);
        }
    }

    pub(crate) fn dropped(&self, index: usize, address: &EndpointAddress, record: &R) {
        if let Some(hook) = &self.on_dropped {
            hook(index, address, record);
        }
    }
}

/// Text of a panic payload raised by a hook or record handler.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&'static str>().copied())
        .unwrap_or("<non-string panic payload>")
}
