//! The relay hub: fixed tables of sources and targets plus routing.
//!
//! [`RelayBuilder::start`] spawns every endpoint and returns a [`RelayHub`]
//! handle. Records decoded from any source pass through
//! [`RelayHub::handle_source_record`]; applications can also inject records
//! with [`RelayHub::relay`], optionally addressing a subset of targets by
//! index.

mod builder;
mod router;

use std::sync::Arc;

pub use builder::RelayBuilder;
pub(crate) use router::{Router, RouterParts};
pub use router::TargetWrite;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::RelayError,
    payload::RecordCodec,
    registry::{ConnectionEntry, ConnectionId},
    source::SourceEndpoint,
    target::TargetEndpoint,
};

/// Handle to a running relay.
///
/// Dropping the handle stops every endpoint without waiting; call
/// [`shutdown`](Self::shutdown) to wait for the tasks to finish.
pub struct RelayHub<C: RecordCodec> {
    router: Arc<Router<C>>,
    sources: Vec<Arc<SourceEndpoint>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl<C: RecordCodec> RelayHub<C> {
    /// Start configuring a hub using `codec` for records.
    #[must_use]
    pub fn builder(codec: C) -> RelayBuilder<C> { RelayBuilder::new(codec) }

    /// Encode `record` once and write it to the selected targets.
    ///
    /// With `None` every target receives the frame. With `Some(indices)`
    /// only those targets do, in the given order; indices beyond the target
    /// table are ignored. A disconnected target yields
    /// [`WriteOutcome::Dropped`](crate::target::WriteOutcome::Dropped) and
    /// does not affect the others.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] when the record cannot be encoded or framed; no
    /// target is written in that case.
    pub fn relay(
        &self,
        record: impl Into<Arc<C::Record>>,
        target_indices: Option<&[usize]>,
    ) -> Result<Vec<TargetWrite>, RelayError> {
        self.router.relay(&record.into(), target_indices)
    }

    /// Route a record as if it had arrived from a source.
    ///
    /// Broadcasts it when forwarding is enabled and passes it to the local
    /// record handler when one is set.
    pub fn handle_source_record(&self, record: C::Record) {
        self.router.handle_source_record(record);
    }

    /// Number of configured targets. Constant for the hub's lifetime.
    #[must_use]
    pub fn target_count(&self) -> usize { self.router.targets().len() }

    /// Target at `index`.
    #[must_use]
    pub fn target(&self, index: usize) -> Option<&TargetEndpoint<C::Record>> {
        self.router.targets().get(index).map(|endpoint| &**endpoint)
    }

    /// Number of configured sources.
    #[must_use]
    pub fn source_count(&self) -> usize { self.sources.len() }

    /// Source at `index`.
    #[must_use]
    pub fn source(&self, index: usize) -> Option<&SourceEndpoint> {
        self.sources.get(index).map(|endpoint| &**endpoint)
    }

    /// Inbound connections currently open across all sources.
    #[must_use]
    pub fn inbound_connections(&self) -> Vec<(ConnectionId, ConnectionEntry)> {
        self.router.registry().snapshot()
    }

    /// Stop every endpoint and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

impl<C: RecordCodec> Drop for RelayHub<C> {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

impl<C: RecordCodec> std::fmt::Debug for RelayHub<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHub")
            .field("sources", &self.sources)
            .field("targets", &self.router.targets())
            .finish_non_exhaustive()
    }
}
