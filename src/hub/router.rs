//! Record routing shared by the hub and its source connections.

use std::sync::Arc;

use crate::{
    error::RelayError,
    frame::encode_frame,
    hooks::{RecordHandler, RelayHooks},
    metrics,
    payload::{EncodingOptions, RecordCodec},
    registry::ConnectionRegistry,
    target::{TargetEndpoint, WriteOutcome},
};

/// Outcome of relaying one record to one target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetWrite {
    /// Stable index of the target.
    pub target: usize,
    /// Whether the frame was queued or dropped.
    pub outcome: WriteOutcome,
}

pub(crate) struct Router<C: RecordCodec> {
    codec: C,
    encoding: EncodingOptions,
    forwarding: bool,
    record_handler: Option<RecordHandler<C::Record>>,
    targets: Vec<Arc<TargetEndpoint<C::Record>>>,
    hooks: RelayHooks<C::Record>,
    registry: Arc<ConnectionRegistry>,
}

pub(crate) struct RouterParts<C: RecordCodec> {
    pub(crate) codec: C,
    pub(crate) encoding: EncodingOptions,
    pub(crate) forwarding: bool,
    pub(crate) record_handler: Option<RecordHandler<C::Record>>,
    pub(crate) targets: Vec<Arc<TargetEndpoint<C::Record>>>,
    pub(crate) hooks: RelayHooks<C::Record>,
}

impl<C: RecordCodec> Router<C> {
    pub(crate) fn new(parts: RouterParts<C>) -> Self {
        let RouterParts {
            codec,
            encoding,
            forwarding,
            record_handler,
            targets,
            hooks,
        } = parts;
        Self {
            codec,
            encoding,
            forwarding,
            record_handler,
            targets,
            hooks,
            registry: Arc::new(ConnectionRegistry::default()),
        }
    }

    pub(crate) fn codec(&self) -> &C { &self.codec }

    pub(crate) fn hooks(&self) -> &RelayHooks<C::Record> { &self.hooks }

    pub(crate) fn registry(&self) -> &Arc<ConnectionRegistry> { &self.registry }

    pub(crate) fn targets(&self) -> &[Arc<TargetEndpoint<C::Record>>] { &self.targets }

    /// Forward and/or locally handle a record decoded from a source.
    ///
    /// Neither action depends on the other's outcome.
    pub(crate) fn handle_source_record(&self, record: C::Record) {
        metrics::inc_records_received();
        let record = Arc::new(record);
        if self.forwarding
            && let Err(e) = self.relay(&record, None)
        {
            tracing::warn!(error = %e, "inbound record not forwarded");
        }
        if let Some(handler) = &self.record_handler {
            handler(&record);
        }
    }

    /// Encode `record` once and write the frame to the selected targets.
    ///
    /// `None` selects every target. Indices beyond the table are skipped.
    pub(crate) fn relay(
        &self,
        record: &Arc<C::Record>,
        target_indices: Option<&[usize]>,
    ) -> Result<Vec<TargetWrite>, RelayError> {
        let payload = self
            .codec
            .encode(record, &self.encoding)
            .map_err(RelayError::Encode)?;
        let frame = encode_frame(&payload)?;

        let write = |target: &Arc<TargetEndpoint<C::Record>>| TargetWrite {
            target: target.index(),
            outcome: target.write(frame.clone(), record),
        };
        let writes = match target_indices {
            Some(indices) => indices
                .iter()
                .filter_map(|&i| self.targets.get(i))
                .map(&write)
                .collect(),
            None => self.targets.iter().map(&write).collect(),
        };
        Ok(writes)
    }
}
