//! The provider's private picture of what the remote already has.

use crate::engine::{DocumentEngine, UpdateOrigin};
use crate::error::Result;

/// Replica of the remote's last-known state.
///
/// Holds everything the remote acknowledged from this client plus everything
/// this client received from the remote. Diffing the real document against
/// its state vector yields exactly what still has to be sent.
pub(crate) struct ShadowReplica<D> {
    doc: D,
    /// Last presence update the remote accepted.
    presence: Option<Vec<u8>>,
}

impl<D: DocumentEngine> ShadowReplica<D> {
    pub fn new(document: &D) -> Self {
        Self {
            doc: document.replica(),
            presence: None,
        }
    }

    /// Changes in `document` the remote has not seen.
    pub fn compute_sync_delta(&self, document: &D) -> Result<Vec<u8>> {
        document.encode_delta(&self.doc.encode_state_vector())
    }

    /// Record an update as known to the remote, either because it
    /// acknowledged it or because it sent it.
    pub fn apply(&self, delta: &[u8]) -> Result<()> {
        self.doc.apply_delta(delta, UpdateOrigin::Remote)
    }

    pub fn acknowledge_presence(&mut self, delta: Vec<u8>) {
        self.presence = Some(delta);
    }

    pub fn presence_acknowledged(&self, delta: &[u8]) -> bool {
        self.presence.as_deref() == Some(delta)
    }
}
