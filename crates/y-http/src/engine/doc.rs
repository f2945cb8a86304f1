use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Origin, ReadTxn, StateVector, Subscription, Transact, Update};

use crate::error::{ProviderError, Result};

use super::{DocumentEngine, UpdateOrigin};

/// Transaction origin attached to every update the provider merges in.
const REMOTE_ORIGIN: &str = "y-http/remote";

/// A [`DocumentEngine`] backed by a Yrs (Rust Y.js) document.
///
/// Updates use the v1 encoding, which is what y-websocket and y-protocols
/// peers exchange.
#[derive(Debug)]
pub struct YDocument {
    doc: Doc,
}

impl Default for YDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl YDocument {
    /// Create a new empty document.
    pub fn new() -> Self {
        Self { doc: Doc::new() }
    }

    /// Wrap an existing Y.Doc.
    pub fn from_doc(doc: Doc) -> Self {
        Self { doc }
    }

    /// Get a reference to the underlying Y.Doc.
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Encode the full document state as an update.
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }
}

impl DocumentEngine for YDocument {
    // No struct groups, empty delete set.
    const EMPTY_DELTA: &'static [u8] = &[0, 0];

    type Subscription = Subscription;

    fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    fn encode_delta(&self, state_vector: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(state_vector).map_err(|e| {
            ProviderError::Engine(format!("Failed to decode state vector: {}", e))
        })?;
        let txn = self.doc.transact();
        Ok(txn.encode_state_as_update_v1(&sv))
    }

    fn apply_delta(&self, delta: &[u8], origin: UpdateOrigin) -> Result<()> {
        if Self::is_empty_delta(delta) {
            return Ok(());
        }

        let update = Update::decode_v1(delta)
            .map_err(|e| ProviderError::Decode(format!("Failed to decode update: {}", e)))?;

        let mut txn = match origin {
            UpdateOrigin::Remote => self.doc.transact_mut_with(REMOTE_ORIGIN),
            UpdateOrigin::Local => self.doc.transact_mut(),
        };
        txn.apply_update(update)
            .map_err(|e| ProviderError::Engine(format!("Failed to apply update: {}", e)))?;

        Ok(())
    }

    fn observe<F>(&self, listener: F) -> Result<Self::Subscription>
    where
        F: Fn(UpdateOrigin) + Send + Sync + 'static,
    {
        let remote = Origin::from(REMOTE_ORIGIN);
        self.doc
            .observe_update_v1(move |txn, _event| {
                let origin = if txn.origin() == Some(&remote) {
                    UpdateOrigin::Remote
                } else {
                    UpdateOrigin::Local
                };
                listener(origin);
            })
            .map_err(|e| ProviderError::Engine(format!("Failed to observe document: {}", e)))
    }

    fn replica(&self) -> Self {
        Self::new()
    }
}
