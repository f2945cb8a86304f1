//! One request/response cycle: what to send and how to merge the answer.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{DocumentEngine, PresenceEngine, UpdateOrigin};
use crate::error::Result;
use crate::protocol::{codec, Message};
use crate::shadow::ShadowReplica;
use crate::transport::{SyncRequest, SyncResponse};

/// A request on its way out, together with the raw deltas it carries so they
/// can be acknowledged once the remote answers.
#[derive(Debug, Clone)]
pub(crate) struct Outgoing {
    pub request: SyncRequest,
    sync_delta: Option<Vec<u8>>,
    presence_delta: Option<Vec<u8>>,
}

/// Counts of inbound frames handled by [`SyncEngine::apply_response`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Applied {
    pub frames: usize,
    pub dropped: usize,
}

pub(crate) struct SyncEngine<D, P> {
    document: Arc<D>,
    presence: Arc<P>,
    shadow: ShadowReplica<D>,
    version: u64,
}

impl<D: DocumentEngine, P: PresenceEngine> SyncEngine<D, P> {
    pub fn new(document: Arc<D>, presence: Arc<P>) -> Self {
        let shadow = ShadowReplica::new(&*document);
        Self {
            document,
            presence,
            shadow,
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Build the next request. Returns `None` when there is nothing new to
    /// send, unless `force` is set.
    pub fn build_request(&self, force: bool) -> Result<Option<Outgoing>> {
        let sync_delta = self.shadow.compute_sync_delta(&self.document)?;
        let sync = codec::encode_sync::<D>(&sync_delta);
        let presence_delta = self.presence.encode_delta()?;
        let presence = presence_delta.as_deref().and_then(codec::encode_presence);

        let presence_news = presence_delta
            .as_deref()
            .is_some_and(|delta| !self.shadow.presence_acknowledged(delta));
        if sync.is_none() && !presence_news && !force {
            return Ok(None);
        }

        Ok(Some(Outgoing {
            sync_delta: sync.as_ref().map(|_| sync_delta),
            request: SyncRequest {
                sync,
                presence,
                client_id: self.document.client_id(),
                version: self.version,
            },
            presence_delta,
        }))
    }

    /// Whether the remote has seen every local change.
    pub fn is_caught_up(&self) -> Result<bool> {
        let delta = self.shadow.compute_sync_delta(&self.document)?;
        if !D::is_empty_delta(&delta) {
            return Ok(false);
        }
        Ok(match self.presence.encode_delta()? {
            Some(presence) => self.shadow.presence_acknowledged(&presence),
            None => true,
        })
    }

    /// Merge a successful response.
    ///
    /// What we sent is now known to the remote and goes into the shadow.
    /// Every inbound frame is applied on its own; a frame that fails is
    /// logged and dropped without affecting the rest of the batch.
    pub fn apply_response(&mut self, outgoing: Outgoing, response: SyncResponse) -> Applied {
        if let Some(delta) = outgoing.sync_delta {
            if let Err(e) = self.shadow.apply(&delta) {
                warn!(error = %e, "Failed to record acknowledged update");
            }
        }
        if let Some(delta) = outgoing.presence_delta {
            self.shadow.acknowledge_presence(delta);
        }

        let mut applied = Applied::default();
        for frame in &response.sync {
            match self.apply_frame(frame) {
                Ok(()) => applied.frames += 1,
                Err(e) => {
                    warn!(error = %e, "Dropping sync frame");
                    applied.dropped += 1;
                }
            }
        }
        for (client, frame) in &response.presence {
            match self.apply_frame(frame) {
                Ok(()) => applied.frames += 1,
                Err(e) => {
                    warn!(%client, error = %e, "Dropping presence frame");
                    applied.dropped += 1;
                }
            }
        }

        if let Some(version) = response.version {
            self.version = version;
        }
        applied
    }

    fn apply_frame(&self, frame: &str) -> Result<()> {
        match codec::decode(frame)? {
            Message::Sync(msg) => match msg.update_payload() {
                Some(update) => {
                    // Both replicas get the identical update, or the next
                    // delta would be computed against the wrong history.
                    self.document.apply_delta(update, UpdateOrigin::Remote)?;
                    self.shadow.apply(update)?;
                }
                None => debug!("Skipping state vector request"),
            },
            Message::Presence(update) => {
                self.presence.apply_delta(&update, UpdateOrigin::Remote)?;
            }
            Message::Auth(Some(reason)) => warn!(%reason, "Remote denied access"),
            other => debug!(?other, "Ignoring message"),
        }
        Ok(())
    }
}
