//! Capability interfaces for the CRDT engines the provider drives.
//!
//! The provider never merges anything itself. It only needs to ask an engine
//! for its state vector, for the delta missing from some state vector, and to
//! apply a delta it received. Every application carries an [`UpdateOrigin`]
//! so change observers can tell the provider's own merges apart from edits
//! made by the application.

pub mod doc;
pub mod presence;

pub use doc::YDocument;
pub use presence::{CursorPosition, PresenceState, PresenceSubscription, UserInfo, YPresence};

use std::time::Duration;

use crate::error::Result;

/// Who caused a change to an engine's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// A change made by the application.
    Local,
    /// A change merged in by the provider from data the remote sent.
    Remote,
}

/// A replicated document.
pub trait DocumentEngine: Send + Sync + 'static {
    /// The encoded update that carries no changes.
    const EMPTY_DELTA: &'static [u8];

    /// Keeps a change observer registered for as long as it is alive.
    type Subscription: Send + 'static;

    /// Stable identifier of this replica.
    fn client_id(&self) -> u64;

    /// Encode this replica's state vector, the summary of what it has seen.
    fn encode_state_vector(&self) -> Vec<u8>;

    /// Encode everything this replica has that `state_vector` has not seen.
    fn encode_delta(&self, state_vector: &[u8]) -> Result<Vec<u8>>;

    /// Merge a delta produced by `encode_delta`. Applying the same delta
    /// twice is a no-op. Observers see `origin`.
    fn apply_delta(&self, delta: &[u8], origin: UpdateOrigin) -> Result<()>;

    /// Call `listener` after every committed change.
    fn observe<F>(&self, listener: F) -> Result<Self::Subscription>
    where
        F: Fn(UpdateOrigin) + Send + Sync + 'static;

    /// A fresh, empty replica of the same kind.
    fn replica(&self) -> Self
    where
        Self: Sized;

    fn is_empty_delta(delta: &[u8]) -> bool {
        delta.is_empty() || delta == Self::EMPTY_DELTA
    }
}

/// Ephemeral per-client state (cursors, user names) with last-writer-wins
/// semantics per client id.
pub trait PresenceEngine: Send + Sync + 'static {
    type Subscription: Send + 'static;

    fn client_id(&self) -> u64;

    /// Age after which a peer that sent nothing counts as offline.
    fn timeout(&self) -> Duration;

    /// Encode the local client's state, or `None` if it was never set.
    fn encode_delta(&self) -> Result<Option<Vec<u8>>>;

    fn apply_delta(&self, delta: &[u8], origin: UpdateOrigin) -> Result<()>;

    /// Call `listener` after every change to any client's state.
    fn observe<F>(&self, listener: F) -> Self::Subscription
    where
        F: Fn(UpdateOrigin) + Send + Sync + 'static;
}
