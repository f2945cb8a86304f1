//! Presence (awareness) state shared alongside a document.
//!
//! Presence data such as cursor positions, selections and user names doesn't
//! need conflict resolution and is never persisted. Each client owns its own
//! entry, stamped with a logical clock. A peer that has not refreshed its
//! entry within the timeout (30 seconds by default) is considered offline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use yrs::sync::awareness::{Awareness, AwarenessUpdate};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;

use crate::error::{ProviderError, Result};

use super::{PresenceEngine, UpdateOrigin, YDocument};

/// Default timeout for considering a client offline (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed presence value for collaborative editors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PresenceState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CursorPosition>,
}

/// User identification information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserInfo {
    /// Display name.
    pub name: String,

    /// User color (e.g., for cursor highlighting).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Cursor or selection. `anchor == head` for a collapsed cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorPosition {
    pub anchor: u32,
    pub head: u32,
}

type Listener = Arc<dyn Fn(UpdateOrigin) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Listener>>,
}

/// Unregisters a presence observer when dropped.
pub struct PresenceSubscription {
    id: u64,
    listeners: Weak<Listeners>,
}

impl Drop for PresenceSubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            if let Ok(mut entries) = listeners.entries.lock() {
                entries.remove(&self.id);
            }
        }
    }
}

struct Inner {
    awareness: Awareness,
    last_update: HashMap<u64, Instant>,
    /// Whether the local state was ever set or cleared.
    touched: bool,
}

/// A [`PresenceEngine`] backed by the Yrs awareness protocol.
pub struct YPresence {
    inner: Mutex<Inner>,
    client_id: u64,
    timeout: Duration,
    listeners: Arc<Listeners>,
}

impl YPresence {
    /// Create a presence instance for a document; it shares the document's
    /// client id.
    pub fn new(doc: &YDocument) -> Self {
        Self::with_timeout(doc, DEFAULT_TIMEOUT)
    }

    /// Create a presence instance with a custom offline timeout.
    pub fn with_timeout(doc: &YDocument, timeout: Duration) -> Self {
        let awareness = Awareness::new(doc.doc().clone());
        Self {
            client_id: awareness.client_id(),
            inner: Mutex::new(Inner {
                awareness,
                last_update: HashMap::new(),
                touched: false,
            }),
            timeout,
            listeners: Arc::default(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| ProviderError::Engine("Presence state lock poisoned".to_string()))
    }

    /// Set the local client's presence state.
    pub fn set_local_state<S: Serialize>(&self, state: &S) -> Result<()> {
        {
            let mut inner = self.lock()?;
            inner
                .awareness
                .set_local_state(state)
                .map_err(|e| ProviderError::Engine(e.to_string()))?;
            inner.touched = true;
        }
        self.notify(UpdateOrigin::Local);
        Ok(())
    }

    /// Clear the local client's presence state (mark as offline).
    pub fn clear_local_state(&self) -> Result<()> {
        {
            let mut inner = self.lock()?;
            inner.awareness.clean_local_state();
            inner.touched = true;
        }
        self.notify(UpdateOrigin::Local);
        Ok(())
    }

    /// Get the local client's presence state.
    pub fn local_state<S: DeserializeOwned>(&self) -> Option<S> {
        self.lock().ok()?.awareness.local_state()
    }

    /// Get a specific client's presence state.
    pub fn get_state<S: DeserializeOwned>(&self, target_client_id: u64) -> Option<S> {
        let inner = self.lock().ok()?;
        for (client_id, client_state) in inner.awareness.iter() {
            if client_id == target_client_id {
                if let Some(ref json_str) = client_state.data {
                    return serde_json::from_str(json_str).ok();
                }
            }
        }
        None
    }

    /// Get the presence state of every client with a live entry.
    pub fn states<S: DeserializeOwned>(&self) -> HashMap<u64, S> {
        let mut result = HashMap::new();
        let Ok(inner) = self.lock() else {
            return result;
        };
        for (client_id, client_state) in inner.awareness.iter() {
            if let Some(ref json_str) = client_state.data {
                if let Ok(state) = serde_json::from_str(json_str) {
                    result.insert(client_id, state);
                }
            }
        }
        result
    }

    /// Remove peers that have not refreshed their state within the timeout.
    ///
    /// Returns the client IDs that were removed. The local client never
    /// times out.
    pub fn remove_timed_out_clients(&self) -> Vec<u64> {
        let Ok(mut inner) = self.lock() else {
            return Vec::new();
        };
        let now = Instant::now();
        let timed_out: Vec<u64> = inner
            .last_update
            .iter()
            .filter(|(&id, &last)| id != self.client_id && now.duration_since(last) > self.timeout)
            .map(|(&id, _)| id)
            .collect();

        for &client_id in &timed_out {
            inner.last_update.remove(&client_id);
            inner.awareness.remove_state(client_id);
        }
        drop(inner);

        if !timed_out.is_empty() {
            self.notify(UpdateOrigin::Remote);
        }
        timed_out
    }

    fn notify(&self, origin: UpdateOrigin) {
        // Snapshot first so a listener may (un)subscribe without deadlocking.
        let listeners: Vec<Listener> = match self.listeners.entries.lock() {
            Ok(entries) => entries.values().cloned().collect(),
            Err(_) => return,
        };
        for listener in listeners {
            listener(origin);
        }
    }
}

impl PresenceEngine for YPresence {
    type Subscription = PresenceSubscription;

    fn client_id(&self) -> u64 {
        self.client_id
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn encode_delta(&self) -> Result<Option<Vec<u8>>> {
        let inner = self.lock()?;
        if !inner.touched {
            return Ok(None);
        }
        let update = inner
            .awareness
            .update_with_clients(vec![self.client_id])
            .map_err(|e| ProviderError::Engine(e.to_string()))?;
        Ok(Some(update.encode_v1()))
    }

    fn apply_delta(&self, delta: &[u8], origin: UpdateOrigin) -> Result<()> {
        let update = AwarenessUpdate::decode_v1(delta)
            .map_err(|e| ProviderError::Decode(format!("Failed to decode presence update: {}", e)))?;
        {
            let mut inner = self.lock()?;
            let now = Instant::now();
            for &client_id in update.clients.keys() {
                inner.last_update.insert(client_id, now);
            }
            inner
                .awareness
                .apply_update(update)
                .map_err(|e| ProviderError::Engine(e.to_string()))?;
        }
        self.notify(origin);
        Ok(())
    }

    fn observe<F>(&self, listener: F) -> Self::Subscription
    where
        F: Fn(UpdateOrigin) + Send + Sync + 'static,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut entries) = self.listeners.entries.lock() {
            entries.insert(id, Arc::new(listener));
        }
        PresenceSubscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> PresenceState {
        PresenceState {
            user: Some(UserInfo {
                name: "Alice".to_string(),
                color: Some("#ff0000".to_string()),
            }),
            cursor: Some(CursorPosition { anchor: 3, head: 7 }),
        }
    }

    #[test]
    fn test_presence_state_serialization() {
        let json = serde_json::to_string(&alice()).unwrap();
        let parsed: PresenceState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, alice());

        let empty = serde_json::to_string(&PresenceState::default()).unwrap();
        assert_eq!(empty, "{}");
    }

    #[test]
    fn test_never_set_encodes_nothing() {
        let presence = YPresence::new(&YDocument::new());
        assert!(presence.encode_delta().unwrap().is_none());
    }

    #[test]
    fn test_set_and_get_local_state() {
        let presence = YPresence::new(&YDocument::new());
        presence.set_local_state(&alice()).unwrap();
        assert_eq!(presence.local_state::<PresenceState>(), Some(alice()));
        assert!(presence.encode_delta().unwrap().is_some());
    }

    #[test]
    fn test_cleared_state_is_still_sent() {
        let presence = YPresence::new(&YDocument::new());
        presence.set_local_state(&alice()).unwrap();
        presence.clear_local_state().unwrap();
        assert!(presence.local_state::<PresenceState>().is_none());
        assert!(presence.encode_delta().unwrap().is_some());
    }

    #[test]
    fn test_delta_roundtrip_between_peers() {
        let doc1 = YDocument::new();
        let doc2 = YDocument::new();
        let presence1 = YPresence::new(&doc1);
        let presence2 = YPresence::new(&doc2);

        presence1.set_local_state(&alice()).unwrap();
        let delta = presence1.encode_delta().unwrap().unwrap();
        presence2.apply_delta(&delta, UpdateOrigin::Remote).unwrap();

        let seen: Option<PresenceState> = presence2.get_state(presence1.client_id());
        assert_eq!(seen, Some(alice()));
        assert!(presence2
            .states::<PresenceState>()
            .contains_key(&presence1.client_id()));
    }

    #[test]
    fn test_observers_receive_origin_until_dropped() {
        let presence = YPresence::new(&YDocument::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = presence.observe(move |origin| sink.lock().unwrap().push(origin));

        presence.set_local_state(&alice()).unwrap();

        let peer = YPresence::new(&YDocument::new());
        peer.set_local_state(&alice()).unwrap();
        let delta = peer.encode_delta().unwrap().unwrap();
        presence.apply_delta(&delta, UpdateOrigin::Remote).unwrap();

        drop(sub);
        presence.clear_local_state().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![UpdateOrigin::Local, UpdateOrigin::Remote]
        );
    }

    #[test]
    fn test_timeout_is_configurable() {
        let doc = YDocument::new();
        assert_eq!(YPresence::new(&doc).timeout(), DEFAULT_TIMEOUT);
        let short = YPresence::with_timeout(&doc, Duration::from_secs(4));
        assert_eq!(short.timeout(), Duration::from_secs(4));
    }

    #[test]
    fn test_engines_can_cross_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        fn assert_send<T: Send>() {}
        assert_send_sync::<YPresence>();
        assert_send_sync::<YDocument>();
        assert_send::<PresenceSubscription>();
        assert_send::<yrs::Subscription>();
    }

    #[test]
    fn test_remove_timed_out_clients() {
        let presence = YPresence::with_timeout(&YDocument::new(), Duration::from_millis(1));
        presence.set_local_state(&alice()).unwrap();

        let peer = YPresence::new(&YDocument::new());
        peer.set_local_state(&alice()).unwrap();
        let delta = peer.encode_delta().unwrap().unwrap();
        presence.apply_delta(&delta, UpdateOrigin::Remote).unwrap();

        std::thread::sleep(Duration::from_millis(10));
        let removed = presence.remove_timed_out_clients();

        assert_eq!(removed, vec![peer.client_id()]);
        assert!(presence.get_state::<PresenceState>(peer.client_id()).is_none());
        assert!(presence.local_state::<PresenceState>().is_some());
    }
}
