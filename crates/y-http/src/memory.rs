//! An in-process remote store.
//!
//! [`MemoryBackend`] keeps one document stream as an append-only log of
//! framed updates plus the latest presence frame of every client. Clones
//! share storage, so several providers in one process can sync through it.
//! Useful for tests and demos.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::bail;
use async_trait::async_trait;
use tracing::debug;

use crate::transport::{SyncRequest, SyncResponse, Transport};

/// Handle returned by [`MemoryBackend::open`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryConnection {
    /// Stream this connection is bound to.
    pub file_id: u64,
    /// Increments on every open, resumed or not.
    pub session: u64,
}

#[derive(Debug)]
struct Entry {
    version: u64,
    client_id: u64,
    frame: String,
}

#[derive(Debug, Default)]
struct State {
    log: Vec<Entry>,
    version: u64,
    presence: HashMap<u64, String>,
    sessions: u64,
    opens: Vec<Option<MemoryConnection>>,
    requests: Vec<SyncRequest>,
    failing_syncs: usize,
    fail_opens: bool,
    fail_closes: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    file_id: u64,
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new(file_id: u64) -> Self {
        Self {
            file_id,
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the state consistent.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// Number of update batches stored so far.
    pub fn version(&self) -> u64 {
        self.state().version
    }

    /// Every stored update frame, oldest first.
    pub fn frames(&self) -> Vec<String> {
        self.state().log.iter().map(|e| e.frame.clone()).collect()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<SyncRequest> {
        self.state().requests.clone()
    }

    /// The `previous` handle presented by each `open` call.
    pub fn opens(&self) -> Vec<Option<MemoryConnection>> {
        self.state().opens.clone()
    }

    /// Reject the next `count` sync requests.
    pub fn fail_next_syncs(&self, count: usize) {
        self.state().failing_syncs = count;
    }

    pub fn set_fail_opens(&self, fail: bool) {
        self.state().fail_opens = fail;
    }

    pub fn set_fail_closes(&self, fail: bool) {
        self.state().fail_closes = fail;
    }
}

#[async_trait]
impl Transport for MemoryBackend {
    type Connection = MemoryConnection;

    async fn open(
        &self,
        client_id: u64,
        previous: Option<MemoryConnection>,
    ) -> anyhow::Result<MemoryConnection> {
        let mut state = self.state();
        state.opens.push(previous.clone());
        if state.fail_opens {
            bail!("backend refused connection for client {client_id}");
        }
        if let Some(previous) = &previous {
            if previous.file_id != self.file_id {
                bail!("unknown file {}", previous.file_id);
            }
        }
        state.sessions += 1;
        Ok(MemoryConnection {
            file_id: self.file_id,
            session: state.sessions,
        })
    }

    async fn sync(
        &self,
        connection: &MemoryConnection,
        request: SyncRequest,
    ) -> anyhow::Result<SyncResponse> {
        let mut state = self.state();
        state.requests.push(request.clone());
        if state.failing_syncs > 0 {
            state.failing_syncs -= 1;
            bail!("injected sync failure");
        }
        if connection.file_id != self.file_id {
            bail!("unknown file {}", connection.file_id);
        }

        if let Some(frame) = request.sync {
            state.version += 1;
            let version = state.version;
            state.log.push(Entry {
                version,
                client_id: request.client_id,
                frame,
            });
        }
        if let Some(frame) = request.presence {
            state.presence.insert(request.client_id, frame);
        }

        let sync: Vec<String> = state
            .log
            .iter()
            .filter(|e| e.version > request.version && e.client_id != request.client_id)
            .map(|e| e.frame.clone())
            .collect();
        let presence = state
            .presence
            .iter()
            .filter(|(id, _)| **id != request.client_id)
            .map(|(id, frame)| (id.to_string(), frame.clone()))
            .collect();
        debug!(
            client_id = request.client_id,
            since = request.version,
            frames = sync.len(),
            version = state.version,
            "Memory backend answered sync"
        );

        Ok(SyncResponse {
            sync,
            presence,
            version: Some(state.version),
        })
    }

    async fn close(&self, connection: &MemoryConnection) -> anyhow::Result<()> {
        if self.state().fail_closes {
            bail!("backend refused to close session {}", connection.session);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(client_id: u64, version: u64, sync: Option<&str>) -> SyncRequest {
        SyncRequest {
            sync: sync.map(str::to_string),
            presence: None,
            client_id,
            version,
        }
    }

    #[tokio::test]
    async fn test_versions_and_catch_up() {
        let backend = MemoryBackend::new(1);
        let a = backend.open(1, None).await.unwrap();
        let b = backend.open(2, None).await.unwrap();

        let response = backend.sync(&a, request(1, 0, Some("one"))).await.unwrap();
        assert!(response.sync.is_empty());
        assert_eq!(response.version, Some(1));

        backend.sync(&a, request(1, 1, Some("two"))).await.unwrap();

        let response = backend.sync(&b, request(2, 0, None)).await.unwrap();
        assert_eq!(response.sync, vec!["one", "two"]);
        assert_eq!(response.version, Some(2));

        let response = backend.sync(&b, request(2, 1, None)).await.unwrap();
        assert_eq!(response.sync, vec!["two"]);
    }

    #[tokio::test]
    async fn test_presence_excludes_own_entry() {
        let backend = MemoryBackend::new(1);
        let conn = backend.open(1, None).await.unwrap();
        let mut req = request(1, 0, None);
        req.presence = Some("mine".into());
        backend.sync(&conn, req).await.unwrap();

        let mut req = request(2, 0, None);
        req.presence = Some("theirs".into());
        let response = backend.sync(&conn, req).await.unwrap();
        assert_eq!(response.presence.len(), 1);
        assert_eq!(response.presence["1"], "mine");
    }

    #[tokio::test]
    async fn test_resume_keeps_file_and_records_previous() {
        let backend = MemoryBackend::new(9);
        let first = backend.open(1, None).await.unwrap();
        let second = backend.open(1, Some(first.clone())).await.unwrap();
        assert_eq!(second.file_id, 9);
        assert_ne!(second.session, first.session);
        assert_eq!(backend.opens(), vec![None, Some(first)]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = MemoryBackend::new(1);
        let conn = backend.open(1, None).await.unwrap();
        backend.fail_next_syncs(1);
        assert!(backend.sync(&conn, request(1, 0, Some("x"))).await.is_err());
        assert_eq!(backend.version(), 0);
        assert!(backend.sync(&conn, request(1, 0, Some("x"))).await.is_ok());
        assert_eq!(backend.frames(), vec!["x"]);

        backend.set_fail_opens(true);
        assert!(backend.open(1, None).await.is_err());
        backend.set_fail_closes(true);
        assert!(backend.close(&conn).await.is_err());
    }
}
