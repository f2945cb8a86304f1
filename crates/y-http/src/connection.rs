//! Connection lifecycle against the transport.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ProviderError, Result};
use crate::transport::Transport;

/// Owns the opaque connection handle.
///
/// The handle outlives `close` so the next `open` can hand it back to the
/// transport for resumption. Only a successful `open` replaces it.
#[derive(Debug)]
pub(crate) struct ConnectionManager<C> {
    handle: Option<C>,
    open: bool,
}

impl<C: Clone + std::fmt::Debug> ConnectionManager<C> {
    pub fn new() -> Self {
        Self {
            handle: None,
            open: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.open && self.handle.is_some()
    }

    /// The usable connection, if connected.
    pub fn current(&self) -> Option<&C> {
        self.handle.as_ref().filter(|_| self.open)
    }

    /// The last handle returned by the transport, connected or not.
    pub fn handle(&self) -> Option<&C> {
        self.handle.as_ref()
    }

    pub async fn open<T>(&mut self, transport: &T, client_id: u64) -> Result<C>
    where
        T: Transport<Connection = C>,
    {
        let previous = self.handle.clone();
        debug!(client_id, resuming = previous.is_some(), "Opening connection");
        let connection = transport
            .open(client_id, previous)
            .await
            .map_err(|e| ProviderError::ConnectFailure(Arc::new(e)))?;
        info!(?connection, "Connected");
        self.handle = Some(connection.clone());
        self.open = true;
        Ok(connection)
    }

    /// Mark the connection closed, then tell the transport. Returns `false`
    /// when there was nothing to close.
    pub async fn close<T>(&mut self, transport: &T) -> Result<bool>
    where
        T: Transport<Connection = C>,
    {
        if !self.is_connected() {
            return Ok(false);
        }
        self.open = false;
        let Some(connection) = self.handle.as_ref() else {
            return Ok(false);
        };
        info!(?connection, "Disconnecting");
        transport
            .close(connection)
            .await
            .map_err(|e| ProviderError::CloseFailure(Arc::new(e)))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::transport::{SyncRequest, SyncResponse};

    #[derive(Default)]
    struct Recorder {
        opens: Mutex<Vec<Option<u32>>>,
        fail_close: bool,
    }

    #[async_trait]
    impl Transport for Recorder {
        type Connection = u32;

        async fn open(&self, _client_id: u64, previous: Option<u32>) -> anyhow::Result<u32> {
            let mut opens = self.opens.lock().unwrap();
            opens.push(previous);
            Ok(opens.len() as u32)
        }

        async fn sync(&self, _: &u32, _: SyncRequest) -> anyhow::Result<SyncResponse> {
            Ok(SyncResponse::default())
        }

        async fn close(&self, _: &u32) -> anyhow::Result<()> {
            if self.fail_close {
                anyhow::bail!("close rejected");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reconnect_presents_previous_handle() {
        let transport = Recorder::default();
        let mut manager = ConnectionManager::new();

        assert_eq!(manager.open(&transport, 1).await.unwrap(), 1);
        assert!(manager.close(&transport).await.unwrap());
        assert!(!manager.is_connected());
        assert_eq!(manager.handle(), Some(&1));

        assert_eq!(manager.open(&transport, 1).await.unwrap(), 2);
        assert_eq!(*transport.opens.lock().unwrap(), vec![None, Some(1)]);
        assert_eq!(manager.current(), Some(&2));
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let transport = Recorder::default();
        let mut manager: ConnectionManager<u32> = ConnectionManager::new();
        assert!(!manager.close(&transport).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_close_still_disconnects() {
        let transport = Recorder {
            fail_close: true,
            ..Default::default()
        };
        let mut manager = ConnectionManager::new();
        manager.open(&transport, 1).await.unwrap();

        let err = manager.close(&transport).await.unwrap_err();
        assert!(matches!(err, ProviderError::CloseFailure(_)));
        assert!(!manager.is_connected());
        assert_eq!(manager.current(), None);
        assert_eq!(manager.handle(), Some(&1));
    }
}
