//! The request/response collaborator the provider talks through.
//!
//! How a request physically reaches the remote store (HTTP, an RPC
//! framework, a test double) is up to the implementation. Payloads derive
//! serde with camelCase names so they can be posted as JSON unchanged.

use std::collections::HashMap;
use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Body of one sync request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Framed document update, absent when there is nothing new.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<String>,
    /// Framed presence update, absent until local presence is first set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<String>,
    pub client_id: u64,
    /// Last version the remote reported to this client.
    pub version: u64,
}

/// What the remote answers to a [`SyncRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Framed document updates this client has not seen yet.
    #[serde(default)]
    pub sync: Vec<String>,
    /// Framed presence updates keyed by client id.
    #[serde(default)]
    pub presence: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opaque handle identifying the stream this client is bound to.
    type Connection: Clone + Debug + Send + Sync + 'static;

    /// Open a connection, presenting the previous one for resumption.
    async fn open(
        &self,
        client_id: u64,
        previous: Option<Self::Connection>,
    ) -> anyhow::Result<Self::Connection>;

    /// Exchange one batch of frames. Must be safe to repeat.
    async fn sync(
        &self,
        connection: &Self::Connection,
        request: SyncRequest,
    ) -> anyhow::Result<SyncResponse>;

    async fn close(&self, connection: &Self::Connection) -> anyhow::Result<()>;
}
