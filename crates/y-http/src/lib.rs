//! # y-http
//!
//! Request/response sync provider for [yrs](https://docs.rs/yrs) documents.
//!
//! Where the usual Y-sync providers hold a WebSocket open, this crate syncs
//! over plain request/response round trips: each request carries what the
//! remote has not seen yet, each response carries what this client has not
//! seen yet. That makes it usable behind HTTP endpoints, serverless
//! functions or any RPC layer.
//!
//! ## What it does
//!
//! - **Shadow replica**: tracks what the remote already has, so only the
//!   missing delta is sent
//! - **Batching**: local edits within `MIN_INTERVAL_BETWEEN_SYNCS` share one
//!   request, and at most one request is in flight at a time
//! - **Periodic sync**: while connected, a request goes out at least every
//!   `MAX_INTERVAL_BETWEEN_SYNCS` to keep presence alive and pull remote edits
//! - **Protocol**: y-sync v1 message framing, base64 encoded for text bodies
//! - **Presence**: awareness state (user, cursor) exchanged with every request
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`provider`] | `HttpProvider` facade, events and status |
//! | [`transport`] | The `Transport` trait and request/response payloads |
//! | [`memory`] | In-process `MemoryBackend` transport |
//! | [`engine`] | Document and presence engine traits with yrs implementations |
//! | [`protocol`] | Frame encoding and decoding |
//! | [`scheduler`] | When requests are sent |
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use y_http::{HttpProvider, MemoryBackend, PresenceState, UserInfo, YDocument, YPresence};
//!
//! # async fn run() -> y_http::Result<()> {
//! let doc = Arc::new(YDocument::new());
//! let presence = Arc::new(YPresence::new(&doc));
//! let provider = HttpProvider::new(doc.clone(), presence.clone(), MemoryBackend::new(1))?;
//!
//! provider.connect().await?;
//! presence.set_local_state(&PresenceState {
//!     user: Some(UserInfo { name: "ada".into(), color: Some("#ff0000".into()) }),
//!     cursor: None,
//! })?;
//!
//! // Edit `doc.doc()` through the yrs API; changes are picked up automatically.
//!
//! provider.destroy().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod shadow;
mod sync;

pub mod engine;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod provider;
pub mod scheduler;
pub mod transport;

pub use engine::{
    CursorPosition, DocumentEngine, PresenceEngine, PresenceState, UpdateOrigin, UserInfo,
    YDocument, YPresence,
};
pub use error::{ProviderError, Result};
pub use memory::{MemoryBackend, MemoryConnection};
pub use protocol::{Message, SyncMessage};
pub use provider::{ConnectionStatus, HttpProvider, ProviderConfig, ProviderEvent, ProviderStatus};
pub use scheduler::{MAX_INTERVAL_BETWEEN_SYNCS, MIN_INTERVAL_BETWEEN_SYNCS};
pub use transport::{SyncRequest, SyncResponse, Transport};
