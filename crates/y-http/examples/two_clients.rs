//! Two providers editing one document through an in-process backend.
//!
//! Usage:
//!   RUST_LOG=y_http=debug cargo run -p y-http --example two_clients

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use y_http::{
    HttpProvider, MemoryBackend, PresenceState, ProviderEvent, UserInfo, YDocument, YPresence,
    MAX_INTERVAL_BETWEEN_SYNCS,
};
use yrs::{GetString, Text, Transact, WriteTxn};

type Provider = HttpProvider<YDocument, YPresence, MemoryBackend>;

fn open(backend: &MemoryBackend, name: &str) -> y_http::Result<(Arc<YDocument>, Provider)> {
    let doc = Arc::new(YDocument::new());
    let presence = Arc::new(YPresence::new(&doc));
    presence.set_local_state(&PresenceState {
        user: Some(UserInfo {
            name: name.to_string(),
            color: None,
        }),
        cursor: None,
    })?;
    let provider = HttpProvider::new(doc.clone(), presence, backend.clone())?;
    Ok((doc, provider))
}

fn append(doc: &YDocument, text: &str) {
    let mut txn = doc.doc().transact_mut();
    let note = txn.get_or_insert_text("note");
    let len = note.len(&txn);
    note.insert(&mut txn, len, text);
}

fn note(doc: &YDocument) -> String {
    let mut txn = doc.doc().transact_mut();
    txn.get_or_insert_text("note").get_string(&txn)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "y_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backend = MemoryBackend::new(1);
    let (alice_doc, alice) = open(&backend, "alice")?;
    let (bob_doc, bob) = open(&backend, "bob")?;

    let mut events = bob.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ProviderEvent::ConnectionError(e) = event {
                eprintln!("bob: {e}");
            }
        }
    });

    alice.connect().await?;
    bob.connect().await?;

    append(&alice_doc, "Hello");
    append(&bob_doc, ", world");

    // Bob's periodic request picks up whatever Alice sent after his.
    println!("Waiting for a periodic round...");
    tokio::time::sleep(MAX_INTERVAL_BETWEEN_SYNCS + Duration::from_secs(1)).await;

    println!("alice sees: {:?}", note(&alice_doc));
    println!("bob sees:   {:?}", note(&bob_doc));
    println!("backend version: {}", backend.version());

    let peers = bob.presence().states::<PresenceState>();
    for (client_id, state) in peers {
        if let Some(user) = state.user {
            println!("bob knows client {client_id}: {}", user.name);
        }
    }

    alice.destroy().await;
    bob.destroy().await;
    Ok(())
}
