//! The public facade: wires a document, its presence state and a transport
//! into a background sync loop.
//!
//! All mutable sync state lives in a single task. The facade talks to it
//! through a command channel; results come back through oneshot replies,
//! [`ProviderEvent`]s on a broadcast channel, and a [`ProviderStatus`]
//! snapshot on a watch channel.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::engine::{DocumentEngine, PresenceEngine, UpdateOrigin};
use crate::error::{ProviderError, Result};
use crate::scheduler::{Fire, SyncScheduler, MAX_INTERVAL_BETWEEN_SYNCS, MIN_INTERVAL_BETWEEN_SYNCS};
use crate::sync::{Outgoing, SyncEngine};
use crate::transport::{SyncResponse, Transport};

const EVENT_CAPACITY: usize = 64;

/// Tuning for the sync loop.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use y_http::ProviderConfig;
///
/// let config = ProviderConfig::new()
///     .with_min_interval(Duration::from_millis(250))
///     .with_max_interval(Duration::from_secs(5));
/// assert_eq!(config.max_interval, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Minimum spacing between the start of two requests.
    pub min_interval: Duration,
    /// Longest silence while connected.
    pub max_interval: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            min_interval: MIN_INTERVAL_BETWEEN_SYNCS,
            max_interval: MAX_INTERVAL_BETWEEN_SYNCS,
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Set the periodic interval. The provider lowers it to half of the
    /// presence engine's timeout if needed.
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Cap `max_interval` so peers never see this client expire while it
    /// is connected.
    pub fn limited_to(mut self, presence_timeout: Duration) -> Self {
        self.max_interval = self.max_interval.min(presence_timeout / 2);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

/// Notifications published by the provider.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    /// Opening, syncing or closing failed.
    ConnectionError(ProviderError),
    /// The synced flag changed.
    Sync(bool),
    Status(ConnectionStatus),
}

/// Point-in-time view of the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus<C> {
    /// Last handle returned by the transport. Kept after disconnecting.
    pub connection: Option<C>,
    pub connected: bool,
    /// Last version reported by the remote.
    pub version: u64,
    /// Whether the remote is known to have every local change.
    pub synced: bool,
}

impl<C> Default for ProviderStatus<C> {
    fn default() -> Self {
        Self {
            connection: None,
            connected: false,
            version: 0,
            synced: false,
        }
    }
}

enum Command<C> {
    Connect(oneshot::Sender<Result<C>>),
    Disconnect(oneshot::Sender<Result<()>>),
    Destroy(oneshot::Sender<()>),
    LocalChange,
}

/// Keeps a document and its presence in sync with a remote store through a
/// request/response [`Transport`].
///
/// Local changes are batched: the first change after a quiet period goes
/// out right away, anything following within `min_interval` rides along
/// with the next request. While connected, a request is sent at least every
/// `max_interval` to refresh presence and pick up remote changes.
///
/// Must be created inside a Tokio runtime.
pub struct HttpProvider<D, P, T>
where
    D: DocumentEngine,
    P: PresenceEngine,
    T: Transport,
{
    document: Arc<D>,
    presence: Arc<P>,
    commands: mpsc::UnboundedSender<Command<T::Connection>>,
    events: broadcast::Sender<ProviderEvent>,
    status: watch::Receiver<ProviderStatus<T::Connection>>,
    task: Option<JoinHandle<()>>,
    _document_subscription: D::Subscription,
    _presence_subscription: P::Subscription,
}

impl<D, P, T> HttpProvider<D, P, T>
where
    D: DocumentEngine,
    P: PresenceEngine,
    T: Transport,
{
    pub fn new(document: Arc<D>, presence: Arc<P>, transport: T) -> Result<Self> {
        Self::with_config(document, presence, transport, ProviderConfig::default())
    }

    pub fn with_config(
        document: Arc<D>,
        presence: Arc<P>,
        transport: T,
        config: ProviderConfig,
    ) -> Result<Self> {
        let config = config.limited_to(presence.timeout());
        debug!(?config, "Starting provider");

        let (commands, receiver) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (status_tx, status) = watch::channel(ProviderStatus::default());

        let tx = commands.clone();
        let document_subscription = document.observe(move |origin| {
            if origin == UpdateOrigin::Local {
                let _ = tx.send(Command::LocalChange);
            }
        })?;
        let tx = commands.clone();
        let presence_subscription = presence.observe(move |origin| {
            if origin == UpdateOrigin::Local {
                let _ = tx.send(Command::LocalChange);
            }
        });

        let driver = Driver {
            transport: Arc::new(transport),
            client_id: document.client_id(),
            engine: SyncEngine::new(document.clone(), presence.clone()),
            connection: ConnectionManager::new(),
            scheduler: SyncScheduler::new(config.min_interval, config.max_interval),
            in_flight: None,
            changed_in_flight: false,
            synced: false,
            events: events.clone(),
            status: status_tx,
        };
        let task = tokio::spawn(driver.run(receiver));

        Ok(Self {
            document,
            presence,
            commands,
            events,
            status,
            task: Some(task),
            _document_subscription: document_subscription,
            _presence_subscription: presence_subscription,
        })
    }

    pub fn document(&self) -> &Arc<D> {
        &self.document
    }

    pub fn presence(&self) -> &Arc<P> {
        &self.presence
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> ProviderStatus<T::Connection> {
        self.status.borrow().clone()
    }

    /// Receiver that is notified whenever the status snapshot changes.
    pub fn watch_status(&self) -> watch::Receiver<ProviderStatus<T::Connection>> {
        self.status.clone()
    }

    pub fn connection(&self) -> Option<T::Connection> {
        self.status.borrow().connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    pub fn version(&self) -> u64 {
        self.status.borrow().version
    }

    pub fn is_synced(&self) -> bool {
        self.status.borrow().synced
    }

    /// Open a connection and run one full sync cycle.
    ///
    /// Fails with [`ProviderError::ConnectFailure`] (also broadcast as an
    /// event) if the transport refuses. A failing first sync is only
    /// reported as an event; the connection stays up.
    pub async fn connect(&self) -> Result<T::Connection> {
        self.request(Command::Connect).await?
    }

    /// Stop syncing and close the connection.
    ///
    /// The provider counts as disconnected before the transport is told. A
    /// request already in flight still completes and is merged.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(Command::Disconnect).await?
    }

    /// Disconnect, stop the sync loop and release the observers.
    pub async fn destroy(mut self) {
        if self.request(Command::Destroy).await.is_err() {
            debug!("Sync loop already stopped");
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Sync loop ended abnormally");
            }
        }
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command<T::Connection>,
    ) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| ProviderError::Closed)?;
        response.await.map_err(|_| ProviderError::Closed)
    }
}

impl<D, P, T> Drop for HttpProvider<D, P, T>
where
    D: DocumentEngine,
    P: PresenceEngine,
    T: Transport,
{
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct InFlight {
    outgoing: Outgoing,
    response: BoxFuture<'static, anyhow::Result<SyncResponse>>,
}

/// State owned by the background task.
struct Driver<D, P, T: Transport> {
    transport: Arc<T>,
    client_id: u64,
    engine: SyncEngine<D, P>,
    connection: ConnectionManager<T::Connection>,
    scheduler: SyncScheduler,
    in_flight: Option<InFlight>,
    /// A local change arrived while the current request was in flight.
    changed_in_flight: bool,
    synced: bool,
    events: broadcast::Sender<ProviderEvent>,
    status: watch::Sender<ProviderStatus<T::Connection>>,
}

impl<D, P, T> Driver<D, P, T>
where
    D: DocumentEngine,
    P: PresenceEngine,
    T: Transport,
{
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command<T::Connection>>) {
        loop {
            let deadline = self.scheduler.next_deadline(self.connection.is_connected());
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Destroy(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.handle(command).await,
                    None => return,
                },
                result = wait_in_flight(&mut self.in_flight) => self.finish(result),
                () = sleep_until_deadline(deadline) => self.fire(Instant::now()),
            }
        }
    }

    async fn handle(&mut self, command: Command<T::Connection>) {
        match command {
            Command::Connect(reply) => {
                let _ = reply.send(self.connect().await);
            }
            Command::Disconnect(reply) => {
                let _ = reply.send(self.disconnect().await);
            }
            Command::LocalChange => self.local_change(),
            Command::Destroy(_) => {}
        }
    }

    async fn connect(&mut self) -> Result<T::Connection> {
        let connection = match self.connection.open(&*self.transport, self.client_id).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Connect failed");
                self.emit(ProviderEvent::ConnectionError(e.clone()));
                return Err(e);
            }
        };
        self.emit(ProviderEvent::Status(ConnectionStatus::Connected));
        self.publish_status();

        // One request at a time: let an outstanding one land first.
        if self.in_flight.is_some() {
            let result = wait_in_flight(&mut self.in_flight).await;
            self.finish(result);
        }
        if self.start_request(true, Instant::now()) {
            let result = wait_in_flight(&mut self.in_flight).await;
            self.finish(result);
        }
        Ok(connection)
    }

    async fn disconnect(&mut self) -> Result<()> {
        let was_connected = self.connection.is_connected();
        let result = self.connection.close(&*self.transport).await;
        if was_connected {
            self.emit(ProviderEvent::Status(ConnectionStatus::Disconnected));
            self.publish_status();
        }
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Disconnect failed");
                self.emit(ProviderEvent::ConnectionError(e.clone()));
                Err(e)
            }
        }
    }

    async fn shutdown(&mut self) {
        // Errors were already broadcast.
        let _ = self.disconnect().await;
        self.in_flight = None;
        info!(client_id = self.client_id, "Provider destroyed");
    }

    fn local_change(&mut self) {
        self.scheduler.trigger(Instant::now());
        debug!(state = ?self.scheduler.state(), "Local change");
        if self.in_flight.is_some() {
            self.changed_in_flight = true;
        }
        self.set_synced(false);
    }

    fn fire(&mut self, now: Instant) {
        if let Some(fire) = self.scheduler.poll(now, self.connection.is_connected()) {
            self.start_request(fire == Fire::Periodic, now);
        }
    }

    /// Build and dispatch a request. Returns whether one went out.
    fn start_request(&mut self, force: bool, now: Instant) -> bool {
        let Some(connection) = self.connection.current().cloned() else {
            self.scheduler.request_skipped();
            return false;
        };
        let outgoing = match self.engine.build_request(force) {
            Ok(Some(outgoing)) => outgoing,
            Ok(None) => {
                self.scheduler.request_skipped();
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to build sync request");
                self.scheduler.request_abandoned(now);
                return false;
            }
        };

        debug!(
            version = outgoing.request.version,
            has_sync = outgoing.request.sync.is_some(),
            has_presence = outgoing.request.presence.is_some(),
            "Sending sync request"
        );
        self.scheduler.request_started(now);
        self.changed_in_flight = false;

        let transport = self.transport.clone();
        let request = outgoing.request.clone();
        let response = Box::pin(async move { transport.sync(&connection, request).await });
        self.in_flight = Some(InFlight { outgoing, response });
        true
    }

    fn finish(&mut self, result: anyhow::Result<SyncResponse>) {
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        match result {
            Ok(response) => {
                let applied = self.engine.apply_response(in_flight.outgoing, response);
                debug!(
                    version = self.engine.version(),
                    frames = applied.frames,
                    dropped = applied.dropped,
                    "Sync response merged"
                );
                if !self.changed_in_flight {
                    let caught_up = self.engine.is_caught_up().unwrap_or(false);
                    self.set_synced(caught_up);
                }
            }
            Err(e) => {
                warn!(error = %e, "Sync request failed");
                let error = ProviderError::SyncFailure(Arc::new(e));
                self.emit(ProviderEvent::ConnectionError(error));
            }
        }
        self.scheduler.request_finished(Instant::now());
        self.publish_status();
    }

    fn set_synced(&mut self, synced: bool) {
        if self.synced != synced {
            self.synced = synced;
            self.emit(ProviderEvent::Sync(synced));
            self.publish_status();
        }
    }

    fn emit(&self, event: ProviderEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_status(&self) {
        self.status.send_replace(ProviderStatus {
            connection: self.connection.handle().cloned(),
            connected: self.connection.is_connected(),
            version: self.engine.version(),
            synced: self.synced,
        });
    }
}

async fn wait_in_flight(in_flight: &mut Option<InFlight>) -> anyhow::Result<SyncResponse> {
    match in_flight {
        Some(in_flight) => (&mut in_flight.response).await,
        None => pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
