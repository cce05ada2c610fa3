//! Endpoint: the public entry point.
//!
//! An [`Endpoint`] binds a listener at the path derived from its logical
//! name, accepts inbound connections, and lazily opens outbound
//! connections the first time a peer is addressed. All per-peer state
//! lives in sessions behind the registry; the endpoint itself is a thin
//! handle plus the accept loop.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::{Config, DispatchMode, ReconnectPolicy};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::events::{EventBus, PeerEvent};
use crate::handler::{FnHandler, HandlerChain, RequestHandler};
use crate::message::Message;
use crate::session::reader::spawn_inbound_reader;
use crate::session::{PeerRegistry, SessionState, WriterConfig};
use crate::transport::{endpoint_path, PipeListener};

/// State shared by the endpoint, its sessions, and all connection tasks.
pub(crate) struct Shared {
    /// This endpoint's logical name; sent in every registration frame.
    pub(crate) local_name: String,
    pub(crate) config: Config,
    pub(crate) registry: PeerRegistry,
    pub(crate) handlers: HandlerChain,
    pub(crate) events: EventBus,
    pub(crate) dispatcher: Dispatcher,
    /// Flips to `true` exactly once, on shutdown. Readers observing it
    /// exit without reporting a break.
    pub(crate) shutdown: watch::Receiver<bool>,
}

/// Builder for an [`Endpoint`].
pub struct EndpointBuilder {
    name: String,
    config: Config,
    handlers: Vec<(i32, Arc<dyn RequestHandler>)>,
}

impl EndpointBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            handlers: Vec::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Maximum allowed frame body length.
    pub fn max_frame_length(mut self, len: u32) -> Self {
        self.config.max_frame_length = len;
        self
    }

    /// Header sentinel bytes; both sides must agree.
    pub fn header_bytes(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.config.header_bytes = bytes.into();
        self
    }

    /// Enable or disable automatic reconnection of broken sessions.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Inbound handler dispatch ordering.
    pub fn dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.config.dispatch = mode;
        self
    }

    /// Reconnection policy applied to broken sessions.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Writer queue tuning.
    pub fn writer_config(mut self, writer: WriterConfig) -> Self {
        self.config.writer = writer;
        self
    }

    /// Directory for endpoint sockets (Unix only).
    pub fn pipe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pipe_dir = Some(dir.into());
        self
    }

    /// Register a request handler with the given priority (lowest runs
    /// first).
    pub fn handler(mut self, priority: i32, handler: Arc<dyn RequestHandler>) -> Self {
        self.handlers.push((priority, handler));
        self
    }

    /// Register an async closure as a request handler.
    pub fn handle_fn<F, Fut>(self, priority: i32, f: F) -> Self
    where
        F: Fn(Message, String) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Option<Bytes>> + Send + 'static,
    {
        self.handler(priority, Arc::new(FnHandler::new(f)))
    }

    /// Bind the endpoint's listener and start accepting peers.
    pub async fn bind(self) -> Result<Endpoint> {
        let path = endpoint_path(&self.name, self.config.pipe_dir.as_deref());
        let mut listener = PipeListener::bind(&path).await?;
        tracing::info!(name = %self.name, path = %path, "endpoint bound");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            local_name: self.name,
            dispatcher: Dispatcher::new(self.config.dispatch),
            config: self.config,
            registry: PeerRegistry::new(),
            handlers: HandlerChain::new(self.handlers),
            events: EventBus::default(),
            shutdown: shutdown_rx,
        });

        let accept_task = tokio::spawn({
            let shared = shared.clone();
            async move {
                let mut shutdown = shared.shutdown.clone();
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        accepted = listener.accept() => match accepted {
                            Ok(stream) => {
                                spawn_inbound_reader(stream, shared.clone());
                            }
                            Err(e) => {
                                tracing::warn!("accept failed: {}", e);
                            }
                        },
                    }
                }
            }
        });

        Ok(Endpoint {
            shared,
            shutdown_tx,
            accept_task,
        })
    }
}

/// A named peer endpoint.
pub struct Endpoint {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl Endpoint {
    /// Start building an endpoint with the given logical name.
    pub fn builder(name: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(name)
    }

    /// This endpoint's logical name.
    pub fn local_name(&self) -> &str {
        &self.shared.local_name
    }

    /// Send a fire-and-forget notification to a peer, connecting on
    /// demand.
    pub async fn notify(&self, peer: &str, message: impl Into<Message>) -> Result<()> {
        let session = self.shared.registry.get_or_create(peer);
        session.notify(&self.shared, message.into()).await
    }

    /// Send a request to a peer and await the response body.
    pub async fn request(&self, peer: &str, message: impl Into<Message>) -> Result<Bytes> {
        let session = self.shared.registry.get_or_create(peer);
        session.request(&self.shared, message.into()).await
    }

    /// Subscribe to lifecycle and message events.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.shared.events.subscribe()
    }

    /// Names of currently known peers.
    pub fn peers(&self) -> Vec<String> {
        self.shared.registry.peer_names()
    }

    /// Lifecycle state of a known peer's session.
    pub fn session_state(&self, peer: &str) -> Option<SessionState> {
        self.shared.registry.get(peer).map(|session| session.state())
    }

    /// Shut the endpoint down.
    ///
    /// Stops the accept loop, fails every in-flight request, drops all
    /// sessions, and closes the ordered dispatch lane. Peers observe the
    /// closed connections as session breaks on their side.
    pub async fn shutdown(self) {
        tracing::info!(name = %self.shared.local_name, "endpoint shutting down");
        let _ = self.shutdown_tx.send(true);

        for name in self.shared.registry.peer_names() {
            if let Some(session) = self.shared.registry.get(&name) {
                session.make_terminal(&self.shared);
            }
        }
        self.shared.registry.clear();
        self.shared.dispatcher.close();

        let _ = self.accept_task.await;
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("local_name", &self.shared.local_name)
            .field("peers", &self.shared.registry.len())
            .finish()
    }
}
