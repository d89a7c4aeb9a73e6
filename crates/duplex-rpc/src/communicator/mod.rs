//! Bidirectional JSON-RPC endpoint.
//!
//! A [`Communicator`] owns one framed connection. It serves registered methods
//! to the peer and issues requests and notifications of its own over the same
//! stream.
//!
//! # Architecture
//!
//! - **Listen loop**: a single task owns the read side. Inbound responses are
//!   appended to the [`ResponseQueue`] inline; every inbound request or
//!   notification runs in its own spawned task.
//! - **Write path**: requests, notifications and replies all go through one
//!   path that serializes frames and, on a transport failure, runs recovery
//!   and retries the write once.
//! - **Recovery**: at most one reconnect sequence runs at a time; concurrent
//!   failures wait for it on a shared [`Revision`](crate::Revision).
//!
//! # State machine
//!
//! `Idle` → `Listening` → (transport failure) `Recovering` → `Listening`, or
//! `Unrecoverable` once retries are exhausted. `Unrecoverable` is terminal
//! until [`Communicator::recover`] is called.

mod dispatch;
mod recovery;

use crate::codec::FrameCodec;
use crate::config::CommunicatorConfig;
use crate::connection::Connection;
use crate::error::{Result, RpcError};
use crate::message::{Notification, Request};
use crate::queue::ResponseQueue;
use crate::registry::{Handler, MethodRegistry};
use recovery::RecoveryState;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Callback invoked once per transition into the unrecoverable state.
pub type FailureCallback = Arc<dyn Fn(&RpcError) + Send + Sync>;

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicatorState {
    /// Not listening.
    Idle,
    /// The listen loop is running.
    Listening,
    /// A reconnect sequence is in progress.
    Recovering,
    /// Retries were exhausted; requires [`Communicator::recover`].
    Unrecoverable,
}

impl std::fmt::Display for CommunicatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommunicatorState::Idle => write!(f, "IDLE"),
            CommunicatorState::Listening => write!(f, "LISTENING"),
            CommunicatorState::Recovering => write!(f, "RECOVERING"),
            CommunicatorState::Unrecoverable => write!(f, "UNRECOVERABLE"),
        }
    }
}

pub(crate) struct Inner {
    connection: Arc<dyn Connection>,
    codec: FrameCodec,
    config: CommunicatorConfig,
    registry: RwLock<MethodRegistry>,
    queue: ResponseQueue,
    next_id: AtomicU64,
    recovery: Mutex<RecoveryState>,
    listener: Mutex<Option<JoinHandle<()>>>,
    on_unrecoverable: Option<FailureCallback>,
}

impl Inner {
    fn is_listening(&self) -> bool {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn take_listener(&self) -> Option<JoinHandle<()>> {
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Spawn the listen loop unless one is already running.
    fn spawn_listener(self: &Arc<Self>) {
        let mut listener = self.listener.lock().unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        self.queue.reopen();
        *listener = Some(tokio::spawn(self.clone().listen_loop()));
    }

    /// Write one message body, recovering once on a transport failure.
    async fn send(&self, body: &[u8]) -> Result<()> {
        let generation = self.generation();
        match self.codec.write_message(body).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transport() && self.is_listening() => {
                debug!("Write failed ({}), recovering before retry", e);
                self.recover_from(generation).await?;
                self.codec.write_message(body).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Stops the listen loop once the last [`Communicator`] handle is dropped.
struct OwnerGuard(Arc<Inner>);

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take_listener() {
            handle.abort();
        }
    }
}

/// Bidirectional JSON-RPC endpoint over one connection.
///
/// Cheap to clone; all clones share the same connection, registry, queue and
/// id counter.
#[derive(Clone)]
pub struct Communicator {
    inner: Arc<Inner>,
    _owner: Arc<OwnerGuard>,
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("state", &self.state())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Communicator {
    /// Create a communicator with the default codec and configuration.
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self::from_parts(FrameCodec::new(connection), CommunicatorConfig::default(), None)
    }

    /// Start configuring a communicator around `codec`.
    pub fn builder(codec: FrameCodec) -> CommunicatorBuilder {
        CommunicatorBuilder::new(codec)
    }

    fn from_parts(
        codec: FrameCodec,
        config: CommunicatorConfig,
        on_unrecoverable: Option<FailureCallback>,
    ) -> Self {
        let inner = Arc::new(Inner {
            connection: codec.connection().clone(),
            codec,
            config,
            registry: RwLock::new(MethodRegistry::new()),
            queue: ResponseQueue::new(),
            next_id: AtomicU64::new(1),
            recovery: Mutex::new(RecoveryState::default()),
            listener: Mutex::new(None),
            on_unrecoverable,
        });
        Self {
            _owner: Arc::new(OwnerGuard(inner.clone())),
            inner,
        }
    }

    /// Register a method the peer may call.
    ///
    /// Registration is only allowed before [`listen`](Self::listen); once the
    /// listen loop runs the registry is frozen.
    pub fn register_method<H, Args>(
        &self,
        name: impl Into<String>,
        params: &[&str],
        handler: H,
    ) -> Result<()>
    where
        H: Handler<Args>,
    {
        if self.inner.is_listening() {
            return Err(RpcError::config(
                "methods must be registered before listening starts",
            ));
        }
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register_method(name, params, handler)
    }

    /// Connect if needed and start the listen loop.
    ///
    /// Returns immediately if already listening.
    pub async fn listen(&self) -> Result<()> {
        if self.inner.is_unrecoverable() {
            return Err(RpcError::Unrecoverable);
        }
        if self.inner.is_listening() {
            return Ok(());
        }
        if !self.inner.connection.is_connected() {
            self.inner.establish().await?;
        }
        self.inner.spawn_listener();
        info!("Communicator listening");
        Ok(())
    }

    /// Call `method` on the peer and wait for its result.
    ///
    /// There is no timeout: the call waits until the response arrives, the
    /// queue closes, or the connection becomes unrecoverable.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.inner.is_unrecoverable() {
            return Err(RpcError::Unrecoverable);
        }
        if !self.inner.is_listening() {
            return Err(RpcError::NotListening);
        }

        let id = Value::from(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let request = Request::new(id.clone(), method, params);
        let body = serde_json::to_vec(&request)?;

        // Registered before the write; released if this future is dropped.
        let pending = self.inner.queue.expect(id);
        debug!("Request {} -> {}", pending.id(), method);
        self.inner.send(&body).await?;

        let response = pending.wait().await.map_err(|e| {
            if self.inner.is_unrecoverable() {
                RpcError::Unrecoverable
            } else {
                e
            }
        })?;
        response.into_result()
    }

    /// Send a one-way notification. Returns once the frame is written.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        if self.inner.is_unrecoverable() {
            return Err(RpcError::Unrecoverable);
        }
        let notification = Notification::new(method, params);
        let body = serde_json::to_vec(&notification)?;

        debug!("Notify -> {}", method);
        self.inner.send(&body).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CommunicatorState {
        if let Some(state) = self.inner.recovery_state() {
            return state;
        }
        if self.inner.is_listening() {
            CommunicatorState::Listening
        } else {
            CommunicatorState::Idle
        }
    }

    pub fn config(&self) -> &CommunicatorConfig {
        &self.inner.config
    }

    /// Stop listening, fail pending requests and close the connection.
    ///
    /// A reconnect in progress is abandoned; tasks waiting on it fail with
    /// [`RpcError::NotListening`].
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.take_listener() {
            handle.abort();
            // Wait for the cancellation so the loop cannot observe the close
            // below and start a recovery.
            let _ = handle.await;
        }
        // A request or notify task may still be leading a reconnect.
        self.inner.abandon_recovery();
        self.inner.queue.close();
        if let Err(e) = self.inner.connection.close().await {
            debug!("Error closing connection during shutdown: {}", e);
        }
        info!("Communicator shut down");
    }
}

/// Builder for [`Communicator`].
///
/// # Example
///
/// ```rust,ignore
/// let communicator = Communicator::builder(FrameCodec::new(connection))
///     .with_config(CommunicatorConfig::new().with_reconnect_attempts(3))
///     .on_unrecoverable(|err| eprintln!("peer lost: {err}"))
///     .build()?;
/// ```
pub struct CommunicatorBuilder {
    codec: FrameCodec,
    config: CommunicatorConfig,
    on_unrecoverable: Option<FailureCallback>,
}

impl CommunicatorBuilder {
    pub fn new(codec: FrameCodec) -> Self {
        Self {
            codec,
            config: CommunicatorConfig::default(),
            on_unrecoverable: None,
        }
    }

    /// Set the recovery configuration.
    ///
    /// Default: [`CommunicatorConfig::default`]
    pub fn with_config(mut self, config: CommunicatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the callback run when the connection becomes unrecoverable.
    pub fn on_unrecoverable(mut self, callback: impl Fn(&RpcError) + Send + Sync + 'static) -> Self {
        self.on_unrecoverable = Some(Arc::new(callback));
        self
    }

    /// Validate the configuration and build the communicator.
    pub fn build(self) -> Result<Communicator> {
        self.config.validate()?;
        Ok(Communicator::from_parts(
            self.codec,
            self.config,
            self.on_unrecoverable,
        ))
    }
}
