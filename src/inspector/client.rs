use super::transport::WsTransport;
use super::transport_trait::InspectorTransport;
use super::types::{InspectorEvent, Request, ServerMessage};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, warn};

/// Default per-request deadline. Inspector replies are normally sub-second;
/// anything beyond this means the target or the connection is gone.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default WebSocket handshake deadline.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Subscribing to this name receives every event regardless of method.
pub const WILDCARD_EVENT: &str = "event";

type ReplySender = oneshot::Sender<Result<Value>>;
type EventCallback = Arc<dyn Fn(InspectorEvent) + Send + Sync>;

/// Opaque token returned by `on`/`once`, usable with `off_handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct EventHandler {
    id: HandlerId,
    once: bool,
    callback: EventCallback,
}

/// CDP client with event-driven architecture.
///
/// Requests are correlated by a monotonically increasing id; each pending id
/// owns exactly one reply slot. Server-initiated notifications (frames
/// without an id) are dispatched to callbacks registered by method name,
/// synchronously relative to the receive loop. Writes go through a channel so
/// callbacks may issue further `send`s without reentrant locking.
pub struct InspectorClient {
    transport: Arc<Mutex<Box<dyn InspectorTransport>>>,
    id_counter: Arc<AtomicU64>,
    handler_counter: Arc<AtomicU64>,
    pending: Arc<RwLock<HashMap<u64, ReplySender>>>,
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    write_tx: mpsc::UnboundedSender<Request>,
    connected: Arc<AtomicBool>,
}

impl InspectorClient {
    /// Connect to the inspector WebSocket URL announced by the target.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_timeout(url, DEFAULT_CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(url: &str, connect_timeout: Duration) -> Result<Self> {
        let transport = WsTransport::connect(url, connect_timeout).await?;
        Ok(Self::with_transport(Box::new(transport)))
    }

    /// Build a client over a custom transport (used by tests).
    pub fn with_transport(transport: Box<dyn InspectorTransport>) -> Self {
        let transport = Arc::new(Mutex::new(transport));
        let pending: Arc<RwLock<HashMap<u64, ReplySender>>> = Arc::new(RwLock::new(HashMap::new()));
        let handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::read_loop(
            transport.clone(),
            pending.clone(),
            handlers.clone(),
            connected.clone(),
        ));
        tokio::spawn(Self::write_loop(
            transport.clone(),
            write_rx,
            pending.clone(),
            connected.clone(),
        ));

        Self {
            transport,
            id_counter: Arc::new(AtomicU64::new(1)),
            handler_counter: Arc::new(AtomicU64::new(1)),
            pending,
            handlers,
            write_tx,
            connected,
        }
    }

    /// Receive loop. Reads with the transport lock held, but yields it every
    /// 50 ms so the writer task can interleave its frames. Dropping the read
    /// future between polls is safe: the WebSocket buffers frames internally.
    async fn read_loop(
        transport: Arc<Mutex<Box<dyn InspectorTransport>>>,
        pending: Arc<RwLock<HashMap<u64, ReplySender>>>,
        handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
        connected: Arc<AtomicBool>,
    ) {
        loop {
            if !connected.load(Ordering::SeqCst) {
                break;
            }

            let msg_result = {
                let mut transport = transport.lock().await;
                tokio::select! {
                    result = transport.read_message() => Some(result),
                    _ = tokio::time::sleep(Duration::from_millis(50)) => None,
                }
            };

            let msg = match msg_result {
                None => {
                    // Lock released; give queued writers a chance to run.
                    tokio::task::yield_now().await;
                    continue;
                }
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    if connected.swap(false, Ordering::SeqCst) {
                        debug!("Inspector receive loop ending: {}", e);
                    }
                    break;
                }
            };

            Self::dispatch(msg, &pending, &handlers).await;
        }

        Self::reject_all_pending(&pending).await;
    }

    async fn dispatch(
        msg: ServerMessage,
        pending: &Arc<RwLock<HashMap<u64, ReplySender>>>,
        handlers: &Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
    ) {
        if let Some(id) = msg.id {
            let slot = pending.write().await.remove(&id);
            match slot {
                Some(sender) => {
                    let outcome = match msg.error {
                        Some(err) => Err(Error::Protocol {
                            code: err.code,
                            message: err.message,
                        }),
                        None => Ok(msg.result.unwrap_or(Value::Null)),
                    };
                    if sender.send(outcome).is_err() {
                        // Caller timed out and reaped the slot already.
                        debug!("Reply for id {} arrived after its waiter left", id);
                    }
                }
                None => warn!("Reply for unknown request id {}", id),
            }
            return;
        }

        let Some(method) = msg.method else {
            warn!("Inspector frame with neither id nor method, dropping");
            return;
        };

        let event = InspectorEvent {
            method: method.clone(),
            params: msg.params.unwrap_or(Value::Null),
        };

        // Snapshot matching callbacks, then invoke without the lock so a
        // handler can register or remove handlers itself.
        let mut to_invoke: Vec<(HandlerId, bool, EventCallback)> = Vec::new();
        {
            let registry = handlers.read().await;
            for key in [method.as_str(), WILDCARD_EVENT] {
                if let Some(list) = registry.get(key) {
                    for h in list {
                        to_invoke.push((h.id, h.once, h.callback.clone()));
                    }
                }
            }
        }

        let mut spent: Vec<HandlerId> = Vec::new();
        for (id, once, callback) in to_invoke {
            callback(event.clone());
            if once {
                spent.push(id);
            }
        }

        if !spent.is_empty() {
            let mut registry = handlers.write().await;
            for list in registry.values_mut() {
                list.retain(|h| !spent.contains(&h.id));
            }
        }
    }

    /// Writer task. Owns the outbound half of the correlation contract: a
    /// frame that cannot be written must not leave its reply slot behind.
    async fn write_loop(
        transport: Arc<Mutex<Box<dyn InspectorTransport>>>,
        mut write_rx: mpsc::UnboundedReceiver<Request>,
        pending: Arc<RwLock<HashMap<u64, ReplySender>>>,
        connected: Arc<AtomicBool>,
    ) {
        while let Some(request) = write_rx.recv().await {
            let id = request.id;
            let mut transport = transport.lock().await;
            if let Err(e) = transport.write_message(&request).await {
                drop(transport);
                warn!("Inspector write failed for id {}: {}", id, e);
                if let Some(sender) = pending.write().await.remove(&id) {
                    let _ = sender.send(Err(Error::Transport(format!(
                        "failed to send request: {}",
                        e
                    ))));
                }
                connected.store(false, Ordering::SeqCst);
                break;
            }
        }
    }

    async fn reject_all_pending(pending: &Arc<RwLock<HashMap<u64, ReplySender>>>) {
        let slots: Vec<_> = pending.write().await.drain().collect();
        for (_, sender) in slots {
            let _ = sender.send(Err(Error::Transport("disconnected".to_string())));
        }
    }

    /// Send a command and await the correlated reply.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.send_with_timeout(method, params, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Send with an explicit deadline. A timed-out slot is reaped so the late
    /// reply (if any) is dropped instead of resolving a stranger; the
    /// connection itself stays usable.
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::NotConnected);
        }

        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let request = Request {
            id,
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);

        if self.write_tx.send(request).is_err() {
            self.pending.write().await.remove(&id);
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Transport(
                "connection closed before reply".to_string(),
            )),
            Err(_) => {
                self.pending.write().await.remove(&id);
                Err(Error::Timeout(format!(
                    "'{}' got no reply within {:?}",
                    method, timeout
                )))
            }
        }
    }

    /// Register a callback for a named inspector event. Register under
    /// [`WILDCARD_EVENT`] to observe every event.
    pub async fn on<F>(&self, event_name: &str, callback: F) -> HandlerId
    where
        F: Fn(InspectorEvent) + Send + Sync + 'static,
    {
        self.register(event_name, callback, false).await
    }

    /// Like `on`, but the callback is removed after its first invocation.
    pub async fn once<F>(&self, event_name: &str, callback: F) -> HandlerId
    where
        F: Fn(InspectorEvent) + Send + Sync + 'static,
    {
        self.register(event_name, callback, true).await
    }

    async fn register<F>(&self, event_name: &str, callback: F, once: bool) -> HandlerId
    where
        F: Fn(InspectorEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.handler_counter.fetch_add(1, Ordering::SeqCst));
        let mut registry = self.handlers.write().await;
        registry.entry(event_name.to_string()).or_default().push(EventHandler {
            id,
            once,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove every callback registered for `event_name`.
    pub async fn off(&self, event_name: &str) {
        self.handlers.write().await.remove(event_name);
    }

    /// Remove a single callback by the token `on`/`once` returned.
    pub async fn off_handler(&self, handler: HandlerId) {
        let mut registry = self.handlers.write().await;
        for list in registry.values_mut() {
            list.retain(|h| h.id != handler);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Tear the connection down. Every in-flight request is rejected with a
    /// transport error; subsequent `send`s fail with `NotConnected`.
    pub async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        Self::reject_all_pending(&self.pending).await;

        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.close().await {
            debug!("Inspector close handshake failed: {}", e);
        }
    }
}
