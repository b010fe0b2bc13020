//! Conversation session client.
//!
//! This is the main entry point for SDK consumers. A [`ChatSession`] owns
//! one logical conversation's WebSocket, reconnects with exponential
//! backoff when the transport drops, buffers outbound intents while
//! offline, and fans inbound events out to registered handlers.
//!
//! ## Error surface
//!
//! No operation on this type returns an error. Connectivity is observed
//! through the connect/disconnect handler channels and [`is_connected`];
//! transport failures feed the reconnect policy instead of the caller.
//!
//! ## Reconnection
//!
//! A lost transport is retried at 1s, 2s, 4s, 8s and 16s. After five
//! failed attempts the session stops and waits for an explicit
//! [`connect`]; a successful open resets the schedule.
//!
//! [`connect`]: ChatSession::connect
//! [`is_connected`]: ChatSession::is_connected

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tokio::time::Duration;

use crate::event::InboundEvent;
use crate::transport::{Connect, Transport, WsConnector};
use crate::wire::OutboundIntent;

/// Delay before the first reconnect attempt; doubles per attempt.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Reconnect attempts per connect cycle before the session gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Characters escaped when the conversation id is embedded in the
/// endpoint path.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Configuration for a conversation session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Origin of the hosting deployment, e.g. `https://carvoy.example`.
    /// The WebSocket scheme mirrors the origin scheme (`https`/`wss` →
    /// `wss`, anything else → `ws`).
    pub origin: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { origin: "http://127.0.0.1:8000".to_string() }
    }
}

type MessageHandler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;
type LifecycleHandler = Arc<dyn Fn() + Send + Sync>;

/// Connection lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Open,
    ReconnectScheduled,
    Closed,
}

/// Ordered handler registry. Insertion order is dispatch order.
struct Registry<H> {
    next_id: u64,
    entries: Vec<(u64, H)>,
}

impl<H: Clone> Registry<H> {
    fn insert(&mut self, handler: H) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, handler));
        id
    }

    fn remove(&mut self, id: u64) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    fn snapshot(&self) -> Vec<H> {
        self.entries.iter().map(|(_, handler)| handler.clone()).collect()
    }
}

impl<H> Default for Registry<H> {
    fn default() -> Self {
        Self { next_id: 0, entries: Vec::new() }
    }
}

/// Capability to remove a registered handler.
///
/// [`cancel`](Subscription::cancel) is idempotent. Dropping the
/// subscription without cancelling leaves the handler registered for the
/// lifetime of the session.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn cancel(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

struct State {
    conversation_id: Option<String>,
    phase: Phase,
    closed_intentionally: bool,
    /// Failed opens since the last successful one (or explicit connect).
    attempts: u32,
    /// Bumped by `disconnect`; stale drivers and timers check it before
    /// touching the session.
    epoch: u64,
    writer: Option<UnboundedSender<String>>,
    buffer: VecDeque<OutboundIntent>,
    driver: Option<AbortHandle>,
    reconnect: Option<AbortHandle>,
    message_handlers: Registry<MessageHandler>,
    connect_handlers: Registry<LifecycleHandler>,
    disconnect_handlers: Registry<LifecycleHandler>,
}

impl State {
    fn new() -> Self {
        Self {
            conversation_id: None,
            phase: Phase::Idle,
            closed_intentionally: false,
            attempts: 0,
            epoch: 0,
            writer: None,
            buffer: VecDeque::new(),
            driver: None,
            reconnect: None,
            message_handlers: Registry::default(),
            connect_handlers: Registry::default(),
            disconnect_handlers: Registry::default(),
        }
    }
}

struct Inner {
    config: SessionConfig,
    connector: Arc<dyn Connect>,
    state: Mutex<State>,
}

/// Client for one logical conversation.
///
/// Cloning yields another handle to the same session; construct one
/// session per active conversation view and pass it to the consumers that
/// need it. All methods must be called from within a tokio runtime.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

impl ChatSession {
    /// Session backed by a real WebSocket transport.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector::new()))
    }

    /// Session backed by a caller-supplied connector. This is the seam
    /// test harnesses and alternative transports plug into.
    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connect>) -> Self {
        Self {
            inner: Arc::new(Inner { config, connector, state: Mutex::new(State::new()) }),
        }
    }

    /// Open the transport for `conversation_id`.
    ///
    /// No-op while a transport is open or opening. A pending reconnect is
    /// cancelled and replaced by an immediate attempt with a fresh attempt
    /// counter. Open failures never surface here; they run the reconnect
    /// policy and are visible through disconnect handlers.
    pub fn connect(&self, conversation_id: &str) {
        let url = endpoint(&self.inner.config.origin, conversation_id);
        let epoch = {
            let mut s = self.inner.state.lock();
            if matches!(s.phase, Phase::Connecting | Phase::Open) {
                return;
            }
            if let Some(timer) = s.reconnect.take() {
                timer.abort();
            }
            s.conversation_id = Some(conversation_id.to_string());
            s.closed_intentionally = false;
            s.attempts = 0;
            s.phase = Phase::Connecting;
            s.epoch
        };
        spawn_driver(&self.inner, epoch, url);
    }

    /// Close the transport and stop all reconnection until the next
    /// explicit [`connect`](ChatSession::connect). Idempotent.
    ///
    /// Intents already accepted into the outbound buffer are kept and
    /// flushed on the next successful open.
    pub fn disconnect(&self) {
        let mut s = self.inner.state.lock();
        s.closed_intentionally = true;
        s.epoch += 1;
        s.attempts = 0;
        s.writer = None;
        if let Some(timer) = s.reconnect.take() {
            timer.abort();
        }
        if let Some(driver) = s.driver.take() {
            driver.abort();
        }
        s.phase = Phase::Closed;
    }

    /// Send chat text. No-op when `text` is empty after trimming.
    pub fn send_message(&self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        self.send(OutboundIntent::Message { message: trimmed.to_string() });
    }

    /// Send the local participant's typing state.
    pub fn send_typing(&self, is_typing: bool) {
        self.send(OutboundIntent::Typing { is_typing });
    }

    /// Acknowledge received messages as read. No-op when `message_ids` is
    /// empty.
    pub fn send_read_receipt(&self, message_ids: &[i64]) {
        if message_ids.is_empty() {
            return;
        }
        self.send(OutboundIntent::Read { message_ids: message_ids.to_vec() });
    }

    /// Shared send path: transmit now if a transport is open, otherwise
    /// queue for the next open. Queued intents are never reordered,
    /// deduplicated or dropped.
    fn send(&self, intent: OutboundIntent) {
        let mut s = self.inner.state.lock();
        send_or_buffer(&mut s, intent);
    }

    /// Register a handler for inbound events. Handlers run in
    /// registration order; a panicking handler is logged and does not
    /// suppress the ones after it.
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let id = self.inner.state.lock().message_handlers.insert(Arc::new(handler));
        self.subscription(move |s| s.message_handlers.remove(id))
    }

    /// Register a handler invoked after every successful transport open,
    /// once the outbound buffer has been flushed.
    pub fn on_connect<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.state.lock().connect_handlers.insert(Arc::new(handler));
        self.subscription(move |s| s.connect_handlers.remove(id))
    }

    /// Register a handler invoked on every transport loss, including
    /// failed reconnect attempts. Not invoked for an intentional
    /// [`disconnect`](ChatSession::disconnect).
    pub fn on_disconnect<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.state.lock().disconnect_handlers.insert(Arc::new(handler));
        self.subscription(move |s| s.disconnect_handlers.remove(id))
    }

    /// True iff a transport is currently open and healthy. False while
    /// connecting, reconnecting or closed.
    pub fn is_connected(&self) -> bool {
        let s = self.inner.state.lock();
        s.phase == Phase::Open && s.writer.is_some()
    }

    fn subscription<F>(&self, remove: F) -> Subscription
    where
        F: FnOnce(&mut State) + Send + 'static,
    {
        let inner = Arc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    remove(&mut inner.state.lock());
                }
            })),
        }
    }
}

/// Derive the transport endpoint from the deployment origin and the
/// conversation id, mirroring the origin's secure/insecure scheme.
fn endpoint(origin: &str, conversation_id: &str) -> String {
    let (scheme, host) = split_origin(origin);
    let id = utf8_percent_encode(conversation_id, PATH_SEGMENT);
    format!("{scheme}://{host}/ws/chat/{id}/")
}

fn split_origin(origin: &str) -> (&'static str, &str) {
    let origin = origin.trim_end_matches('/');
    if let Some(host) = origin.strip_prefix("https://") {
        ("wss", host)
    } else if let Some(host) = origin.strip_prefix("wss://") {
        ("wss", host)
    } else if let Some(host) = origin.strip_prefix("http://") {
        ("ws", host)
    } else if let Some(host) = origin.strip_prefix("ws://") {
        ("ws", host)
    } else {
        ("ws", origin)
    }
}

fn send_or_buffer(s: &mut State, intent: OutboundIntent) {
    if let Some(writer) = &s.writer {
        match serde_json::to_string(&intent) {
            Ok(json) => {
                if writer.send(json).is_err() {
                    // The transport died before its close was observed;
                    // keep the intent for the next connection.
                    s.writer = None;
                    s.buffer.push_back(intent);
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode outbound frame"),
        }
    } else {
        s.buffer.push_back(intent);
    }
}

fn spawn_driver(inner: &Arc<Inner>, epoch: u64, url: String) {
    let task = tokio::spawn(drive(inner.clone(), epoch, url));
    let mut s = inner.state.lock();
    if s.epoch == epoch {
        s.driver = Some(task.abort_handle());
    } else {
        // A disconnect won the race; the driver must not run.
        task.abort();
    }
}

/// One connect cycle: open the transport, flush the buffer, pump inbound
/// frames, and hand transport loss to the reconnect policy.
async fn drive(inner: Arc<Inner>, epoch: u64, url: String) {
    tracing::debug!(%url, "opening conversation transport");
    let transport = match inner.connector.connect(&url).await {
        Ok(transport) => transport,
        Err(e) => {
            tracing::warn!(error = %e, "transport open failed");
            transport_down(&inner, epoch);
            return;
        }
    };

    let Transport { outbound, mut inbound } = transport;

    {
        let mut s = inner.state.lock();
        if s.epoch != epoch || s.closed_intentionally {
            // A disconnect raced the open; dropping the channel ends
            // the transport.
            return;
        }
        s.phase = Phase::Open;
        s.attempts = 0;
        s.writer = Some(outbound);
        // Flush intents queued while offline, oldest first. The writer is
        // live again, so each re-enters the send path and transmits
        // immediately.
        let queued: Vec<OutboundIntent> = s.buffer.drain(..).collect();
        for intent in queued {
            send_or_buffer(&mut s, intent);
        }
    }
    fire_lifecycle(&inner, epoch, "connect", |s| &s.connect_handlers);

    while let Some(frame) = inbound.recv().await {
        if inner.state.lock().epoch != epoch {
            return;
        }
        match serde_json::from_str::<InboundEvent>(&frame) {
            Ok(event) => dispatch_message(&inner, epoch, &event),
            Err(e) => tracing::debug!(error = %e, "discarding unparseable frame"),
        }
    }

    transport_down(&inner, epoch);
}

/// Transport loss (failed open or closed connection): notify disconnect
/// handlers, then schedule the next attempt if the budget allows.
fn transport_down(inner: &Arc<Inner>, epoch: u64) {
    {
        let mut s = inner.state.lock();
        if s.epoch != epoch || s.closed_intentionally {
            return;
        }
        s.writer = None;
        s.phase = Phase::Idle;
    }

    fire_lifecycle(inner, epoch, "disconnect", |s| &s.disconnect_handlers);

    let mut s = inner.state.lock();
    if s.epoch != epoch || s.closed_intentionally || s.phase != Phase::Idle {
        // A handler (or a racing caller) already moved the session on.
        return;
    }
    s.attempts += 1;
    if s.attempts > MAX_RECONNECT_ATTEMPTS {
        tracing::warn!(
            attempts = MAX_RECONNECT_ATTEMPTS,
            "reconnect budget exhausted; waiting for an explicit connect"
        );
        return;
    }
    let delay = RECONNECT_BASE_DELAY * 2u32.pow(s.attempts - 1);
    tracing::info!(
        attempt = s.attempts,
        delay_ms = delay.as_millis() as u64,
        "scheduling reconnect"
    );
    s.phase = Phase::ReconnectScheduled;
    let timer_inner = inner.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        retry(&timer_inner, epoch);
    });
    s.reconnect = Some(timer.abort_handle());
}

/// A reconnect timer fired. Revalidate before acting: a disconnect or an
/// explicit connect may have won the race after the timer became
/// unabortable.
fn retry(inner: &Arc<Inner>, epoch: u64) {
    let url = {
        let mut s = inner.state.lock();
        if s.epoch != epoch || s.closed_intentionally || s.phase != Phase::ReconnectScheduled {
            return;
        }
        s.reconnect = None;
        let Some(id) = s.conversation_id.clone() else {
            s.phase = Phase::Idle;
            return;
        };
        s.phase = Phase::Connecting;
        endpoint(&inner.config.origin, &id)
    };
    // Spawned separately so aborting the timer task cannot kill a
    // connect attempt that already started.
    spawn_driver(inner, epoch, url);
}

fn fire_lifecycle(
    inner: &Arc<Inner>,
    epoch: u64,
    kind: &str,
    pick: fn(&State) -> &Registry<LifecycleHandler>,
) {
    let handlers = {
        let s = inner.state.lock();
        if s.epoch != epoch {
            return;
        }
        pick(&s).snapshot()
    };
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler())).is_err() {
            tracing::error!(kind, "lifecycle handler panicked");
        }
    }
}

fn dispatch_message(inner: &Arc<Inner>, epoch: u64, event: &InboundEvent) {
    let handlers = {
        let s = inner.state.lock();
        if s.epoch != epoch {
            return;
        }
        s.message_handlers.snapshot()
    };
    for handler in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            tracing::error!("message handler panicked");
        }
    }
}
