//! Event fan-out to registered listeners.
//!
//! Every listener owns a bounded queue drained by its own task, so a slow
//! listener only ever delays itself and always sees events in wire order.
//! The reader never waits on a listener: a full queue drops the event.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tracing::{error, trace, warn};

use crate::{
    connection::{ConnectionState, DisconnectReason},
    event::{EslEvent, EslEventType},
};

/// Callbacks for unsolicited events on an inbound connection.
///
/// Calls for one listener are strictly sequential. A panic inside a callback
/// is caught and logged; the listener keeps receiving later events.
#[async_trait]
pub trait EventListener: Send + Sync + 'static {
    async fn on_event(&self, event: EslEvent);

    /// Called once, after every event queued before the disconnect.
    async fn on_disconnect(&self, _reason: DisconnectReason) {}
}

/// Which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    /// Events whose type is in the list.
    Types(Vec<EslEventType>),
    /// Events whose `Event-Name`, or `Event-Subclass` for `CUSTOM` events,
    /// equals the string.
    Named(String),
}

impl EventFilter {
    pub fn matches(&self, event: &EslEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Types(types) => {
                types.contains(&EslEventType::All)
                    || event
                        .event_type()
                        .is_some_and(|t| types.contains(&t))
            }
            EventFilter::Named(name) => {
                event.event_name() == Some(name.as_str())
                    || event.event_subclass() == Some(name.as_str())
            }
        }
    }
}

impl From<EslEventType> for EventFilter {
    fn from(event_type: EslEventType) -> Self {
        EventFilter::Types(vec![event_type])
    }
}

/// Handle returned by [`EslClient::add_listener`](crate::EslClient::add_listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Entry {
    id: ListenerId,
    filter: EventFilter,
    tx: mpsc::Sender<EslEvent>,
}

struct RegistryInner {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Listener set of one connection.
pub(crate) struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
    queue_size: usize,
    dropped: AtomicU64,
    closed: Arc<OnceLock<DisconnectReason>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field(
                "listeners",
                &self
                    .lock()
                    .entries
                    .len(),
            )
            .field("dropped", &self.dropped_count())
            .finish()
    }
}

impl ListenerRegistry {
    pub(crate) fn new(queue_size: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 0,
                entries: Vec::new(),
            }),
            queue_size: queue_size.max(1),
            dropped: AtomicU64::new(0),
            closed: Arc::new(OnceLock::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a queue; returns its id and the receiving end.
    ///
    /// After [`close`](Self::close) the queue is created already closed.
    fn register(&self, filter: EventFilter) -> (ListenerId, mpsc::Receiver<EslEvent>) {
        let (tx, rx) = mpsc::channel(self.queue_size);
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        if self
            .closed
            .get()
            .is_none()
        {
            inner
                .entries
                .push(Entry { id, filter, tx });
        }
        (id, rx)
    }

    /// Register a callback listener driven by its own task.
    pub(crate) fn add_listener(&self, filter: EventFilter, listener: Arc<dyn EventListener>) -> ListenerId {
        let (id, rx) = self.register(filter);
        tokio::spawn(listener_worker(id, listener, rx, self.closed.clone()));
        id
    }

    /// Register a queue read directly by an [`EslEventStream`].
    pub(crate) fn add_stream(
        &self,
        filter: EventFilter,
        state_rx: watch::Receiver<ConnectionState>,
    ) -> EslEventStream {
        let (id, rx) = self.register(filter);
        EslEventStream { id, rx, state_rx }
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let before = inner
            .entries
            .len();
        inner
            .entries
            .retain(|e| e.id != id);
        before
            != inner
                .entries
                .len()
    }

    /// Offer `event` to every matching listener without waiting.
    pub(crate) fn dispatch(&self, event: &EslEvent) {
        let mut inner = self.lock();
        inner
            .entries
            .retain(|entry| {
                if !entry
                    .filter
                    .matches(event)
                {
                    return true;
                }
                match entry
                    .tx
                    .try_send(event.clone())
                {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        let total = self
                            .dropped
                            .fetch_add(1, Ordering::Relaxed)
                            + 1;
                        warn!(
                            "[DISPATCH] {} queue full, dropping {} ({} dropped so far)",
                            entry.id,
                            event
                                .event_name()
                                .unwrap_or("event"),
                            total
                        );
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        trace!("[DISPATCH] {} gone, unregistering", entry.id);
                        false
                    }
                }
            });
    }

    /// Close every queue. Workers drain what is queued, then see
    /// `on_disconnect(reason)` once; streams end.
    pub(crate) fn close(&self, reason: DisconnectReason) {
        if self
            .closed
            .set(reason)
            .is_err()
        {
            return;
        }
        self.lock()
            .entries
            .clear();
    }

    pub(crate) fn dropped_count(&self) -> u64 {
        self.dropped
            .load(Ordering::Relaxed)
    }
}

async fn listener_worker(
    id: ListenerId,
    listener: Arc<dyn EventListener>,
    mut rx: mpsc::Receiver<EslEvent>,
    closed: Arc<OnceLock<DisconnectReason>>,
) {
    while let Some(event) = rx
        .recv()
        .await
    {
        let call = AssertUnwindSafe(listener.on_event(event));
        if call
            .catch_unwind()
            .await
            .is_err()
        {
            error!("[DISPATCH] {} panicked in on_event", id);
        }
    }

    // Sender dropped: either removed by the application or the connection ended.
    if let Some(reason) = closed.get() {
        let call = AssertUnwindSafe(listener.on_disconnect(reason.clone()));
        if call
            .catch_unwind()
            .await
            .is_err()
        {
            error!("[DISPATCH] {} panicked in on_disconnect", id);
        }
    }
}

/// Stream of events matching one filter (!Clone).
///
/// Ends when the connection closes. Dropping it unregisters the queue on the
/// next dispatch.
pub struct EslEventStream {
    id: ListenerId,
    rx: mpsc::Receiver<EslEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl fmt::Debug for EslEventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EslEventStream")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl EslEventStream {
    /// Next event, or `None` once the connection is closed and the queue is drained.
    pub async fn recv(&mut self) -> Option<EslEvent> {
        self.rx
            .recv()
            .await
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self
            .state_rx
            .borrow()
    }
}

impl futures_util::Stream for EslEventStream {
    type Item = EslEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
    }
}
