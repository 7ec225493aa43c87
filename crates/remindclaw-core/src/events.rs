//! Event Broadcaster — fans out log / QR / stats events to live observers.
//!
//! Delivery is best-effort and never blocks the publisher: each observer owns
//! a bounded queue, a full queue drops the event for that observer only, and a
//! closed queue evicts the observer on the next publish. Publishing works on a
//! snapshot of the observer set, so observers may come and go concurrently.
//!
//! A bounded ring of recent events lets late joiners catch up on connect.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// Default per-observer queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
/// Default size of the recent-event ring.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// A structured event as observers receive it (JSON-tagged by `type`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    /// Free-text narrative line.
    Log { message: String },
    /// Pairing challenge, a PNG `data:` URL of the QR code.
    Qr { message: String },
    /// Per-agent snapshot for one weekday.
    AgentStats { data: AgentStatsPayload },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatsPayload {
    pub day: String,
    pub agents: BTreeMap<String, u64>,
}

impl Event {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log { message: message.into() }
    }

    pub fn qr(payload: impl Into<String>) -> Self {
        Self::Qr { message: payload.into() }
    }

    pub fn agent_stats(day: &str, agents: &BTreeMap<String, u64>) -> Self {
        Self::AgentStats {
            data: AgentStatsPayload {
                day: day.to_string(),
                agents: agents.clone(),
            },
        }
    }

    /// Serialize to the wire JSON shape.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

struct Inner {
    observers: Mutex<HashMap<u64, mpsc::Sender<Event>>>,
    history: Mutex<VecDeque<Event>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    history_capacity: usize,
}

/// Cheap-to-clone handle to the shared broadcaster.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<Inner>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY, DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(queue_capacity: usize, history_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                observers: Mutex::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
                history_capacity,
            }),
        }
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut observers) = self.inner.observers.lock() {
            observers.insert(id, tx);
        }
        tracing::debug!("👀 Observer {id} subscribed");
        Subscription {
            id,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// Remove an observer (heartbeat eviction, disconnect).
    pub fn unsubscribe(&self, id: u64) {
        remove_observer(&self.inner, id);
    }

    /// Deliver an event to every observer without waiting on any of them.
    pub fn publish(&self, event: Event) {
        if self.inner.history_capacity > 0
            && let Ok(mut history) = self.inner.history.lock()
        {
            history.push_back(event.clone());
            while history.len() > self.inner.history_capacity {
                history.pop_front();
            }
        }

        let snapshot: Vec<(u64, mpsc::Sender<Event>)> = match self.inner.observers.lock() {
            Ok(observers) => observers.iter().map(|(id, tx)| (*id, tx.clone())).collect(),
            Err(_) => return,
        };

        let mut closed = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::trace!("Observer {id} is lagging, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty()
            && let Ok(mut observers) = self.inner.observers.lock()
        {
            for id in closed {
                observers.remove(&id);
            }
        }
    }

    /// Publish a free-text log line.
    pub fn log(&self, message: impl Into<String>) {
        self.publish(Event::log(message));
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().map(|o| o.len()).unwrap_or(0)
    }

    /// Recent events, oldest first.
    pub fn history(&self) -> Vec<Event> {
        self.inner
            .history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_history(&self) {
        if let Ok(mut history) = self.inner.history.lock() {
            history.clear();
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_observer(inner: &Inner, id: u64) {
    if let Ok(mut observers) = inner.observers.lock()
        && observers.remove(&id).is_some()
    {
        tracing::debug!("👋 Observer {id} removed");
    }
}

/// Receiving end for one observer. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    owner: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the observer has been evicted.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.owner.upgrade() {
            remove_observer(&inner, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let log = Event::log("hello").to_json();
        assert_eq!(log, r#"{"type":"log","message":"hello"}"#);

        let mut agents = BTreeMap::new();
        agents.insert("Ana".to_string(), 2);
        let stats: serde_json::Value =
            serde_json::from_str(&Event::agent_stats("monday", &agents).to_json()).unwrap();
        assert_eq!(stats["type"], "agentStats");
        assert_eq!(stats["data"]["day"], "monday");
        assert_eq!(stats["data"]["agents"]["Ana"], 2);

        let qr: serde_json::Value = serde_json::from_str(&Event::qr("2@abc").to_json()).unwrap();
        assert_eq!(qr["type"], "qr");
    }

    #[tokio::test]
    async fn test_fan_out_to_all_observers() {
        let events = EventBroadcaster::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();
        assert_eq!(events.observer_count(), 2);

        events.log("one");
        assert_eq!(a.recv().await, Some(Event::log("one")));
        assert_eq!(b.recv().await, Some(Event::log("one")));
    }

    #[test]
    fn test_slow_observer_never_blocks() {
        let events = EventBroadcaster::with_capacity(2, 10);
        let mut slow = events.subscribe();
        for i in 0..10 {
            events.log(format!("msg {i}"));
        }
        // Only the first two fit; the rest were dropped for this observer.
        assert_eq!(slow.try_recv(), Some(Event::log("msg 0")));
        assert_eq!(slow.try_recv(), Some(Event::log("msg 1")));
        assert_eq!(slow.try_recv(), None);
        assert_eq!(events.observer_count(), 1);
    }

    #[test]
    fn test_dropped_subscription_is_removed() {
        let events = EventBroadcaster::new();
        let sub = events.subscribe();
        let keep = events.subscribe();
        drop(sub);
        assert_eq!(events.observer_count(), 1);
        events.unsubscribe(keep.id());
        assert_eq!(events.observer_count(), 0);
        events.log("nobody listening");
    }

    #[test]
    fn test_history_is_bounded() {
        let events = EventBroadcaster::with_capacity(4, 3);
        for i in 0..5 {
            events.log(format!("{i}"));
        }
        let history = events.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0], Event::log("2"));
        events.clear_history();
        assert!(events.history().is_empty());
    }
}
