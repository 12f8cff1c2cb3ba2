//! In-process message bus.
//!
//! Publish/subscribe with MQTT-style topic filters (`+` matches one level,
//! a trailing `#` matches the rest). Delivery is at-most-once fan-out: a
//! message published while nobody matches is dropped, and a subscriber that
//! lags only affects its own (unbounded) queue.
//!
//! `Bus` handles are cheap clones sharing one subscription table, and the
//! underlying senders are thread-safe, so transport callbacks running on a
//! foreign thread can publish directly. Consumers drain their
//! [`Subscription`] from whatever task owns it — mutation of shared state
//! stays on the consumer's side of the channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("invalid topic filter '{0}': {1}")]
    InvalidFilter(String, &'static str),
}

/// A single message in flight on the bus.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

// ── Topic filters ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// `+` — exactly one topic level.
    SingleLevel,
    /// `#` — everything from here on (must be last).
    MultiLevel,
}

/// Parsed topic filter, e.g. `office/#` or `mcp/+/response/#`.
#[derive(Debug, Clone)]
pub struct TopicFilter {
    segments: Vec<Segment>,
}

impl TopicFilter {
    pub fn parse(filter: &str) -> Result<Self, BusError> {
        if filter.is_empty() {
            return Err(BusError::InvalidFilter(filter.to_string(), "empty filter"));
        }
        let raw: Vec<&str> = filter.split('/').collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, part) in raw.iter().enumerate() {
            let segment = match *part {
                "+" => Segment::SingleLevel,
                "#" => {
                    if i != raw.len() - 1 {
                        return Err(BusError::InvalidFilter(
                            filter.to_string(),
                            "'#' is only valid as the final level",
                        ));
                    }
                    Segment::MultiLevel
                }
                other => {
                    if other.contains('+') || other.contains('#') {
                        return Err(BusError::InvalidFilter(
                            filter.to_string(),
                            "wildcards must occupy a whole level",
                        ));
                    }
                    Segment::Literal(other.to_string())
                }
            };
            segments.push(segment);
        }
        Ok(Self { segments })
    }

    /// Whether `topic` matches this filter.
    pub fn matches(&self, topic: &str) -> bool {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut li = 0;
        for segment in &self.segments {
            match segment {
                Segment::MultiLevel => return true,
                Segment::SingleLevel => {
                    if li >= levels.len() {
                        return false;
                    }
                    li += 1;
                }
                Segment::Literal(expected) => {
                    if li >= levels.len() || levels[li] != expected {
                        return false;
                    }
                    li += 1;
                }
            }
        }
        li == levels.len()
    }
}

// ── Bus ──────────────────────────────────────────────────────────────────────

struct SubscriberEntry {
    id: u64,
    filter: TopicFilter,
    tx: mpsc::UnboundedSender<BusMessage>,
}

struct BusInner {
    subscribers: RwLock<Vec<SubscriberEntry>>,
    next_id: AtomicU64,
}

/// Shared handle to the in-process broker.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Publish `payload` on `topic`, fanning out to every matching subscriber.
    ///
    /// Returns the number of subscribers the message was delivered to.
    pub fn publish(&self, topic: &str, payload: Value) -> usize {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };

        let mut delivered = 0;
        let mut dead: Vec<u64> = Vec::new();
        {
            let subscribers = self.inner.subscribers.read().unwrap_or_else(|e| e.into_inner());
            for entry in subscribers.iter() {
                if entry.filter.matches(topic) {
                    if entry.tx.send(message.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push(entry.id);
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.inner.subscribers.write().unwrap_or_else(|e| e.into_inner());
            subscribers.retain(|entry| !dead.contains(&entry.id));
        }

        trace!(topic, delivered, "bus publish");
        delivered
    }

    /// Subscribe to every topic matching `filter`.
    pub fn subscribe(&self, filter: &str) -> Result<Subscription, BusError> {
        let filter = TopicFilter::parse(filter)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(SubscriberEntry { id, filter, tx });
        Ok(Subscription { rx })
    }
}

/// Receiving end of a subscription. Dropping it unsubscribes lazily (the
/// entry is removed on the next publish that hits it).
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Non-blocking drain helper for tests and batch consumers.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        self.rx.try_recv().ok()
    }
}
