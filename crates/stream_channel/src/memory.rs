use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, trace};

use crate::channel::{IncomingHandler, MessageSink, MessageSource};
use crate::error::ChannelError;
use crate::message::{StreamMessage, SubscriptionId};

struct Subscriber {
    id: SubscriptionId,
    handler: Arc<dyn IncomingHandler>,
}

/// In-process publish/subscribe bus.
///
/// Every `publish` calls the handlers subscribed to that channel in
/// subscription order and waits for each of them, so a subscriber that
/// applies back-pressure slows the publisher down.
#[derive(Clone)]
pub struct MemoryBus {
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
    published: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            published: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Number of subscribers currently registered on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .get(channel)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Total number of messages published since creation.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Reject every further publish and subscribe.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for MemoryBus {
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn IncomingHandler>,
    ) -> Result<SubscriptionId, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed(channel.to_string()));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { id, handler });
        debug!(%id, channel, "subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError> {
        for mut entry in self.subscribers.iter_mut() {
            entry.value_mut().retain(|s| s.id != id);
        }
        self.subscribers.retain(|_, subs| !subs.is_empty());
        debug!(%id, "unsubscribed");
        Ok(())
    }
}

#[async_trait]
impl MessageSink for MemoryBus {
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed(channel.to_string()));
        }
        // never hold a map guard across the handler awaits
        let handlers: Vec<Arc<dyn IncomingHandler>> = match self.subscribers.get(channel) {
            Some(subs) => subs.iter().map(|s| s.handler.clone()).collect(),
            None => vec![],
        };
        self.published.fetch_add(1, Ordering::Relaxed);
        trace!(channel, subscribers = handlers.len(), "publishing");

        let msg = StreamMessage::new(channel, payload);
        for handler in handlers {
            handler.handle_incoming(msg.clone()).await;
        }
        Ok(())
    }
}
