use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ChannelError;
use crate::message::{StreamMessage, SubscriptionId};

/// A subscriber gets every message published on the channel it subscribed to.
#[async_trait]
pub trait IncomingHandler: Send + Sync {
    async fn handle_incoming(&self, msg: StreamMessage);
}

/// Subscribe-style side of a channel transport.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Register `handler` for every message arriving on `channel`.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn IncomingHandler>,
    ) -> Result<SubscriptionId, ChannelError>;

    /// Remove a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError>;
}

/// Publish-style side of a channel transport.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Hand `payload` to the transport for delivery on `channel`.
    /// No acknowledgement from subscribers is awaited.
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), ChannelError>;
}
