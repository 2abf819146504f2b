use std::sync::Arc;

use stream_channel::MessageSink;
use tracing::trace;

use crate::error::PublishError;
use crate::message::{FitResult, Publication};

/// Sends the results of one processing pass to the output channel.
#[derive(Clone)]
pub struct ResultPublisher {
    sink: Arc<dyn MessageSink>,
    channel: String,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn MessageSink>, channel: impl Into<String>) -> Self {
        Self {
            sink,
            channel: channel.into(),
        }
    }

    /// Publish as one message: nothing for no results, the result itself for
    /// one, an ordered bundle for several. Returns how many results went out.
    pub async fn publish(&self, results: Vec<FitResult>) -> Result<usize, PublishError> {
        let Some(publication) = Publication::from_results(results) else {
            return Ok(0);
        };
        let count = publication.len();
        let payload = serde_json::to_value(&publication)?;
        self.sink
            .publish(&self.channel, payload)
            .await
            .map_err(|source| PublishError::Channel {
                channel: self.channel.clone(),
                source,
            })?;
        trace!(channel = %self.channel, count, "published results");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use std::sync::Mutex;
    use stream_channel::ChannelError;

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn publish(&self, channel: &str, payload: Value) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push((channel.to_string(), payload));
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl MessageSink for BrokenSink {
        async fn publish(&self, _channel: &str, _payload: Value) -> Result<(), ChannelError> {
            Err(ChannelError::Closed("sink is down".into()))
        }
    }

    fn result(tag: i64) -> FitResult {
        let mut data = Map::new();
        data.insert("tag".into(), json!(tag));
        FitResult {
            data,
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_nothing_sent_for_no_results() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = ResultPublisher::new(sink.clone(), "fits");
        assert_eq!(publisher.publish(vec![]).await.unwrap(), 0);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_single_and_bundle() {
        let sink = Arc::new(RecordingSink::default());
        let publisher = ResultPublisher::new(sink.clone(), "fits");
        assert_eq!(publisher.publish(vec![result(1)]).await.unwrap(), 1);
        assert_eq!(publisher.publish(vec![result(2), result(3)]).await.unwrap(), 2);

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "fits");
        assert_eq!(sent[0].1["data"]["tag"], json!(1));
        let bundle = sent[1].1.as_array().unwrap();
        assert_eq!(bundle[0]["data"]["tag"], json!(2));
        assert_eq!(bundle[1]["data"]["tag"], json!(3));
    }

    #[tokio::test]
    async fn test_sink_failure_is_reported() {
        let publisher = ResultPublisher::new(Arc::new(BrokenSink), "fits");
        let err = publisher.publish(vec![result(1)]).await.unwrap_err();
        assert!(matches!(err, PublishError::Channel { channel, .. } if channel == "fits"));
    }
}
