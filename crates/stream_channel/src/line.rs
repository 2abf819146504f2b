//! Newline-delimited JSON transport over any async reader / writer.
//!
//! Every input line is one message. A line shaped like
//! `{"channel": "...", "payload": ...}` is delivered only when its channel
//! matches the subscription; any other JSON value is delivered as-is on the
//! subscribed channel. Output lines always use the wrapped form.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, trace, warn};

use crate::channel::{IncomingHandler, MessageSink, MessageSource};
use crate::error::ChannelError;
use crate::message::{StreamMessage, SubscriptionId};

type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Reads messages from a line-oriented input. Only one subscription can
/// own the input at a time.
pub struct LineSource {
    reader: Mutex<Option<BoxedReader>>,
    readers: DashMap<SubscriptionId, CancellationToken>,
    next_id: AtomicU64,
    finished: CancellationToken,
}

impl LineSource {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
    {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            readers: DashMap::new(),
            next_id: AtomicU64::new(1),
            finished: CancellationToken::new(),
        }
    }

    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }

    /// Resolves once the input reached end of file or the reader stopped.
    pub async fn wait_until_finished(&self) {
        self.finished.cancelled().await
    }
}

/// Turn one input line into a message for `channel`, or `None` when the
/// line is addressed to another channel.
fn decode_line(channel: &str, line: &str) -> Result<Option<StreamMessage>, ChannelError> {
    let value: Value = serde_json::from_str(line)?;
    if let Value::Object(map) = &value {
        if let (Some(Value::String(target)), Some(payload)) = (map.get("channel"), map.get("payload")) {
            if map.len() == 2 {
                if target != channel {
                    return Ok(None);
                }
                return Ok(Some(StreamMessage::new(channel, payload.clone())));
            }
        }
    }
    Ok(Some(StreamMessage::new(channel, value)))
}

#[async_trait]
impl MessageSource for LineSource {
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn IncomingHandler>,
    ) -> Result<SubscriptionId, ChannelError> {
        let reader = self.reader.lock().await.take().ok_or_else(|| {
            ChannelError::InvalidState("line input already has a subscriber".to_string())
        })?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let stop = CancellationToken::new();
        self.readers.insert(id, stop.clone());

        let finished = self.finished.clone();
        let channel = channel.to_string();
        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => {
                        info!(%id, "line reader received stop signal");
                        break;
                    }
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match decode_line(&channel, &line) {
                                Ok(Some(msg)) => handler.handle_incoming(msg).await,
                                Ok(None) => trace!(channel = %channel, "line addressed to another channel"),
                                Err(err) => warn!("❌ Failed to parse incoming line: {}", err),
                            }
                        }
                        Ok(None) => {
                            info!(channel = %channel, "line input ended");
                            break;
                        }
                        Err(err) => {
                            error!("line input failed: {}", err);
                            break;
                        }
                    }
                }
            }
            finished.cancel();
        });
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChannelError> {
        if let Some((_, stop)) = self.readers.remove(&id) {
            stop.cancel();
        }
        Ok(())
    }
}

/// Writes every published message as one JSON line.
pub struct LineSink {
    writer: Mutex<BoxedWriter>,
}

impl LineSink {
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl MessageSink for LineSink {
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), ChannelError> {
        let mut line = serde_json::to_string(&json!({ "channel": channel, "payload": payload }))?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
    use tokio::time::timeout;

    struct Forward(UnboundedSender<StreamMessage>);

    #[async_trait]
    impl IncomingHandler for Forward {
        async fn handle_incoming(&self, msg: StreamMessage) {
            let _ = self.0.send(msg);
        }
    }

    #[test]
    fn test_decode_bare_and_wrapped_lines() {
        let bare = decode_line("scans", r#"{"payload": {"a": 1}}"#).unwrap().unwrap();
        assert_eq!(bare.payload, json!({"payload": {"a": 1}}));

        let wrapped = decode_line("scans", r#"{"channel": "scans", "payload": [1, 2]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(wrapped.payload, json!([1, 2]));

        let elsewhere = decode_line("scans", r#"{"channel": "other", "payload": 1}"#).unwrap();
        assert!(elsewhere.is_none());

        assert!(decode_line("scans", "not json").is_err());
    }

    #[tokio::test]
    async fn test_line_source_delivers_and_finishes() {
        let input = "{\"a\": 1}\n\nnot json\n{\"channel\": \"x\", \"payload\": 5}\n{\"b\": 2}\n";
        let source = LineSource::new(BufReader::new(input.as_bytes()));
        let (tx, mut rx) = unbounded_channel();
        source.subscribe("scans", Arc::new(Forward(tx))).await.unwrap();

        timeout(Duration::from_secs(2), source.wait_until_finished())
            .await
            .expect("reader should reach end of input");

        assert_eq!(rx.recv().await.unwrap().payload, json!({"a": 1}));
        assert_eq!(rx.recv().await.unwrap().payload, json!({"b": 2}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_line_source_single_subscriber() {
        let source = LineSource::new(BufReader::new("".as_bytes()));
        let (tx, _rx) = unbounded_channel();
        source.subscribe("a", Arc::new(Forward(tx.clone()))).await.unwrap();
        let err = source.subscribe("b", Arc::new(Forward(tx))).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_line_sink_writes_wrapped_lines() {
        let (client, server) = tokio::io::duplex(1024);
        let sink = LineSink::new(client);
        sink.publish("fits", json!({"y": [1.0]})).await.unwrap();

        let mut lines = BufReader::new(server).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, json!({"channel": "fits", "payload": {"y": [1.0]}}));
    }
}
