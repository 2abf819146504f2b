use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use stream_channel::{IncomingHandler, MessageSink, MessageSource, StreamMessage, SubscriptionId};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::error::{ConfigError, SupervisorError};
use crate::message::Delivery;
use crate::model::{FitModel, ModelRegistry};
use crate::processor::Processor;
use crate::publisher::ResultPublisher;
use crate::queue::{QueueSender, work_queue};
use crate::worker::{Worker, WorkerMonitor, WorkerState, WorkerStats};

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub alive: bool,
    pub state: WorkerState,
    pub config: WorkerConfig,
    pub stats: WorkerStats,
}

/// Source callback: decode each message and put it on the work queue.
struct QueueFeeder {
    queue: QueueSender,
    monitor: Arc<WorkerMonitor>,
}

#[async_trait]
impl IncomingHandler for QueueFeeder {
    async fn handle_incoming(&self, msg: StreamMessage) {
        self.monitor.record_received();
        let delivery = match Delivery::decode(msg.payload) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(id = %msg.id, channel = %msg.channel, error = %e, "rejecting undecodable message");
                self.monitor.record_rejected();
                return;
            }
        };
        debug!(id = %msg.id, envelopes = delivery.len(), "enqueueing delivery");
        if let Err(e) = self.queue.enqueue(delivery).await {
            warn!(id = %msg.id, error = %e, "could not enqueue delivery");
            self.monitor.record_rejected();
        }
    }
}

/// Handles of a started worker. The join handle lives separately so a
/// caller can wait on it without holding this lock; it is cleared only
/// once the task has actually exited.
struct Running {
    abort: AbortHandle,
    cancel: CancellationToken,
    subscription: Option<SubscriptionId>,
}

/// Owns one worker: its configuration, its channel handles and, once
/// started, its task.
pub struct Supervisor {
    config: Arc<WorkerConfig>,
    model: Arc<dyn FitModel>,
    source: Arc<dyn MessageSource>,
    sink: Arc<dyn MessageSink>,
    monitor: Arc<WorkerMonitor>,
    started: AtomicBool,
    running: Mutex<Option<Running>>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    /// Validate `config` and resolve its model. Nothing runs until
    /// [`Supervisor::start`].
    pub fn new(
        config: WorkerConfig,
        source: Arc<dyn MessageSource>,
        sink: Arc<dyn MessageSink>,
        registry: &ModelRegistry,
    ) -> Result<Self, ConfigError> {
        config.validate(registry)?;
        let model = registry
            .get(&config.model)
            .ok_or_else(|| ConfigError::UnknownModel(config.model.clone()))?;
        Ok(Self {
            config: Arc::new(config),
            model,
            source,
            sink,
            monitor: Arc::new(WorkerMonitor::new()),
            started: AtomicBool::new(false),
            running: Mutex::new(None),
            task: AsyncMutex::new(None),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Spawn the worker task, then subscribe to the input stream.
    /// A supervisor starts at most once.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SupervisorError::AlreadyStarted);
        }

        let (queue_tx, queue_rx) = work_queue(self.config.queue_capacity);
        let cancel = CancellationToken::new();
        let worker = Worker::new(
            Processor::new(self.config.clone(), self.model.clone()),
            ResultPublisher::new(self.sink.clone(), self.config.output.clone()),
            queue_rx,
            self.monitor.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(worker.run());

        let feeder = Arc::new(QueueFeeder {
            queue: queue_tx,
            monitor: self.monitor.clone(),
        });
        let subscription = match self.source.subscribe(&self.config.stream, feeder).await {
            Ok(id) => id,
            Err(source) => {
                cancel.cancel();
                let _ = task.await;
                return Err(SupervisorError::Subscribe {
                    channel: self.config.stream.clone(),
                    source,
                });
            }
        };
        info!(stream = %self.config.stream, %subscription, "worker subscribed");

        let abort = task.abort_handle();
        *self.task.lock().await = Some(task);
        *self.lock_running() = Some(Running {
            abort,
            cancel,
            subscription: Some(subscription),
        });
        Ok(())
    }

    pub fn status(&self) -> WorkerStatus {
        let alive = self
            .lock_running()
            .as_ref()
            .is_some_and(|running| !running.abort.is_finished());
        WorkerStatus {
            alive,
            state: self.monitor.state(),
            config: self.config.as_ref().clone(),
            stats: self.monitor.stats(),
        }
    }

    /// Stop the worker, waiting at most `shutdown_timeout_ms` when configured.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        match self.config.shutdown_timeout_ms {
            Some(ms) => self.shutdown_with_timeout(Duration::from_millis(ms)).await,
            None => self.stop(None, true).await,
        }
    }

    /// Stop the worker; if it has not exited within `timeout` it is aborted.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), SupervisorError> {
        self.stop(Some(timeout), true).await
    }

    /// Unsubscribe and let the worker finish everything already queued. The
    /// worker exits once the source has released its callback.
    pub async fn drain(&self) -> Result<(), SupervisorError> {
        let timeout = self.config.shutdown_timeout_ms.map(Duration::from_millis);
        self.stop(timeout, false).await
    }

    async fn stop(&self, timeout: Option<Duration>, cancel_worker: bool) -> Result<(), SupervisorError> {
        let (cancel, subscription) = match self.lock_running().as_mut() {
            Some(running) => (running.cancel.clone(), running.subscription.take()),
            None => {
                debug!("shutdown requested for a worker that was never started");
                return Ok(());
            }
        };

        if let Some(subscription) = subscription {
            if let Err(e) = self.source.unsubscribe(subscription).await {
                warn!(%subscription, error = %e, "unsubscribe failed");
            }
        }
        if cancel_worker {
            cancel.cancel();
        }

        // held until the task has exited, so a concurrent or repeated call
        // waits on the same task
        let mut slot = self.task.lock().await;
        let Some(task) = slot.as_mut() else {
            return Ok(());
        };
        let joined = match timeout {
            None => task.await,
            Some(limit) => match tokio::time::timeout(limit, &mut *task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.cancel();
                    task.abort();
                    let _ = (&mut *task).await;
                    *slot = None;
                    self.monitor.set_state(WorkerState::Stopped);
                    let ms = limit.as_millis() as u64;
                    warn!(timeout_ms = ms, "worker aborted after shutdown timeout");
                    return Err(SupervisorError::ShutdownTimeout(ms));
                }
            },
        };
        *slot = None;
        joined.map_err(|e| SupervisorError::Join(e.to_string()))?;
        info!(stream = %self.config.stream, "worker stopped");
        Ok(())
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
