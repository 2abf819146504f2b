//! The processor loop: dequeue, process, publish, repeat.
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::logger::FIT_REPORT_TARGET;
use crate::message::{Delivery, FitResult};
use crate::processor::{Processor, Step};
use crate::publisher::ResultPublisher;
use crate::queue::QueueReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Processing,
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Processing,
            _ => WorkerState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Processing => 1,
            WorkerState::Stopped => 2,
        }
    }
}

/// Point-in-time copy of the worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Messages that reached the source callback.
    pub received: u64,
    /// Messages that could not be decoded or enqueued.
    pub rejected: u64,
    /// Envelopes the processor has finished with, results published or not.
    pub processed: u64,
    pub produced: u64,
    pub skipped: u64,
    pub publish_failures: u64,
}

/// State and counters shared between the worker task, the source callback
/// and whoever asks for status.
#[derive(Debug, Default)]
pub struct WorkerMonitor {
    state: AtomicU8,
    received: AtomicU64,
    rejected: AtomicU64,
    processed: AtomicU64,
    produced: AtomicU64,
    skipped: AtomicU64,
    publish_failures: AtomicU64,
}

impl WorkerMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Acquire),
            produced: self.produced.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Worker {
    processor: Processor,
    publisher: ResultPublisher,
    queue: QueueReceiver,
    monitor: Arc<WorkerMonitor>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        processor: Processor,
        publisher: ResultPublisher,
        queue: QueueReceiver,
        monitor: Arc<WorkerMonitor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            processor,
            publisher,
            queue,
            monitor,
            cancel,
        }
    }

    /// Run until cancelled or until every queue sender is dropped. A
    /// delivery already being processed is always finished first.
    pub async fn run(mut self) {
        let config = self.processor.config();
        info!(
            stream = %config.stream,
            output = %config.output,
            model = %config.model,
            "worker started"
        );
        self.monitor.set_state(WorkerState::Idle);
        loop {
            let delivery = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("worker cancelled");
                    break;
                }
                next = self.queue.dequeue() => match next {
                    Some(delivery) => delivery,
                    None => {
                        info!("work queue closed, worker exiting");
                        break;
                    }
                },
            };
            self.monitor.set_state(WorkerState::Processing);
            self.handle(delivery).await;
            self.monitor.set_state(WorkerState::Idle);
        }
        self.queue.close();
        self.monitor.set_state(WorkerState::Stopped);
    }

    async fn handle(&mut self, delivery: Delivery) {
        let steps = self.processor.process_delivery(&delivery);
        let count = steps.len() as u64;
        let mut results = Vec::new();
        for step in steps {
            match step {
                Step::Produced(result) => {
                    self.monitor.produced.fetch_add(1, Ordering::Relaxed);
                    report(&self.processor, &result);
                    results.push(result);
                }
                Step::Skipped(reason) => {
                    self.monitor.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(%reason, "envelope skipped");
                }
            }
        }

        if let Err(e) = self.publisher.publish(results).await {
            self.monitor.publish_failures.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "dropping results that could not be published");
        }
        self.monitor.processed.fetch_add(count, Ordering::Release);
    }
}

/// One JSON report line per fitted result.
fn report(processor: &Processor, result: &FitResult) {
    let stats = result.metadata.get("fit_statistics").cloned().unwrap_or_default();
    tracing::event!(
        target: FIT_REPORT_TARGET,
        tracing::Level::INFO,
        model = %processor.config().model,
        output = %processor.config().output,
        run_key = %processor.run_key().cloned().unwrap_or_default(),
        n_points = stats["n_points"].as_u64().unwrap_or_default(),
        chi_square = stats["chi_square"].as_f64().unwrap_or(f64::NAN),
        r_squared = stats["r_squared"].as_f64().unwrap_or(f64::NAN),
    );
}
