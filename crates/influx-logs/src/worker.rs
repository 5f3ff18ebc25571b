// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background worker that batches points and flushes them to the sink.
//!
//! A single task owns the batch, the flush timer and the sink client. Producers
//! never touch any of them: points reach the worker through a bounded channel
//! and control requests through a second one.
//!
//! ```text
//!   producers (fire) ──points──┐
//!                              v
//!   hook (flush/close) ──► BatchWorker ──write──► SinkClient
//!                              │
//!                              └──► LastError ◄── read by fire
//! ```
//!
//! A flush happens when the batch reaches `batch_size` points, when the
//! interval elapses, on an explicit flush request and once more on shutdown.
//! A failed write keeps the batch, so its points are retried by the next flush
//! together with whatever arrived in the meantime.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::batch::Batch;
use crate::client::SinkClient;
use crate::errors::WriteError;
use crate::point::DataPoint;

/// Outcome of the most recent write attempt, shared between the worker and
/// every hook handle.
#[derive(Clone, Debug, Default)]
pub struct LastError {
    inner: Arc<RwLock<Option<WriteError>>>,
}

impl LastError {
    #[must_use]
    pub fn get(&self) -> Option<WriteError> {
        #[allow(clippy::expect_used)]
        let guard = self.inner.read().expect("lock poisoned");
        guard.clone()
    }

    fn set(&self, result: &Result<(), WriteError>) {
        #[allow(clippy::expect_used)]
        let mut guard = self.inner.write().expect("lock poisoned");
        *guard = result.as_ref().err().cloned();
    }
}

#[derive(Debug)]
pub enum WorkerCommand {
    /// Flush whatever is buffered and reply with the write result.
    Flush(oneshot::Sender<Result<(), WriteError>>),
    /// Drain the inbound channel, flush one last time and stop.
    Shutdown(oneshot::Sender<Result<(), WriteError>>),
}

pub struct WorkerConfig {
    pub batch: Batch,
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub max_buffered_points: Option<usize>,
}

pub struct BatchWorker {
    client: Arc<dyn SinkClient>,
    batch: Batch,
    batch_size: usize,
    batch_interval: Duration,
    max_buffered_points: Option<usize>,
    points_rx: mpsc::Receiver<DataPoint>,
    commands_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    last_error: LastError,
}

impl BatchWorker {
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        client: Arc<dyn SinkClient>,
        points_rx: mpsc::Receiver<DataPoint>,
        commands_rx: mpsc::UnboundedReceiver<WorkerCommand>,
        last_error: LastError,
    ) -> Self {
        Self {
            client,
            batch: config.batch,
            batch_size: config.batch_size,
            batch_interval: config.batch_interval,
            max_buffered_points: config.max_buffered_points,
            points_rx,
            commands_rx,
            last_error,
        }
    }

    /// Runs the event loop until a shutdown request is served or every
    /// producer handle is gone.
    pub async fn run(mut self) {
        debug!(
            "INFLUX | Batch worker started (batch_size={}, batch_interval={:?})",
            self.batch_size, self.batch_interval
        );

        let mut ticker = interval_at(Instant::now() + self.batch_interval, self.batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                Some(command) = self.commands_rx.recv() => match command {
                    WorkerCommand::Flush(reply) => {
                        self.drain_ready();
                        let result = self.flush_and_clear().await;
                        if reply.send(result).is_err() {
                            debug!("INFLUX | Flush requester went away before the reply");
                        }
                    }
                    WorkerCommand::Shutdown(reply) => {
                        let result = self.shutdown().await;
                        if reply.send(result).is_err() {
                            error!("INFLUX | Failed to acknowledge shutdown - receiver dropped");
                        }
                        break;
                    }
                },

                // Ahead of points so a steady stream cannot hold off timed flushes
                _ = ticker.tick() => {
                    let _ = self.flush_and_clear().await;
                }

                point = self.points_rx.recv() => match point {
                    Some(point) => {
                        self.batch.add_point(point);
                        if self.batch.len() >= self.batch_size {
                            let _ = self.flush_and_clear().await;
                        }
                    }
                    None => {
                        debug!("INFLUX | All hook handles dropped, flushing remaining points");
                        let _ = self.flush_and_clear().await;
                        break;
                    }
                },
            }
        }

        debug!("INFLUX | Batch worker stopped");
    }

    /// Moves points that are already queued into the batch without waiting.
    fn drain_ready(&mut self) {
        while let Ok(point) = self.points_rx.try_recv() {
            self.batch.add_point(point);
        }
    }

    async fn shutdown(&mut self) -> Result<(), WriteError> {
        debug!("INFLUX | Batch worker shutting down");
        // Producers blocked on a full channel are released with an error,
        // everything already queued is still delivered.
        self.points_rx.close();
        while let Some(point) = self.points_rx.recv().await {
            self.batch.add_point(point);
        }
        self.flush_and_clear().await
    }

    async fn flush_and_clear(&mut self) -> Result<(), WriteError> {
        if self.batch.is_empty() {
            return Ok(());
        }

        let count = self.batch.len();
        debug!("INFLUX | Flushing {count} points");
        let result = self.client.write(&self.batch).await;
        self.last_error.set(&result);

        match &result {
            Ok(()) => {
                debug!("INFLUX | Successfully flushed {count} points");
                self.batch = self.batch.renew();
            }
            Err(e) => {
                error!("INFLUX | Failed to flush {count} points, keeping them for the next flush: {e}");
                if let Some(max) = self.max_buffered_points {
                    let dropped = self.batch.truncate_oldest(max);
                    if dropped > 0 {
                        warn!("INFLUX | Buffer over {max} points, dropped the {dropped} oldest");
                    }
                }
            }
        }

        result
    }
}
