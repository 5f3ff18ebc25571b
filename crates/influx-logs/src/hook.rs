// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Producer-facing handle of the batching worker.
//!
//! `fire` never waits on the network: it builds the point, queues it and
//! reports the outcome of the previous write. Write failures therefore surface
//! one call late, on whichever producer fires next.

use std::sync::Arc;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::batch::Batch;
use crate::client::{HttpClient, SinkClient};
use crate::config::Config;
use crate::errors::{CreationError, HookError, WriteError};
use crate::point::{build_point, DataPoint};
use crate::record::{Level, LogRecord};
use crate::worker::{BatchWorker, LastError, WorkerCommand, WorkerConfig};

/// Cloneable hook; every clone feeds the same worker.
#[derive(Clone, Debug)]
pub struct InfluxHook {
    measurement: Arc<str>,
    tags: Arc<[String]>,
    points_tx: mpsc::Sender<DataPoint>,
    commands_tx: mpsc::UnboundedSender<WorkerCommand>,
    last_error: LastError,
}

impl InfluxHook {
    /// Creates a hook writing to the InfluxDB instance at `config.url` and
    /// spawns its worker on the current tokio runtime.
    pub fn new(config: Config) -> Result<Self, CreationError> {
        let client = HttpClient::new(&config.http_config())?;
        Self::with_client(config, Arc::new(client))
    }

    /// Creates a hook writing through a pre-built sink client.
    pub fn with_client(config: Config, client: Arc<dyn SinkClient>) -> Result<Self, CreationError> {
        validate(&config)?;
        let runtime = Handle::try_current().map_err(|_| CreationError::NoRuntime)?;

        // The inbound buffer holds one batch worth of points; a full buffer is
        // what makes producers wait on a slow sink.
        let (points_tx, points_rx) = mpsc::channel(config.batch_size);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let last_error = LastError::default();

        let worker = BatchWorker::new(
            WorkerConfig {
                batch: Batch::new(
                    &config.database,
                    config.precision,
                    config.retention_policy.as_deref(),
                ),
                batch_size: config.batch_size,
                batch_interval: config.batch_interval,
                max_buffered_points: config.max_buffered_points,
            },
            client,
            points_rx,
            commands_rx,
            last_error.clone(),
        );
        runtime.spawn(worker.run());

        Ok(Self {
            measurement: Arc::from(config.measurement),
            tags: Arc::from(config.tags),
            points_tx,
            commands_tx,
            last_error,
        })
    }

    /// Queues a record and returns the result of the previous write.
    ///
    /// Waits only while the inbound buffer is full. Must not be called after
    /// [`InfluxHook::close`]; doing so yields [`HookError::Closed`].
    pub async fn fire(&self, record: &LogRecord) -> Result<(), HookError> {
        let point = self.build(record)?;
        self.points_tx
            .send(point)
            .await
            .map_err(|_| HookError::Closed)?;
        self.previous_result()
    }

    /// Synchronous [`InfluxHook::fire`] for callers without an async context.
    ///
    /// On a full buffer this blocks the calling thread, except on a
    /// current-thread runtime where blocking would also stall the worker; the
    /// point is rejected with [`HookError::BufferFull`] there instead.
    pub fn fire_blocking(&self, record: &LogRecord) -> Result<(), HookError> {
        let point = self.build(record)?;
        match self.points_tx.try_send(point) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => return Err(HookError::Closed),
            Err(TrySendError::Full(point)) => self.send_blocking(point)?,
        }
        self.previous_result()
    }

    /// Flushes everything queued so far and returns the write result.
    pub async fn flush(&self) -> Result<(), HookError> {
        self.request(WorkerCommand::Flush).await
    }

    /// Stops the worker after a final flush of every buffered point.
    ///
    /// Returns once the final write completed; its error, if any, is returned.
    pub async fn close(&self) -> Result<(), HookError> {
        debug!("INFLUX | Closing hook");
        self.request(WorkerCommand::Shutdown).await
    }

    /// Levels this hook wants to receive: all of them.
    #[must_use]
    pub fn levels(&self) -> &'static [Level] {
        &Level::ALL
    }

    #[must_use]
    pub fn last_error(&self) -> Option<WriteError> {
        self.last_error.get()
    }

    fn build(&self, record: &LogRecord) -> Result<DataPoint, HookError> {
        Ok(build_point(record, &self.measurement, &self.tags)?)
    }

    fn previous_result(&self) -> Result<(), HookError> {
        match self.last_error.get() {
            Some(e) => Err(HookError::Write(e)),
            None => Ok(()),
        }
    }

    fn send_blocking(&self, point: DataPoint) -> Result<(), HookError> {
        let result = match Handle::try_current() {
            Err(_) => self.points_tx.blocking_send(point),
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| self.points_tx.blocking_send(point))
            }
            Ok(_) => return Err(HookError::BufferFull),
        };
        result.map_err(|_| HookError::Closed)
    }

    async fn request(
        &self,
        command: fn(oneshot::Sender<Result<(), WriteError>>) -> WorkerCommand,
    ) -> Result<(), HookError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands_tx
            .send(command(reply_tx))
            .map_err(|_| HookError::Closed)?;
        reply_rx.await.map_err(|_| HookError::Closed)??;
        Ok(())
    }
}

fn validate(config: &Config) -> Result<(), CreationError> {
    if config.batch_size == 0 {
        return Err(CreationError::InvalidBatchSize);
    }
    if config.batch_interval.is_zero() {
        return Err(CreationError::InvalidBatchInterval);
    }
    if config.database.is_empty() {
        return Err(CreationError::EmptyDatabase);
    }
    if config.measurement.is_empty() {
        return Err(CreationError::EmptyMeasurement);
    }
    Ok(())
}
