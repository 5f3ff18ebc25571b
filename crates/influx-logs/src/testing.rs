// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory sink used by tests and by applications that want to inspect what
//! the hook would have written.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::batch::Batch;
use crate::client::SinkClient;
use crate::errors::WriteError;
use crate::point::DataPoint;

#[derive(Debug, Default)]
pub struct RecordingClient {
    writes: Mutex<Vec<Vec<DataPoint>>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    delay_ms: AtomicU64,
}

impl RecordingClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// While failing, every write started is rejected and nothing is recorded.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every write take `delay` before it completes, like a slow server.
    pub fn set_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Points of every successful write, in write order.
    #[must_use]
    pub fn writes(&self) -> Vec<Vec<DataPoint>> {
        #[allow(clippy::expect_used)]
        let writes = self.writes.lock().expect("lock poisoned");
        writes.clone()
    }

    /// Number of write calls, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkClient for RecordingClient {
    async fn write(&self, batch: &Batch) -> Result<(), WriteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing.load(Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if failing {
            return Err(WriteError::Transport("connection refused".to_string()));
        }

        #[allow(clippy::expect_used)]
        let mut writes = self.writes.lock().expect("lock poisoned");
        writes.push(batch.points().to_vec());
        Ok(())
    }
}
