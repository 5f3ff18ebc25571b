// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration: ships every event of a subscriber through a hook.
//!
//! ```rust,ignore
//! use tracing_subscriber::prelude::*;
//!
//! let hook = InfluxHook::new(Config::from_env()?)?;
//! tracing_subscriber::registry()
//!     .with(InfluxLayer::new(hook.clone()))
//!     .init();
//! ```
//!
//! Events emitted by this crate and by the HTTP stack are ignored, otherwise
//! every flush would produce new records to flush.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use tracing::field::{Field, Visit};
use tracing::warn;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::errors::HookError;
use crate::hook::InfluxHook;
use crate::point::MESSAGE_FIELD;
use crate::record::{FieldValue, Level, LogRecord};

const DEFAULT_IGNORED_TARGETS: [&str; 5] = ["influx_logs", "reqwest", "hyper", "h2", "rustls"];

/// A warning is logged for the first dropped record and then once per this many.
const DROP_WARN_EVERY: u64 = 1000;

pub struct InfluxLayer {
    hook: InfluxHook,
    ignored_targets: Vec<String>,
    dropped: AtomicU64,
}

impl InfluxLayer {
    #[must_use]
    pub fn new(hook: InfluxHook) -> Self {
        Self {
            hook,
            ignored_targets: DEFAULT_IGNORED_TARGETS
                .iter()
                .map(ToString::to_string)
                .collect(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Number of events that never reached the worker.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, error: &HookError) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % DROP_WARN_EVERY == 0 {
            warn!("INFLUX | Dropped log event ({dropped} so far): {error}");
        }
    }

    /// Skips events whose target starts with `prefix`.
    #[must_use]
    pub fn ignore_target(mut self, prefix: &str) -> Self {
        self.ignored_targets.push(prefix.to_string());
        self
    }

    fn is_ignored(&self, target: &str) -> bool {
        self.ignored_targets
            .iter()
            .any(|prefix| target.starts_with(prefix.as_str()))
    }
}

impl<S> Layer<S> for InfluxLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if self.is_ignored(metadata.target()) {
            return;
        }
        let level = Level::from(*metadata.level());
        if !self.hook.levels().contains(&level) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let record = LogRecord {
            message: visitor.message.unwrap_or_default(),
            level,
            timestamp: SystemTime::now(),
            fields: visitor.fields,
        };
        // Write errors cannot travel back through a subscriber; they stay
        // observable through `InfluxHook::last_error`. Anything else means the
        // event was not queued.
        match self.hook.fire_blocking(&record) {
            Ok(()) | Err(HookError::Write(_)) => {}
            Err(e) => self.record_drop(&e),
        }
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    fields: HashMap<String, FieldValue>,
}

impl RecordVisitor {
    fn insert(&mut self, field: &Field, value: FieldValue) {
        if field.name() == MESSAGE_FIELD {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for RecordVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, FieldValue::Float(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, FieldValue::Integer(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, FieldValue::UInteger(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, FieldValue::Boolean(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, FieldValue::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, FieldValue::String(format!("{value:?}")));
    }
}
