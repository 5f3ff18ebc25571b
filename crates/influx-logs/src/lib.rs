// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batching log hook for InfluxDB.
//!
//! Producers hand structured [`record::LogRecord`]s to an [`hook::InfluxHook`]
//! without waiting on the network. A single background worker collects the
//! resulting points and writes them to InfluxDB whenever the batch is full or
//! the flush interval elapses, and drains everything on
//! [`hook::InfluxHook::close`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod client;
pub mod config;
pub mod errors;
pub mod hook;
pub mod layer;
pub mod point;
pub mod record;
pub mod testing;
pub mod worker;

pub use config::Config;
pub use errors::{CreationError, HookError, PointError, WriteError};
pub use hook::InfluxHook;
pub use layer::InfluxLayer;
pub use record::{FieldValue, Level, LogRecord};
