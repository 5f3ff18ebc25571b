// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced by the hook, the point builder and the sink client.

/// Rejections raised while turning a log record into a data point.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PointError {
    #[error("point measurement must not be empty")]
    EmptyMeasurement,

    #[error("point tag and field keys must not be empty")]
    EmptyKey,

    #[error("field {key} has unsupported value {value}")]
    UnsupportedFieldValue { key: String, value: f64 },

    #[error("point timestamp is before the unix epoch")]
    TimestampBeforeEpoch,

    #[error("point without fields is unsupported")]
    NoFields,
}

/// Failure of a write against the sink. Kept as the hook's last error and handed
/// to every producer until the next write attempt, so it must be cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("failed to reach InfluxDB: {0}")]
    Transport(String),

    #[error("InfluxDB rejected the batch with status {status}: {body}")]
    Server { status: u16, body: String },

    #[error("failed to encode batch: {0}")]
    Encode(String),
}

/// Errors raised while building a hook or its HTTP client.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CreationError {
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error("batch interval must be greater than zero")]
    InvalidBatchInterval,

    #[error("database name must not be empty")]
    EmptyDatabase,

    #[error("measurement name must not be empty")]
    EmptyMeasurement,

    #[error("invalid InfluxDB url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported protocol scheme: {0}")]
    UnsupportedScheme(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("the hook must be created from within a tokio runtime")]
    NoRuntime,
}

/// What a producer sees when firing a record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HookError {
    #[error("could not create new InfluxDB point: {0}")]
    Point(#[from] PointError),

    #[error("last write to InfluxDB failed: {0}")]
    Write(#[from] WriteError),

    #[error("hook is closed")]
    Closed,

    #[error("point buffer is full")]
    BufferFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = WriteError::Server {
            status: 400,
            body: "partial write".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "InfluxDB rejected the batch with status 400: partial write"
        );
    }

    #[test]
    fn test_hook_error_from() {
        let error: HookError = PointError::EmptyMeasurement.into();
        assert_eq!(
            error.to_string(),
            "could not create new InfluxDB point: point measurement must not be empty"
        );

        let error: HookError = WriteError::Transport("connection refused".to_string()).into();
        assert!(matches!(error, HookError::Write(WriteError::Transport(_))));
    }
}
