// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::errors::PointError;
use crate::record::{FieldValue, LogRecord};

pub const LEVEL_TAG: &str = "level";
pub const MESSAGE_FIELD: &str = "message";

/// Timestamped data point ready to be written to InfluxDB.
#[derive(Clone, Debug, PartialEq)]
pub struct DataPoint {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: SystemTime,
}

impl DataPoint {
    pub fn new(
        measurement: &str,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        timestamp: SystemTime,
    ) -> Result<Self, PointError> {
        if measurement.is_empty() {
            return Err(PointError::EmptyMeasurement);
        }
        if fields.is_empty() {
            return Err(PointError::NoFields);
        }
        if tags.keys().chain(fields.keys()).any(String::is_empty) {
            return Err(PointError::EmptyKey);
        }
        for (key, value) in &fields {
            if let FieldValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(PointError::UnsupportedFieldValue {
                        key: key.clone(),
                        value: *v,
                    });
                }
            }
        }
        if timestamp < SystemTime::UNIX_EPOCH {
            return Err(PointError::TimestampBeforeEpoch);
        }

        Ok(Self {
            measurement: measurement.to_string(),
            tags,
            fields,
            timestamp,
        })
    }

    #[must_use]
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }
}

/// Builds a point from a log record.
///
/// The record level always becomes the `level` tag. Every name in `tag_names`
/// that is present in the record fields is promoted to a tag and removed from
/// the point fields; all other record fields are kept as fields next to the
/// message.
pub fn build_point(
    record: &LogRecord,
    measurement: &str,
    tag_names: &[String],
) -> Result<DataPoint, PointError> {
    let mut tags = BTreeMap::new();
    tags.insert(LEVEL_TAG.to_string(), record.level.as_str().to_string());
    for name in tag_names {
        if let Some(value) = record.fields.get(name) {
            let value = value.to_string();
            // InfluxDB drops tags without a value
            if !value.is_empty() {
                tags.insert(name.clone(), value);
            }
        }
    }

    let mut fields = BTreeMap::new();
    fields.insert(
        MESSAGE_FIELD.to_string(),
        FieldValue::String(record.message.clone()),
    );
    for (key, value) in &record.fields {
        fields.insert(key.clone(), value.clone());
    }
    for name in tag_names {
        fields.remove(name);
    }

    DataPoint::new(measurement, tags, fields, record.timestamp)
}
