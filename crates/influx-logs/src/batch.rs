// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batches of points and their InfluxDB line protocol encoding.
//!
//! A batch is owned by the worker only. It carries everything a sink needs to
//! route the write: the target database, the timestamp precision and the
//! optional retention policy.

use std::fmt::Write;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer};
use tracing::error;

use crate::errors::WriteError;
use crate::point::DataPoint;
use crate::record::FieldValue;

/// Timestamp precision of written points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl Precision {
    /// Value of the `precision` query parameter.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Nanoseconds => "ns",
            Precision::Microseconds => "us",
            Precision::Milliseconds => "ms",
            Precision::Seconds => "s",
            Precision::Minutes => "m",
            Precision::Hours => "h",
        }
    }

    fn timestamp(self, timestamp: SystemTime) -> Result<u128, WriteError> {
        let since_epoch = timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|e| WriteError::Encode(e.to_string()))?;
        Ok(match self {
            Precision::Nanoseconds => since_epoch.as_nanos(),
            Precision::Microseconds => since_epoch.as_micros(),
            Precision::Milliseconds => since_epoch.as_millis(),
            Precision::Seconds => u128::from(since_epoch.as_secs()),
            Precision::Minutes => u128::from(since_epoch.as_secs() / 60),
            Precision::Hours => u128::from(since_epoch.as_secs() / 3600),
        })
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "n" | "ns" => Ok(Precision::Nanoseconds),
            "u" | "us" => Ok(Precision::Microseconds),
            "ms" => Ok(Precision::Milliseconds),
            "s" => Ok(Precision::Seconds),
            "m" => Ok(Precision::Minutes),
            "h" => Ok(Precision::Hours),
            _ => Err(format!(
                "Invalid precision: '{s}'. Valid precisions are: ns, us, ms, s, m, h",
            )),
        }
    }
}

/// Invalid strings fall back to nanoseconds so a bad value never prevents startup.
impl<'de> Deserialize<'de> for Precision {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        match Precision::from_str(&value) {
            Ok(precision) => Ok(precision),
            Err(e) => {
                error!("{}", e);
                Ok(Precision::Nanoseconds)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    database: String,
    precision: Precision,
    retention_policy: Option<String>,
    points: Vec<DataPoint>,
}

impl Batch {
    #[must_use]
    pub fn new(database: &str, precision: Precision, retention_policy: Option<&str>) -> Self {
        Self {
            database: database.to_string(),
            precision,
            retention_policy: retention_policy.map(ToString::to_string),
            points: Vec::new(),
        }
    }

    /// Empty batch with the same routing as this one.
    #[must_use]
    pub fn renew(&self) -> Self {
        Self::new(
            &self.database,
            self.precision,
            self.retention_policy.as_deref(),
        )
    }

    pub fn add_point(&mut self, point: DataPoint) {
        self.points.push(point);
    }

    /// Drops the oldest points until at most `max` remain. Returns the number dropped.
    pub fn truncate_oldest(&mut self, max: usize) -> usize {
        let excess = self.points.len().saturating_sub(max);
        self.points.drain(..excess);
        excess
    }

    #[must_use]
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn precision(&self) -> Precision {
        self.precision
    }

    #[must_use]
    pub fn retention_policy(&self) -> Option<&str> {
        self.retention_policy.as_deref()
    }

    /// Encodes every point as one line of InfluxDB line protocol.
    pub fn to_line_protocol(&self) -> Result<String, WriteError> {
        let mut body = String::new();
        for point in &self.points {
            write_line(&mut body, point, self.precision)?;
            body.push('\n');
        }
        Ok(body)
    }
}

const MEASUREMENT_SPECIAL: &[char] = &[',', ' '];
const KEY_SPECIAL: &[char] = &[',', '=', ' '];

fn write_line(out: &mut String, point: &DataPoint, precision: Precision) -> Result<(), WriteError> {
    escape_name_into(out, point.measurement(), MEASUREMENT_SPECIAL);
    for (key, value) in point.tags() {
        out.push(',');
        escape_name_into(out, key, KEY_SPECIAL);
        out.push('=');
        escape_name_into(out, value, KEY_SPECIAL);
    }

    let mut separator = ' ';
    for (key, value) in point.fields() {
        out.push(separator);
        separator = ',';
        escape_name_into(out, key, KEY_SPECIAL);
        out.push('=');
        write_field_value(out, value)?;
    }

    let timestamp = precision.timestamp(point.timestamp())?;
    write!(out, " {timestamp}").map_err(|e| WriteError::Encode(e.to_string()))
}

fn write_field_value(out: &mut String, value: &FieldValue) -> Result<(), WriteError> {
    let result = match value {
        FieldValue::String(s) => {
            out.push('"');
            escape_into(out, s, &['"', '\\']);
            out.push('"');
            Ok(())
        }
        FieldValue::Integer(i) => write!(out, "{i}i"),
        FieldValue::UInteger(u) => write!(out, "{u}u"),
        FieldValue::Float(v) => write!(out, "{v}"),
        FieldValue::Boolean(b) => write!(out, "{b}"),
    };
    result.map_err(|e| WriteError::Encode(e.to_string()))
}

/// Escapes measurement, tag and field key text. A bare backslash would escape
/// the separator after it and a raw newline would end the line, so both are
/// escaped too.
fn escape_name_into(out: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

fn escape_into(out: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn point_at(nanos: u64) -> DataPoint {
        let mut tags = BTreeMap::new();
        tags.insert("level".to_string(), "info".to_string());
        tags.insert("host name".to_string(), "web,1".to_string());
        let mut fields = BTreeMap::new();
        fields.insert(
            "message".to_string(),
            FieldValue::String(r#"said "hi" \o/"#.to_string()),
        );
        fields.insert("count".to_string(), FieldValue::Integer(3));
        fields.insert("ok".to_string(), FieldValue::Boolean(true));
        fields.insert("ratio".to_string(), FieldValue::Float(0.5));
        fields.insert("size".to_string(), FieldValue::UInteger(9));
        DataPoint::new(
            "app logs",
            tags,
            fields,
            SystemTime::UNIX_EPOCH + Duration::from_nanos(nanos),
        )
        .unwrap()
    }

    #[test]
    fn test_precision_from_str() {
        assert_eq!(Precision::from_str("ns").unwrap(), Precision::Nanoseconds);
        assert_eq!(Precision::from_str("").unwrap(), Precision::Nanoseconds);
        assert_eq!(Precision::from_str("u").unwrap(), Precision::Microseconds);
        assert_eq!(Precision::from_str("MS").unwrap(), Precision::Milliseconds);
        assert_eq!(Precision::from_str("h").unwrap(), Precision::Hours);
        assert!(Precision::from_str("weeks").is_err());
    }

    #[test]
    #[traced_test]
    fn test_precision_deserialize_falls_back() {
        let precision: Precision = serde_json::from_str(r#""s""#).unwrap();
        assert_eq!(precision, Precision::Seconds);

        let precision: Precision = serde_json::from_str(r#""fortnight""#).unwrap();
        assert_eq!(precision, Precision::Nanoseconds);
        assert!(logs_contain("Invalid precision: 'fortnight'"));
    }

    #[test]
    fn test_line_protocol_escaping() {
        let mut batch = Batch::new("db", Precision::Nanoseconds, None);
        batch.add_point(point_at(1_500_000_000));

        assert_eq!(
            batch.to_line_protocol().unwrap(),
            "app\\ logs,host\\ name=web\\,1,level=info \
             count=3i,message=\"said \\\"hi\\\" \\\\o/\",ok=true,ratio=0.5,size=9u \
             1500000000\n"
        );
    }

    #[test]
    fn test_line_protocol_escapes_backslash_and_newline_in_tags() {
        let mut tags = BTreeMap::new();
        tags.insert("level".to_string(), "info".to_string());
        tags.insert("path".to_string(), "C:\\logs\\".to_string());
        tags.insert("zone".to_string(), "x\ny".to_string());
        let mut fields = BTreeMap::new();
        fields.insert(
            "message".to_string(),
            FieldValue::String("line one\nline two".to_string()),
        );
        let point = DataPoint::new(
            "app\\",
            tags,
            fields,
            SystemTime::UNIX_EPOCH + Duration::from_nanos(1),
        )
        .unwrap();

        let mut batch = Batch::new("db", Precision::Nanoseconds, None);
        batch.add_point(point);
        let body = batch.to_line_protocol().unwrap();

        assert_eq!(
            body,
            "app\\\\,level=info,path=C:\\\\logs\\\\,zone=x\\ny \
             message=\"line one\nline two\" 1\n"
        );
        // Only the newline inside the quoted string value is left raw
        assert_eq!(body.matches('\n').count(), 2);
    }

    #[test]
    fn test_line_protocol_precision() {
        let mut batch = Batch::new("db", Precision::Seconds, None);
        batch.add_point(point_at(7_900_000_000));
        assert!(batch.to_line_protocol().unwrap().ends_with(" 7\n"));

        let mut batch = Batch::new("db", Precision::Milliseconds, None);
        batch.add_point(point_at(7_900_000_000));
        assert!(batch.to_line_protocol().unwrap().ends_with(" 7900\n"));
    }

    #[test]
    fn test_line_protocol_keeps_point_order() {
        let mut batch = Batch::new("db", Precision::Nanoseconds, None);
        batch.add_point(point_at(1));
        batch.add_point(point_at(2));
        batch.add_point(point_at(3));

        let body = batch.to_line_protocol().unwrap();
        let timestamps: Vec<&str> = body
            .lines()
            .map(|line| line.rsplit(' ').next().unwrap())
            .collect();
        assert_eq!(timestamps, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_renew_keeps_routing() {
        let mut batch = Batch::new("db", Precision::Milliseconds, Some("autogen"));
        batch.add_point(point_at(1));

        let fresh = batch.renew();
        assert!(fresh.is_empty());
        assert_eq!(fresh.database(), "db");
        assert_eq!(fresh.precision(), Precision::Milliseconds);
        assert_eq!(fresh.retention_policy(), Some("autogen"));
    }

    #[test]
    fn test_truncate_oldest() {
        let mut batch = Batch::new("db", Precision::Nanoseconds, None);
        for i in 1..=5 {
            batch.add_point(point_at(i));
        }

        assert_eq!(batch.truncate_oldest(2), 3);
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.points()[0].timestamp(),
            SystemTime::UNIX_EPOCH + Duration::from_nanos(4)
        );
        assert_eq!(batch.truncate_oldest(10), 0);
    }
}
