//! Structured log records bound for the aggregator.

use std::fmt;
use std::time::SystemTime;

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Severity of a shipped record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scalar field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Str(v) => serializer.serialize_str(v),
            FieldValue::Int(v) => serializer.serialize_i64(*v),
            FieldValue::UInt(v) => serializer.serialize_u64(*v),
            FieldValue::Float(v) => serializer.serialize_f64(*v),
            FieldValue::Bool(v) => serializer.serialize_bool(*v),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(v) => f.write_str(v),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::UInt(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::UInt(v.into())
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

/// An immutable, ordered log record.
///
/// `with` never mutates: it returns a new record carrying one more field, so a
/// base record can be shared by several call sites.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    time: SystemTime,
    level: Level,
    message: String,
    fields: Vec<(String, FieldValue)>,
}

impl LogRecord {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            time: SystemTime::now(),
            level,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Level::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(Level::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Level::Error, message)
    }

    /// Return a copy of this record with `key = value` appended.
    #[must_use]
    pub fn with(&self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let mut next = self.clone();
        next.fields.push((key.into(), value.into()));
        next
    }

    pub fn time(&self) -> SystemTime {
        self.time
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Encode as one newline-terminated JSON object.
    ///
    /// Key order: `time`, `level`, `msg`, then `extra` (sink-wide fields),
    /// then the record's own fields in insertion order.
    pub fn encode_line(
        &self,
        extra: &[(String, FieldValue)],
    ) -> Result<Vec<u8>, serde_json::Error> {
        let mut line = serde_json::to_vec(&Wire { record: self, extra })?;
        line.push(b'\n');
        Ok(line)
    }
}

struct Wire<'a> {
    record: &'a LogRecord,
    extra: &'a [(String, FieldValue)],
}

impl Serialize for Wire<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = self.record;
        let len = 3 + self.extra.len() + record.fields.len();
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(
            "time",
            &humantime::format_rfc3339_millis(record.time).to_string(),
        )?;
        map.serialize_entry("level", record.level.as_str())?;
        map.serialize_entry("msg", &record.message)?;
        for (key, value) in self.extra.iter().chain(record.fields.iter()) {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_leaves_original_untouched() {
        let base = LogRecord::error("failed to connect to inventory service");
        let enriched = base.with("customer_id", "123").with("attempt", 2u64);

        assert!(base.fields().is_empty());
        assert_eq!(enriched.fields().len(), 2);
        assert_eq!(enriched.field("customer_id"), Some(&FieldValue::from("123")));
    }

    #[test]
    fn encodes_single_line_in_field_order() {
        let record = LogRecord::error("payment failed")
            .with("order_id", "order-1")
            .with("amount", 12.5)
            .with("retry", false);
        let extra = vec![("environment".to_string(), FieldValue::from("dev"))];

        let line = String::from_utf8(record.encode_line(&extra).unwrap()).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let body = line.trim_end();
        let time_at = body.find("\"time\"").unwrap();
        let level_at = body.find("\"level\":\"ERROR\"").unwrap();
        let msg_at = body.find("\"msg\":\"payment failed\"").unwrap();
        let env_at = body.find("\"environment\":\"dev\"").unwrap();
        let order_at = body.find("\"order_id\":\"order-1\"").unwrap();
        assert!(time_at < level_at && level_at < msg_at && msg_at < env_at && env_at < order_at);

        let parsed: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(parsed["amount"], 12.5);
        assert_eq!(parsed["retry"], false);
    }

    #[test]
    fn newlines_in_values_stay_escaped() {
        let record = LogRecord::info("multi\nline").with("error", "a\nb");
        let line = record.encode_line(&[]).unwrap();
        assert_eq!(line.iter().filter(|b| **b == b'\n').count(), 1);
    }
}
