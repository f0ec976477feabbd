//! Trace events as they arrive on the wire
//!
//! One event per line, newline-delimited JSON with snake_case keys:
//!
//! ```text
//! {"type":"call","timestamp":1712.25,"call_id":"c1","module":"app","function":"main",
//!  "file":"app.py","line":10,"depth":0,"process_id":4242,"session_id":"s1",
//!  "correlation_id":"cycle-7"}
//! ```
//!
//! Decoding is lenient: ids may be numbers, numeric fields may be strings, and
//! anything missing or ill-typed falls back to its default. Only lines that are
//! not a JSON object are rejected.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Build the aggregation key for a function: `module.function`
pub fn function_key(module: &str, function: &str) -> String {
    let mut key = String::with_capacity(module.len() + function.len() + 1);
    key.push_str(module);
    key.push('.');
    key.push_str(function);
    key
}

/// Kind of trace event. Unknown wire values are preserved in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    Call,
    Return,
    /// Exceptional exit; closes its call like a return
    Exception,
    FunctionRegistry,
    CycleComplete,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Call => "call",
            EventType::Return => "return",
            EventType::Exception => "exception",
            EventType::FunctionRegistry => "function_registry",
            EventType::CycleComplete => "cycle_complete",
            EventType::Other(name) => name,
        }
    }

    /// Structural events skip include/exclude filtering
    pub fn bypasses_filter(&self) -> bool {
        matches!(self, EventType::FunctionRegistry | EventType::CycleComplete)
    }

    /// Events that close a previously opened call
    pub fn closes_call(&self) -> bool {
        matches!(self, EventType::Return | EventType::Exception)
    }
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Other(String::new())
    }
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "call" => EventType::Call,
            "return" => EventType::Return,
            "exception" => EventType::Exception,
            "function_registry" => EventType::FunctionRegistry,
            "cycle_complete" => EventType::CycleComplete,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = lenient_string(deserializer)?;
        Ok(EventType::from(name.as_str()))
    }
}

/// A single event emitted by a traced process. Immutable once parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Seconds since the epoch as reported by the traced process
    #[serde(deserialize_with = "lenient_f64")]
    pub timestamp: f64,
    #[serde(deserialize_with = "lenient_string")]
    pub call_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub module: String,
    #[serde(deserialize_with = "lenient_string")]
    pub function: String,
    #[serde(deserialize_with = "lenient_string")]
    pub file: String,
    #[serde(deserialize_with = "lenient_u32")]
    pub line: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub depth: u32,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
    #[serde(deserialize_with = "lenient_u64")]
    pub process_id: u64,
    #[serde(deserialize_with = "lenient_string")]
    pub session_id: String,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub learning_phase: Option<String>,
    /// Opaque payload; only read for `function_registry`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_data: Option<Value>,
    #[serde(
        deserialize_with = "lenient_opt_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_ms: Option<f64>,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub thread_id: Option<String>,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub language: Option<String>,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub protocol: Option<String>,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub invocation_type: Option<String>,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub exception: Option<String>,
}

impl TraceEvent {
    /// Parse one wire line. Fails only when the line is not a JSON object.
    pub fn parse_line(line: &str) -> crate::error::Result<Self> {
        let value: Value = serde_json::from_str(line.trim())?;
        if !value.is_object() {
            return Err(crate::error::TraceFlowError::Malformed(format!(
                "trace line is not a JSON object: {}",
                truncate(line, 80)
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize back to a single wire line (no trailing newline)
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Build a `call` event
    pub fn call(call_id: &str, module: &str, function: &str, timestamp: f64) -> Self {
        Self {
            event_type: EventType::Call,
            timestamp,
            call_id: call_id.to_string(),
            module: module.to_string(),
            function: function.to_string(),
            ..Self::default()
        }
    }

    /// Build a `return` event for a previously emitted call
    pub fn ret(call_id: &str, module: &str, function: &str, timestamp: f64) -> Self {
        Self {
            event_type: EventType::Return,
            ..Self::call(call_id, module, function, timestamp)
        }
    }

    /// Build a `function_registry` snapshot event
    pub fn registry(entries: &[RegistryEntry], timestamp: f64) -> Self {
        let functions: Vec<Value> = entries
            .iter()
            .map(|e| serde_json::to_value(e).unwrap_or(Value::Null))
            .collect();
        Self {
            event_type: EventType::FunctionRegistry,
            timestamp,
            trace_data: Some(serde_json::json!({
                "total_functions": functions.len(),
                "functions": functions,
            })),
            ..Self::default()
        }
    }

    pub fn with_correlation(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    pub fn with_location(mut self, file: &str, line: u32) -> Self {
        self.file = file.to_string();
        self.line = line;
        self
    }

    pub fn function_key(&self) -> String {
        function_key(&self.module, &self.function)
    }

    /// Key of the call stack this event belongs to
    ///
    /// Falls back to the session id, then to `"default"`, when the tracer did
    /// not tag the event with a correlation id.
    pub fn stack_key(&self) -> &str {
        match self.correlation_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ if !self.session_id.is_empty() => &self.session_id,
            _ => "default",
        }
    }

    /// Entries carried by a `function_registry` event
    ///
    /// Accepts `{module, function, file, line}` objects and bare
    /// `"module.function"` strings; anything else is skipped.
    pub fn registry_entries(&self) -> Vec<RegistryEntry> {
        let Some(functions) = self
            .trace_data
            .as_ref()
            .and_then(|data| data.get("functions"))
            .and_then(Value::as_array)
        else {
            return Vec::new();
        };

        functions
            .iter()
            .filter_map(|entry| match entry {
                Value::String(name) => {
                    let (module, function) = name.rsplit_once('.').unwrap_or(("", name));
                    Some(RegistryEntry::new(module, function))
                }
                Value::Object(_) => serde_json::from_value::<RegistryEntry>(entry.clone())
                    .ok()
                    .filter(|e| !e.function.is_empty()),
                _ => None,
            })
            .collect()
    }
}

/// Statically known function, as listed in a registry snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryEntry {
    #[serde(deserialize_with = "lenient_string")]
    pub module: String,
    #[serde(deserialize_with = "lenient_string")]
    pub function: String,
    #[serde(
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub file: Option<String>,
    #[serde(
        deserialize_with = "lenient_opt_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub line: Option<u32>,
}

impl RegistryEntry {
    pub fn new(module: &str, function: &str) -> Self {
        Self {
            module: module.to_string(),
            function: function.to_string(),
            file: None,
            line: None,
        }
    }

    pub fn at(mut self, file: &str, line: u32) -> Self {
        self.file = Some(file.to_string());
        self.line = Some(line);
        self
    }

    pub fn function_key(&self) -> String {
        function_key(&self.module, &self.function)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

pub(crate) fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_of(&value).filter(|v| v.is_finite()).unwrap_or(0.0))
}

pub(crate) fn lenient_opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_of(&value).filter(|v| v.is_finite()))
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_of(&value)
        .filter(|v| *v >= 0.0 && v.is_finite())
        .map(|v| v as u64)
        .unwrap_or(0))
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_of(&value)
        .filter(|v| *v >= 0.0 && *v <= u32::MAX as f64)
        .map(|v| v as u32)
        .unwrap_or(0))
}

fn lenient_opt_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number_of(&value)
        .filter(|v| *v >= 0.0 && *v <= u32::MAX as f64)
        .map(|v| v as u32))
}
