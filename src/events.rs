//! Operational events emitted by the index store
//!
//! Hosts plug in their own [`EventSink`] to forward events to a metrics or
//! alerting pipeline; [`TracingEventSink`] simply logs them.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

/// Name of the event emitted when maintenance evicts indexes over budget
pub const BUDGET_PRESSURE: &str = "budget_pressure";

pub trait EventSink: Send + Sync {
    fn emit(&self, name: &str, payload: Map<String, Value>);
}

/// Logs every event at info level
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, name: &str, payload: Map<String, Value>) {
        let payload = serde_json::Value::Object(payload);
        info!(event = name, payload = %payload, "Index event");
    }
}

/// Keeps emitted events in memory
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Map<String, Value>)> {
        self.events.lock().clone()
    }

    pub fn named(&self, name: &str) -> Vec<Map<String, Value>> {
        self.events
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, name: &str, payload: Map<String, Value>) {
        self.events.lock().push((name.to_string(), payload));
    }
}

/// Payload of a [`BUDGET_PRESSURE`] event
#[derive(Debug, Clone, Serialize)]
pub struct BudgetPressure {
    pub budget_bytes: u64,
    pub total_bytes: u64,
    pub pressure_ratio: f64,
    pub evicted_count: usize,
    pub active_count: usize,
}

impl BudgetPressure {
    pub fn to_payload(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
