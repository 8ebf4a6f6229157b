use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{Block, Value};

/// Longest accepted NDJSON frame on the event socket, in bytes.
pub const MAX_EVENT_LINE_LEN: usize = 512 * 1024;

/// A freshly-stored block, as published on the firehose.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BlockEvent {
    pub id: String,

    /// Datasource instance name.
    pub datasource: String,

    /// Datasource type.
    pub ds_type: String,

    pub created_at: DateTime<Utc>,
    pub text: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl BlockEvent {
    pub fn from_block(block: &dyn Block, ds_type: &str) -> Self {
        Self {
            id: block.id().to_owned(),
            datasource: block.source().to_owned(),
            ds_type: ds_type.to_owned(),
            created_at: block.created_at(),
            text: block.text().to_owned(),
            metadata: block.metadata(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HeartbeatEvent {
    pub time: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MessageEvent {
    pub message: String,
}

/// One firehose frame: a JSON object per line, discriminated by `"type"`.
///
/// Consumers must tolerate kinds they do not know — new event kinds may appear
/// on the wire at any time.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireEvent {
    Block(BlockEvent),
    Heartbeat(HeartbeatEvent),
    Info(MessageEvent),
    Error(MessageEvent),

    #[serde(other)]
    Unknown,
}

impl WireEvent {
    pub fn heartbeat(time: DateTime<Utc>) -> Self {
        Self::Heartbeat(HeartbeatEvent { time })
    }

    pub fn as_block(&self) -> Option<&BlockEvent> {
        match self {
            Self::Block(event) => Some(event),
            _ => None,
        }
    }
}

/// Anything newly-stored blocks are announced to: the event bridge, the
/// in-process hub, or a fan-out over both.
///
/// Delivery is best-effort by contract — implementations must never block the
/// publisher.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &WireEvent);
}

/// Publishes to every sink in turn.
#[derive(Default)]
pub struct SinkSet {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl SinkSet {
    pub fn new(sinks: Vec<std::sync::Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: std::sync::Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for SinkSet {
    fn publish(&self, event: &WireEvent) {
        for sink in &self.sinks {
            sink.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_frame_round_trip() {
        let event = WireEvent::Block(BlockEvent {
            id: "b1".to_owned(),
            datasource: "my_toy".to_owned(),
            ds_type: "toy".to_owned(),
            created_at: "2024-05-01T12:00:00Z".parse().unwrap(),
            text: "hello".to_owned(),
            metadata: BTreeMap::from([("n".to_owned(), Value::from(3_i64))]),
        });

        let line = serde_json::to_string(&event).unwrap();
        assert!(line.contains("\"type\":\"block\""));
        assert!(line.contains("\"ds_type\":\"toy\""));

        let back: WireEvent = serde_json::from_str(&line).unwrap();
        similar_asserts::assert_eq!(back, event);
    }

    #[test]
    fn unknown_kinds_are_tolerated() {
        let back: WireEvent =
            serde_json::from_str(r#"{"type":"shiny_new_thing","payload":42}"#).unwrap();
        assert_eq!(back, WireEvent::Unknown);
    }
}
