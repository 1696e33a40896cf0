//! Chat messages and the `/history` response body.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::peer::{MalformedPeer, PeerKey};

/// Sentinel text returned when a peer has no local history.
pub const HISTORY_NOT_FOUND: &str = "History not found";

/// Ordered message log. Insertion order is arrival order, nothing more.
pub type HistoryLog = Vec<Message>;

/// A single chat message.
///
/// The chat engine writes the legacy field names (`ip`, `port`, `message`,
/// `senderid`) and encodes the port as a string, so decoding accepts both
/// spellings. A field of the wrong type decodes as empty rather than failing
/// the record, so one bad entry never makes a whole log unreadable.
///
/// The `Serialize` impl uses the canonical names; [`EngineRecord`] writes the
/// engine's layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// IP of the peer that produced the message.
    #[serde(default, alias = "ip", deserialize_with = "deserialize_text")]
    pub sender_ip: String,
    /// History port of the peer that produced the message. Zero when absent
    /// or not representable as a port.
    #[serde(default, alias = "port", deserialize_with = "deserialize_port")]
    pub sender_port: u16,
    /// Display name of the author.
    #[serde(default, alias = "senderid", deserialize_with = "deserialize_text")]
    pub author: String,
    #[serde(default, alias = "message", deserialize_with = "deserialize_text")]
    pub content: String,
    /// Unix seconds. Display only.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,
    /// Fields this crate does not interpret (the engine's `key`,
    /// `module_name`, `signature`), kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    pub fn new(
        sender: PeerKey,
        author: impl Into<String>,
        content: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            sender_ip: sender.ip.to_string(),
            sender_port: sender.port,
            author: author.into(),
            content: content.into(),
            timestamp,
            extra: Map::new(),
        }
    }

    /// Identity of the peer that produced this message.
    pub fn sender(&self) -> Result<PeerKey, MalformedPeer> {
        PeerKey::from_message(self)
    }
}

/// A message in the chat engine's on-disk layout: `message`, `senderid`,
/// `ip`, `port` as a string, then `timestamp` and the preserved extra fields.
#[derive(Debug, Clone, Copy)]
pub struct EngineRecord<'a>(pub &'a Message);

impl Serialize for EngineRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let message = self.0;
        let mut map = serializer.serialize_map(Some(5 + message.extra.len()))?;
        map.serialize_entry("message", &message.content)?;
        map.serialize_entry("senderid", &message.author)?;
        map.serialize_entry("ip", &message.sender_ip)?;
        map.serialize_entry("port", &message.sender_port.to_string())?;
        map.serialize_entry("timestamp", &message.timestamp)?;
        for (key, value) in &message.extra {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Borrow a log as engine-layout records.
pub fn engine_records(log: &[Message]) -> Vec<EngineRecord<'_>> {
    log.iter().map(EngineRecord).collect()
}

/// Body of a `200 OK` answer from `GET /history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryResponse {
    History(HistoryLog),
    NotFound(NotFoundBody),
}

impl HistoryResponse {
    pub fn not_found() -> Self {
        Self::NotFound(NotFoundBody {
            message: HISTORY_NOT_FOUND.to_string(),
        })
    }
}

impl From<Option<HistoryLog>> for HistoryResponse {
    fn from(history: Option<HistoryLog>) -> Self {
        match history {
            Some(log) => Self::History(log),
            None => Self::not_found(),
        }
    }
}

/// `{"message": "History not found"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotFoundBody {
    pub message: String,
}

/// Strings pass through, numbers and booleans are stringified, anything
/// else (null, arrays, objects) is empty.
fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    };
    Ok(text)
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let port = match raw {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    Ok(port.unwrap_or(0))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let timestamp = match raw {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    Ok(timestamp.unwrap_or(0))
}
