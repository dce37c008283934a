//! Output protocol messages.
//!
//! Every message serializes to one JSON object tagged by `type`
//! (`SCHEMA`, `RECORD`, `STATE`, `ACTIVATE_VERSION`, `BATCH`). Messages are
//! built by the orchestrator and handed to the emitter immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Stream;
use crate::schema::StreamSchema;
use crate::state::SyncState;

/// Discriminant of a [`Message`], used for logging and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Schema,
    Record,
    State,
    ActivateVersion,
    Batch,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "SCHEMA",
            Self::Record => "RECORD",
            Self::State => "STATE",
            Self::ActivateVersion => "ACTIVATE_VERSION",
            Self::Batch => "BATCH",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMessage {
    pub stream: String,
    pub schema: StreamSchema,
    pub key_properties: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bookmark_properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    pub record: serde_json::Map<String, serde_json::Value>,
    pub time_extracted: DateTime<Utc>,
    /// Table version for full-table streams with activate-version enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    pub value: SyncState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateVersionMessage {
    pub stream: String,
    pub version: i64,
}

/// File encoding of a batch manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEncoding {
    pub format: String,
    pub compression: String,
}

impl Default for BatchEncoding {
    fn default() -> Self {
        Self {
            format: "jsonl".to_string(),
            compression: "none".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMessage {
    pub stream: String,
    pub encoding: BatchEncoding,
    /// File URLs holding the batched records.
    pub manifest: Vec<String>,
}

/// One line of the output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Schema(SchemaMessage),
    Record(RecordMessage),
    State(StateMessage),
    ActivateVersion(ActivateVersionMessage),
    Batch(BatchMessage),
}

impl Message {
    /// SCHEMA message for a catalog stream.
    #[must_use]
    pub fn schema(stream: &Stream) -> Self {
        Self::Schema(SchemaMessage {
            stream: stream.name.clone(),
            schema: stream.schema.clone(),
            key_properties: stream.key_properties.clone(),
            bookmark_properties: stream.bookmark_properties(),
        })
    }

    /// RECORD message stamped with the current time.
    #[must_use]
    pub fn record(
        stream: impl Into<String>,
        record: serde_json::Map<String, serde_json::Value>,
        version: Option<i64>,
    ) -> Self {
        Self::Record(RecordMessage {
            stream: stream.into(),
            record,
            time_extracted: Utc::now(),
            version,
        })
    }

    #[must_use]
    pub fn state(value: SyncState) -> Self {
        Self::State(StateMessage { value })
    }

    #[must_use]
    pub fn activate_version(stream: impl Into<String>, version: i64) -> Self {
        Self::ActivateVersion(ActivateVersionMessage {
            stream: stream.into(),
            version,
        })
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Schema(_) => MessageKind::Schema,
            Self::Record(_) => MessageKind::Record,
            Self::State(_) => MessageKind::State,
            Self::ActivateVersion(_) => MessageKind::ActivateVersion,
            Self::Batch(_) => MessageKind::Batch,
        }
    }

    /// Stream the message belongs to. STATE spans every stream.
    #[must_use]
    pub fn stream(&self) -> Option<&str> {
        match self {
            Self::Schema(m) => Some(&m.stream),
            Self::Record(m) => Some(&m.stream),
            Self::ActivateVersion(m) => Some(&m.stream),
            Self::Batch(m) => Some(&m.stream),
            Self::State(_) => None,
        }
    }
}
