//! Event envelope, closed kind set, and the stable on-disk codec.
//!
//! [`Event`] is the immutable, sequenced record that flows through the
//! store, the subscription registry, and the scheduler. The codec is a
//! tagged record: the `kind` field identifies the payload schema and is
//! checked independently of the rest of the envelope, so a replay that
//! encounters a kind tag from a newer version of this crate surfaces a
//! recoverable [`EventCodecError::UnknownKind`] instead of aborting.
//!
//! # Example
//!
//! ```rust
//! use remora_core::event::{Event, EventKind, PartialEvent};
//! use std::collections::HashSet;
//!
//! let partial = PartialEvent::new(EventKind::ManualTrigger, serde_json::json!({}))
//!     .with_to_agent("A1")
//!     .with_correlation_id("C1");
//!
//! let event = Event::from_partial(partial, 0);
//! assert_eq!(event.seq, 0);
//! assert_eq!(event.kind, EventKind::ManualTrigger);
//!
//! let bytes = event.to_json_line().unwrap();
//! let round_tripped = Event::from_json_line(&bytes).unwrap();
//! assert_eq!(round_tripped.seq, event.seq);
//! # let _ = HashSet::<String>::new();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The closed set of event kinds the core understands (§6).
///
/// Deliberately closed: adding a new kind is a breaking change to the
/// wire format, which is why unrecognized tags during replay are treated
/// as a recoverable condition rather than silently coerced into one of
/// these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ContentChanged,
    FileSaved,
    UserChat,
    ManualTrigger,
    AgentMessage,
    ToolCall,
    ToolResult,
    RewriteProposal,
    RewriteApplied,
    RewriteRejected,
    TurnStarted,
    TurnCompleted,
    TurnError,
    TopologyChanged,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// An event under construction by a producer, before a `seq` has been
/// assigned by the [`EventStore`](crate::store::EventStore).
///
/// This is the type passed to `EventStore::append` and to the public
/// `ingest_event` operation (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialEvent {
    pub kind: EventKind,
    pub correlation_id: Option<String>,
    pub from_agent: Option<String>,
    pub to_agent: Option<String>,
    pub path: Option<String>,
    pub tags: HashSet<String>,
    pub payload: serde_json::Value,
}

impl PartialEvent {
    /// Build a minimal partial event with no routing metadata set.
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            correlation_id: None,
            from_agent: None,
            to_agent: None,
            path: None,
            tags: HashSet::new(),
            payload,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_from_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.from_agent = Some(agent_id.into());
        self
    }

    pub fn with_to_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.to_agent = Some(agent_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }
}

/// An immutable, sequenced, durable event (§3).
///
/// `seq` is assigned once by the store at append time and never changes.
/// Every other field is copied verbatim from the [`PartialEvent`] the
/// producer submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub from_agent: Option<String>,
    pub to_agent: Option<String>,
    pub path: Option<String>,
    pub tags: HashSet<String>,
    pub payload: serde_json::Value,
}

/// On-disk representation used to detect unknown kind tags without
/// failing to parse the rest of the record. The `kind` field is kept as
/// a raw string so a tag this binary doesn't recognize can be reported
/// with the original bytes preserved, per §4.1.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawEvent {
    seq: u64,
    kind: String,
    timestamp: DateTime<Utc>,
    correlation_id: Option<String>,
    from_agent: Option<String>,
    to_agent: Option<String>,
    path: Option<String>,
    tags: HashSet<String>,
    payload: serde_json::Value,
}

/// Error surfaced by the codec. Unknown kinds are recoverable: the raw
/// line is preserved so the caller can emit `UnknownEventEncountered`
/// (§7) and continue replay.
#[derive(Debug, Clone)]
pub enum EventCodecError {
    /// The JSON structure itself could not be parsed.
    Malformed(String),
    /// The structure parsed but `kind` is not one of [`EventKind`]'s
    /// closed variants.
    UnknownKind { kind: String, raw: Vec<u8> },
}

impl fmt::Display for EventCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCodecError::Malformed(msg) => write!(f, "malformed event record: {msg}"),
            EventCodecError::UnknownKind { kind, .. } => {
                write!(f, "unknown event kind tag: {kind}")
            }
        }
    }
}

impl std::error::Error for EventCodecError {}

impl Event {
    /// Reify a [`PartialEvent`] with an assigned `seq` and the current
    /// wall-clock timestamp. Only the [`EventStore`](crate::store::EventStore)
    /// should call this — `seq` must be monotonically unique within a store.
    pub fn from_partial(partial: PartialEvent, seq: u64) -> Self {
        Self {
            seq,
            kind: partial.kind,
            timestamp: Utc::now(),
            correlation_id: partial.correlation_id,
            from_agent: partial.from_agent,
            to_agent: partial.to_agent,
            path: partial.path,
            tags: partial.tags,
            payload: partial.payload,
        }
    }

    /// Serialize this event as one JSON line (no trailing newline), for
    /// appending to a `.jsonl` durable log.
    pub fn to_json_line(&self) -> Result<String, EventCodecError> {
        serde_json::to_string(self).map_err(|e| EventCodecError::Malformed(e.to_string()))
    }

    /// Deserialize one JSON line back into an `Event`.
    ///
    /// Checks the `kind` tag independently so an unrecognized kind
    /// produces [`EventCodecError::UnknownKind`] with the original bytes
    /// intact, rather than a generic parse failure.
    pub fn from_json_line(line: &str) -> Result<Event, EventCodecError> {
        let raw: RawEvent =
            serde_json::from_str(line).map_err(|e| EventCodecError::Malformed(e.to_string()))?;

        let kind = known_kind_from_str(&raw.kind).ok_or_else(|| EventCodecError::UnknownKind {
            kind: raw.kind.clone(),
            raw: line.as_bytes().to_vec(),
        })?;

        Ok(Event {
            seq: raw.seq,
            kind,
            timestamp: raw.timestamp,
            correlation_id: raw.correlation_id,
            from_agent: raw.from_agent,
            to_agent: raw.to_agent,
            path: raw.path,
            tags: raw.tags,
            payload: raw.payload,
        })
    }

    /// A structural view used by the subscription matcher without
    /// deserializing the full payload (§4.1).
    pub fn structural(&self) -> StructuralMatch<'_> {
        StructuralMatch {
            kind: self.kind,
            from_agent: self.from_agent.as_deref(),
            to_agent: self.to_agent.as_deref(),
            path: self.path.as_deref(),
            tags: &self.tags,
        }
    }
}

fn known_kind_from_str(s: &str) -> Option<EventKind> {
    // `EventKind` derives `Deserialize` with its default (variant-name) tag
    // representation, so reuse that instead of hand-listing every arm.
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

/// Borrowed, payload-free view of an [`Event`] for pattern matching.
#[derive(Debug, Clone, Copy)]
pub struct StructuralMatch<'a> {
    pub kind: EventKind,
    pub from_agent: Option<&'a str>,
    pub to_agent: Option<&'a str>,
    pub path: Option<&'a str>,
    pub tags: &'a HashSet<String>,
}
