//! Event records shared by the bus, the log, and live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::str::FromStr;

/// Free-form event payload.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Payload key set on events that were re-injected by replay.
pub const REPLAYED_KEY: &str = "_replayed";

/// An immutable record of something that happened to a repository.
///
/// Serialized as one JSON object with the fields `id`, `type`, `repo`,
/// `payload` (omitted when absent) and `timestamp` (RFC 3339).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: String,
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(rename = "repo")]
    repo_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Payload>,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event stamped with a fresh ID and the current time.
    pub fn new(
        event_type: impl Into<EventType>,
        repo_name: impl Into<String>,
        payload: Option<Payload>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            repo_name: repo_name.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Unique event ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Event type.
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Name of the repository involved.
    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    /// Event payload, if any.
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// When the event was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Tag this event as re-injected. Existing payload keys are kept.
    pub fn mark_replayed(&mut self) {
        self.payload
            .get_or_insert_with(Payload::new)
            .insert(REPLAYED_KEY.to_string(), serde_json::Value::Bool(true));
    }

    /// Whether this event carries the replay marker.
    pub fn is_replayed(&self) -> bool {
        self.payload
            .as_ref()
            .and_then(|p| p.get(REPLAYED_KEY))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }
}

/// Event type identifier.
///
/// Known types get their own variant; anything else is carried verbatim so
/// that logs written by newer versions still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// A repository was registered.
    RepoAdded,
    /// A repository was unregistered.
    RepoRemoved,
    /// A push (receive-pack) completed.
    GitPush,
    /// A tag was created, moved or deleted by a push.
    GitTag,
    /// Any other type string.
    Other(String),
}

impl EventType {
    /// The wire representation of this type.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::RepoAdded => "repo.added",
            EventType::RepoRemoved => "repo.removed",
            EventType::GitPush => "git.push",
            EventType::GitTag => "git.tag",
            EventType::Other(s) => s,
        }
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "repo.added" => EventType::RepoAdded,
            "repo.removed" => EventType::RepoRemoved,
            "git.push" => EventType::GitPush,
            "git.tag" => EventType::GitTag,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match EventType::from(s.as_str()) {
            EventType::Other(_) => EventType::Other(s),
            known => known,
        }
    }
}

impl From<EventType> for String {
    fn from(t: EventType) -> Self {
        match t {
            EventType::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl FromStr for EventType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventType::from(s))
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_creation() {
        let event = Event::new(EventType::GitPush, "demo", None);

        assert!(!event.id().is_empty());
        assert_eq!(event.event_type(), &EventType::GitPush);
        assert_eq!(event.repo_name(), "demo");
        assert!(event.payload().is_none());
    }

    #[test]
    fn test_event_ids_are_unique() {
        let a = Event::new(EventType::RepoAdded, "demo", None);
        let b = Event::new(EventType::RepoAdded, "demo", None);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_event_wire_format() {
        let payload = json!({"bare": "/tmp/demo.git"}).as_object().cloned();
        let event = Event::new(EventType::RepoAdded, "demo", payload);

        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "repo.added");
        assert_eq!(value["repo"], "demo");
        assert_eq!(value["payload"]["bare"], "/tmp/demo.git");
        assert!(value["timestamp"].is_string());
        assert!(value["id"].is_string());
    }

    #[test]
    fn test_payload_omitted_when_absent() {
        let event = Event::new(EventType::RepoRemoved, "demo", None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("payload"));
    }

    #[test]
    fn test_unknown_fields_and_types_are_tolerated() {
        let line = r#"{"id":"abc","type":"ci.finished","repo":"demo","payload":{"x":1},"timestamp":"2025-01-02T03:04:05.123456+08:00","extra":true}"#;
        let event: Event = serde_json::from_str(line).unwrap();

        assert_eq!(event.id(), "abc");
        assert_eq!(event.event_type(), &EventType::Other("ci.finished".into()));
        assert_eq!(event.payload().unwrap()["x"], 1);

        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["type"], "ci.finished");
    }

    #[test]
    fn test_mark_replayed_preserves_fields() {
        let payload = json!({"changes": {}}).as_object().cloned();
        let mut event = Event::new(EventType::GitPush, "demo", payload);
        let id = event.id().to_string();
        let ts = event.timestamp();

        assert!(!event.is_replayed());
        event.mark_replayed();

        assert!(event.is_replayed());
        assert_eq!(event.id(), id);
        assert_eq!(event.timestamp(), ts);
        assert!(event.payload().unwrap().contains_key("changes"));
    }

    #[test]
    fn test_mark_replayed_creates_payload() {
        let mut event = Event::new(EventType::RepoAdded, "demo", None);
        event.mark_replayed();
        assert_eq!(event.payload().unwrap()[REPLAYED_KEY], true);
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(EventType::GitPush.to_string(), "git.push");
        assert_eq!(EventType::RepoAdded.to_string(), "repo.added");
        assert_eq!("git.tag".parse::<EventType>().unwrap(), EventType::GitTag);
    }
}
