//! Normalized change events

use std::fmt;

/// Kind of change observed for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Object appeared
    Create,
    /// Object changed, or was replayed by a resync
    Update,
    /// Object disappeared
    Delete,
}

impl EventType {
    /// Wire name, as it appears in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pending work for one object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    /// `namespace/name` of the object
    pub key: String,
    /// What happened to it
    pub event_type: EventType,
}

impl Event {
    /// Create an event
    pub fn new(key: impl Into<String>, event_type: EventType) -> Self {
        Self {
            key: key.into(),
            event_type,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event_type, self.key)
    }
}
