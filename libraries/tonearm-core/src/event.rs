//! Playback events and the per-type handler registry

use crate::error::{BackendError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Kinds of events raised by backends and the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StateChanged,
    PositionChanged,
    VolumeChanged,
    TrackChanged,
    Error,
    Buffering,
    BackendSwitched,
}

impl EventType {
    /// Wire name of this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateChanged => "state_changed",
            Self::PositionChanged => "position_changed",
            Self::VolumeChanged => "volume_changed",
            Self::TrackChanged => "track_changed",
            Self::Error => "error",
            Self::Buffering => "buffering",
            Self::BackendSwitched => "backend_switched",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "state_changed" => Some(Self::StateChanged),
            "position_changed" => Some(Self::PositionChanged),
            "volume_changed" => Some(Self::VolumeChanged),
            "track_changed" => Some(Self::TrackChanged),
            "error" => Some(Self::Error),
            "buffering" => Some(Self::Buffering),
            "backend_switched" => Some(Self::BackendSwitched),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observable change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: BTreeMap<String, serde_json::Value>,

    /// Name of the backend or component that raised the event
    pub source: String,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data: BTreeMap::new(),
            source: source.into(),
        }
    }

    /// Attach a payload field
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(|v| v.as_f64())
    }
}

/// Observer callback
///
/// Handlers are invoked concurrently from detached tasks and must not assume
/// any ordering between events.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handlers grouped by event type
///
/// Identity for removal is pointer equality of the `Arc`.
#[derive(Clone, Default)]
pub struct EventHandlers {
    by_type: BTreeMap<EventType, Vec<EventHandler>>,
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: BTreeMap<_, _> = self
            .by_type
            .iter()
            .map(|(event_type, handlers)| (event_type.as_str(), handlers.len()))
            .collect();
        f.debug_struct("EventHandlers").field("counts", &counts).finish()
    }
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event_type: EventType, handler: EventHandler) {
        self.by_type.entry(event_type).or_default().push(handler);
    }

    /// Remove the first registration of `handler` for `event_type`
    pub fn remove(&mut self, event_type: EventType, handler: &EventHandler) -> Result<()> {
        let handlers = self
            .by_type
            .get_mut(&event_type)
            .ok_or(BackendError::HandlerNotFound)?;
        let index = handlers
            .iter()
            .position(|h| Arc::ptr_eq(h, handler))
            .ok_or(BackendError::HandlerNotFound)?;
        handlers.remove(index);
        if handlers.is_empty() {
            self.by_type.remove(&event_type);
        }
        Ok(())
    }

    /// Snapshot of the handlers registered for one type
    pub fn handlers_for(&self, event_type: EventType) -> Vec<EventHandler> {
        self.by_type.get(&event_type).cloned().unwrap_or_default()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.by_type.get(&event_type).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Every `(type, handler)` registration
    pub fn iter(&self) -> impl Iterator<Item = (EventType, &EventHandler)> {
        self.by_type
            .iter()
            .flat_map(|(event_type, handlers)| handlers.iter().map(move |h| (*event_type, h)))
    }

    pub fn clear(&mut self) {
        self.by_type.clear();
    }
}
