use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::events::{Event, EventKind, events_duration};

/// An event list kept in ascending beat order.
///
/// Events sharing a beat keep their insertion order, except that a `param`
/// event replaces an earlier one at the same beat with the same name and
/// curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Event>", into = "Vec<Event>")]
pub struct Sequence {
    events: Vec<Event>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut sequence = Self::new();
        for event in events {
            sequence.insert(event);
        }
        sequence
    }

    pub fn insert(&mut self, event: Event) {
        let end = self.events.partition_point(|e| e.beat <= event.beat);

        let replace = match &event.kind {
            EventKind::Param { name, curve, .. } => {
                let start = self.events.partition_point(|e| e.beat < event.beat);
                (start..end).find(|&i| {
                    matches!(
                        &self.events[i].kind,
                        EventKind::Param { name: other, curve: law, .. }
                            if other == name && law == curve
                    )
                })
            }
            _ => None,
        };

        match replace {
            Some(i) => self.events[i] = event,
            None => self.events.insert(end, event),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Length in beats, see [`events_duration`].
    pub fn duration(&self, round: Option<f64>, lookup: &dyn Lookup) -> f64 {
        events_duration(&self.events, round, lookup)
    }
}

impl From<Vec<Event>> for Sequence {
    fn from(events: Vec<Event>) -> Self {
        Self::from_events(events)
    }
}

impl From<Sequence> for Vec<Event> {
    fn from(sequence: Sequence) -> Self {
        sequence.events
    }
}

/// How a `sequence` event names the list it plays.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceRef {
    Name(String),
    Id(u32),
    Inline(Arc<Sequence>),
}

impl fmt::Display for SequenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceRef::Name(name) => write!(f, "\"{name}\""),
            SequenceRef::Id(id) => write!(f, "#{id}"),
            SequenceRef::Inline(sequence) => write!(f, "inline ({} events)", sequence.len()),
        }
    }
}

/// Resolves sequence references.
pub trait Lookup {
    fn find(&self, source: &SequenceRef) -> Option<Arc<Sequence>>;
}

/// Sequences addressable by name, by id, or both.
#[derive(Debug, Clone, Default)]
pub struct Library {
    by_name: HashMap<String, Arc<Sequence>>,
    by_id: HashMap<u32, Arc<Sequence>>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: Option<u32>, name: Option<&str>, sequence: Sequence) -> Arc<Sequence> {
        let sequence = Arc::new(sequence);
        if let Some(id) = id {
            self.by_id.insert(id, sequence.clone());
        }
        if let Some(name) = name {
            self.by_name.insert(name.to_string(), sequence.clone());
        }
        sequence
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.by_id.is_empty()
    }
}

impl Lookup for Library {
    fn find(&self, source: &SequenceRef) -> Option<Arc<Sequence>> {
        match source {
            SequenceRef::Name(name) => self.by_name.get(name).cloned(),
            SequenceRef::Id(id) => self.by_id.get(id).cloned(),
            SequenceRef::Inline(sequence) => Some(sequence.clone()),
        }
    }
}
