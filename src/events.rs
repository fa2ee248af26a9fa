//! Event records.
//!
//! On disk and on the wire an event is a flat tuple,
//! `[beat, kind, ...fields]`, e.g. `[0.5, "note", 60, 0.8, 1]`. In memory it
//! is an [`Event`] carrying a typed [`EventKind`]. Conversion between the two
//! checks the field count and field types for the kind and rejects anything
//! it does not recognise.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::automation::Curve;
use crate::error::{Error, Result, finite, non_negative};
use crate::timing::{Lookup, Sequence, SequenceRef};

/// Nesting depth past which sequence references are no longer followed.
pub const MAX_NESTING: usize = 32;

/// One field of a raw event tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Field {
    Number(f64),
    Text(String),
    Events(Vec<RawEvent>),
}

/// An event in its tuple form.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawEvent(pub Vec<Field>);

impl RawEvent {
    pub fn kind(&self) -> Option<&str> {
        match self.0.get(1) {
            Some(Field::Text(kind)) => Some(kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Tempo change, in beats per unit of the parent time base.
    Rate { value: f64, curve: Curve },
    Meter { numerator: u32, denominator: u32 },
    Note {
        number: f32,
        velocity: f32,
        duration: f64,
    },
    NoteOn { number: f32, velocity: f32 },
    NoteOff { number: f32, velocity: Option<f32> },
    Param {
        name: String,
        value: f32,
        curve: Curve,
        duration: Option<f64>,
    },
    Pitch { semitones: f64 },
    /// A nested event list played from this event's beat.
    Sequence {
        source: SequenceRef,
        target: Option<String>,
        duration: f64,
        /// Trailing transform arguments, carried through untouched.
        args: Vec<Field>,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Rate { .. } => "rate",
            EventKind::Meter { .. } => "meter",
            EventKind::Note { .. } => "note",
            EventKind::NoteOn { .. } => "noteon",
            EventKind::NoteOff { .. } => "noteoff",
            EventKind::Param { .. } => "param",
            EventKind::Pitch { .. } => "pitch",
            EventKind::Sequence { .. } => "sequence",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEvent", into = "RawEvent")]
pub struct Event {
    pub beat: f64,
    pub kind: EventKind,
}

impl Event {
    pub fn new(beat: f64, kind: EventKind) -> Self {
        Self { beat, kind }
    }

    pub fn note(beat: f64, number: f32, velocity: f32, duration: f64) -> Self {
        Self::new(
            beat,
            EventKind::Note {
                number,
                velocity,
                duration,
            },
        )
    }

    pub fn param(beat: f64, name: &str, value: f32, curve: Curve, duration: Option<f64>) -> Self {
        Self::new(
            beat,
            EventKind::Param {
                name: name.to_string(),
                value,
                curve,
                duration,
            },
        )
    }

    pub fn rate(beat: f64, value: f64, curve: Curve) -> Self {
        Self::new(beat, EventKind::Rate { value, curve })
    }

    pub fn sequence(beat: f64, source: SequenceRef, target: Option<&str>, duration: f64) -> Self {
        Self::new(
            beat,
            EventKind::Sequence {
                source,
                target: target.map(str::to_string),
                duration,
                args: Vec::new(),
            },
        )
    }

    pub fn is_transition(&self) -> bool {
        matches!(&self.kind, EventKind::Param { curve, .. } if curve.is_transition())
    }
}

/// Describes the tuple shape expected for `kind`.
pub fn validation_hint(kind: &str) -> &'static str {
    match kind {
        "note" => "should be of the form [beat, \"note\", number, velocity, duration]",
        "noteon" => "should be of the form [beat, \"noteon\", number, velocity]",
        "noteoff" => "should be of the form [beat, \"noteoff\", number]",
        "meter" => "should be of the form [beat, \"meter\", numerator, denominator]",
        "rate" => "should be of the form [beat, \"rate\", number, curve]",
        "pitch" => "should be of the form [beat, \"pitch\", semitones]",
        "sequence" => "should be of the form [beat, \"sequence\", id, target, duration, ...]",
        _ => "probably should be of the form [beat, \"param\", name, value, curve]",
    }
}

/// Field counts, including beat and kind, accepted for each kind.
fn arity_ok(kind: &str, len: usize) -> Result<bool> {
    Ok(match kind {
        "note" => len == 5,
        "noteon" => len == 4,
        "noteoff" => len == 3 || len == 4,
        "meter" => len == 4,
        "rate" => len == 3 || len == 4,
        "param" => len == 5 || len == 6,
        "pitch" => len == 3,
        "sequence" => len >= 5,
        other => return Err(Error::UnknownKind(other.to_string())),
    })
}

pub fn is_valid_event(raw: &RawEvent) -> bool {
    Event::try_from(raw.clone()).is_ok()
}

struct Fields<'a> {
    kind: &'a str,
    fields: &'a [Field],
}

impl<'a> Fields<'a> {
    fn invalid(&self) -> Error {
        Error::InvalidEvent {
            kind: self.kind.to_string(),
            hint: validation_hint(self.kind),
        }
    }

    fn number(&self, i: usize) -> Result<f64> {
        match self.fields.get(i) {
            Some(Field::Number(n)) => finite("event field", *n),
            _ => Err(self.invalid()),
        }
    }

    fn text(&self, i: usize) -> Result<&'a str> {
        match self.fields.get(i) {
            Some(Field::Text(s)) => Ok(s),
            _ => Err(self.invalid()),
        }
    }

    fn integer(&self, i: usize, min: u32) -> Result<u32> {
        let n = self.number(i)?;
        if n < min as f64 || n.fract() != 0.0 || n > u32::MAX as f64 {
            return Err(Error::InvalidValue {
                what: "event count field",
                value: n,
            });
        }
        Ok(n as u32)
    }
}

impl TryFrom<RawEvent> for Event {
    type Error = Error;

    fn try_from(raw: RawEvent) -> Result<Self> {
        let fields = raw.0;
        let Some(Field::Text(kind)) = fields.get(1) else {
            return Err(Error::InvalidEvent {
                kind: String::from("?"),
                hint: validation_hint(""),
            });
        };
        if !arity_ok(kind, fields.len())? {
            return Err(Error::InvalidEvent {
                kind: kind.clone(),
                hint: validation_hint(kind),
            });
        }

        let f = Fields {
            kind: kind.as_str(),
            fields: &fields,
        };
        let beat = non_negative("event beat", f.number(0)?)?;

        let kind = match f.kind {
            "rate" => {
                let value = f.number(2)?;
                if value <= 0.0 {
                    return Err(Error::InvalidValue {
                        what: "rate",
                        value,
                    });
                }
                let curve = match fields.get(3) {
                    Some(_) => f.text(3)?.parse()?,
                    None => Curve::Step,
                };
                if !matches!(curve, Curve::Step | Curve::Exponential) {
                    return Err(Error::InvalidCurve {
                        what: "rate events",
                        curve: curve.to_string(),
                    });
                }
                EventKind::Rate { value, curve }
            }
            "meter" => EventKind::Meter {
                numerator: f.integer(2, 1)?,
                denominator: f.integer(3, 1)?,
            },
            "note" => EventKind::Note {
                number: f.number(2)? as f32,
                velocity: f.number(3)? as f32,
                duration: non_negative("note duration", f.number(4)?)?,
            },
            "noteon" => EventKind::NoteOn {
                number: f.number(2)? as f32,
                velocity: f.number(3)? as f32,
            },
            "noteoff" => EventKind::NoteOff {
                number: f.number(2)? as f32,
                velocity: match fields.get(3) {
                    Some(_) => Some(f.number(3)? as f32),
                    None => None,
                },
            },
            "param" => {
                let curve: Curve = f.text(4)?.parse()?;
                let duration = match fields.get(5) {
                    Some(_) => Some(non_negative("param duration", f.number(5)?)?),
                    None => None,
                };
                match curve {
                    Curve::Target if duration.is_none() => return Err(Error::MissingDuration),
                    Curve::Curve => {
                        return Err(Error::InvalidCurve {
                            what: "param events",
                            curve: curve.to_string(),
                        });
                    }
                    _ => {}
                }
                EventKind::Param {
                    name: f.text(2)?.to_string(),
                    value: f.number(3)? as f32,
                    curve,
                    duration,
                }
            }
            "pitch" => EventKind::Pitch {
                semitones: f.number(2)?,
            },
            "sequence" => {
                let source = match &fields[2] {
                    Field::Text(name) => SequenceRef::Name(name.clone()),
                    Field::Number(_) => SequenceRef::Id(f.integer(2, 0)?),
                    Field::Events(events) => {
                        let events = events
                            .iter()
                            .cloned()
                            .map(Event::try_from)
                            .collect::<Result<Vec<_>>>()?;
                        SequenceRef::Inline(Arc::new(Sequence::from_events(events)))
                    }
                };
                let target = match f.text(3)? {
                    "" => None,
                    target => Some(target.to_string()),
                };
                EventKind::Sequence {
                    source,
                    target,
                    duration: non_negative("sequence duration", f.number(4)?)?,
                    args: fields[5..].to_vec(),
                }
            }
            other => return Err(Error::UnknownKind(other.to_string())),
        };

        Ok(Event { beat, kind })
    }
}

impl From<Event> for RawEvent {
    fn from(event: Event) -> Self {
        let mut fields = vec![
            Field::Number(event.beat),
            Field::Text(event.kind.name().to_string()),
        ];
        match event.kind {
            EventKind::Rate { value, curve } => {
                fields.push(Field::Number(value));
                fields.push(Field::Text(curve.to_string()));
            }
            EventKind::Meter {
                numerator,
                denominator,
            } => {
                fields.push(Field::Number(numerator as f64));
                fields.push(Field::Number(denominator as f64));
            }
            EventKind::Note {
                number,
                velocity,
                duration,
            } => {
                fields.push(Field::Number(number as f64));
                fields.push(Field::Number(velocity as f64));
                fields.push(Field::Number(duration));
            }
            EventKind::NoteOn { number, velocity } => {
                fields.push(Field::Number(number as f64));
                fields.push(Field::Number(velocity as f64));
            }
            EventKind::NoteOff { number, velocity } => {
                fields.push(Field::Number(number as f64));
                if let Some(velocity) = velocity {
                    fields.push(Field::Number(velocity as f64));
                }
            }
            EventKind::Param {
                name,
                value,
                curve,
                duration,
            } => {
                fields.push(Field::Text(name));
                fields.push(Field::Number(value as f64));
                fields.push(Field::Text(curve.to_string()));
                if let Some(duration) = duration {
                    fields.push(Field::Number(duration));
                }
            }
            EventKind::Pitch { semitones } => fields.push(Field::Number(semitones)),
            EventKind::Sequence {
                source,
                target,
                duration,
                args,
            } => {
                fields.push(match source {
                    SequenceRef::Name(name) => Field::Text(name),
                    SequenceRef::Id(id) => Field::Number(id as f64),
                    SequenceRef::Inline(sequence) => Field::Events(
                        sequence.events().iter().cloned().map(RawEvent::from).collect(),
                    ),
                });
                fields.push(Field::Text(target.unwrap_or_default()));
                fields.push(Field::Number(duration));
                fields.extend(args);
            }
        }
        RawEvent(fields)
    }
}

/// Splits a note into a note-on at its beat and a note-off at its end.
/// Other events are returned unchanged.
pub fn to_note_on_off(event: &Event) -> Vec<Event> {
    match event.kind {
        EventKind::Note {
            number,
            velocity,
            duration,
        } => vec![
            Event::new(event.beat, EventKind::NoteOn { number, velocity }),
            Event::new(
                event.beat + duration,
                EventKind::NoteOff {
                    number,
                    velocity: None,
                },
            ),
        ],
        _ => vec![event.clone()],
    }
}

/// Beats an event occupies from its own beat.
pub fn event_duration(event: &Event, lookup: &dyn Lookup) -> f64 {
    span(event, lookup, 0)
}

/// Beats from 0 to the end of the longest event, optionally rounded up to a
/// multiple of `round`.
pub fn events_duration(events: &[Event], round: Option<f64>, lookup: &dyn Lookup) -> f64 {
    extent(events, round, lookup, 0)
}

fn extent(events: &[Event], round: Option<f64>, lookup: &dyn Lookup, depth: usize) -> f64 {
    let duration = events
        .iter()
        .map(|event| event.beat + span(event, lookup, depth))
        .fold(0.0, f64::max);

    match round {
        Some(round) if round > 0.0 => (duration / round).ceil() * round,
        _ => duration,
    }
}

fn span(event: &Event, lookup: &dyn Lookup, depth: usize) -> f64 {
    match &event.kind {
        EventKind::Note { duration, .. } => *duration,
        EventKind::Param {
            curve: Curve::Step, ..
        } => 0.0,
        EventKind::Param { duration, .. } => duration.unwrap_or(0.0),
        EventKind::Sequence { source, .. } => {
            if depth >= MAX_NESTING {
                warn!(depth, "sequence nesting too deep, treating as empty");
                return 0.0;
            }
            match lookup.find(source) {
                Some(sequence) => extent(sequence.events(), Some(1.0), lookup, depth + 1),
                None => {
                    let error = Error::NotFound(source.to_string());
                    warn!(%error, "duration of a missing sequence counts as zero");
                    0.0
                }
            }
        }
        _ => 0.0,
    }
}

/// An event resolved to wall-clock time, ready for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    /// Absolute time in seconds.
    pub time: f64,
    /// Output the event is addressed to, when not the default one.
    pub target: Option<String>,
    /// Payload; param durations are expressed in seconds.
    pub kind: EventKind,
}
