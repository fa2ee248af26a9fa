//! Lookahead cueing of a sequence.
//!
//! A [`Scheduler`] plays one [`Sequence`] against a parent time base. Each
//! timer wake it converts the wall-clock window since its previous wake to
//! a beat window, pulls every entry that falls before the end of it, and
//! hands the batch, converted to wall-clock time, to an [`EventSink`].
//! `sequence` events start child schedulers that live inside their parent
//! and are stopped with it.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::{CueId, Lookup, Nested, PlaybackStatus, RateCurve, Sequence, SequenceRef, TimeBase, Timer, Wake};
use crate::error::{Error, Result, non_negative};
use crate::events::{Event, EventKind, MAX_NESTING, ScheduledEvent, to_note_on_off};
use crate::output::EventSink;

/// Collaborators a cue pass needs.
pub struct CueContext<'a> {
    pub timer: &'a mut Timer,
    pub lookup: &'a dyn Lookup,
    pub sink: &'a mut dyn EventSink,
}

/// Position in an event list. With looping, `lap` counts completed loops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cursor {
    index: usize,
    lap: u64,
}

impl Cursor {
    /// First entry at or after `beat`.
    fn seek(events: &[Event], beat: f64, looping: Option<f64>) -> Self {
        let Some(length) = looping else {
            return Self {
                index: events.partition_point(|e| e.beat < beat),
                lap: 0,
            };
        };

        let count = looped_len(events, length);
        let lap = (beat / length).floor();
        let local = beat - lap * length;
        let mut cursor = Self {
            index: events[..count].partition_point(|e| e.beat < local),
            lap: lap as u64,
        };
        if cursor.index >= count && count > 0 {
            cursor.index = 0;
            cursor.lap += 1;
        }
        cursor
    }

    fn peek<'a>(&self, events: &'a [Event], looping: Option<f64>) -> Option<(f64, &'a Event)> {
        match looping {
            Some(length) => {
                let event = events[..looped_len(events, length)].get(self.index)?;
                Some((event.beat + self.lap as f64 * length, event))
            }
            None => events.get(self.index).map(|event| (event.beat, event)),
        }
    }

    fn advance(&mut self, events: &[Event], looping: Option<f64>) {
        self.index += 1;
        if let Some(length) = looping {
            let count = looped_len(events, length);
            if self.index >= count && count > 0 {
                self.index = 0;
                self.lap += 1;
            }
        }
    }
}

/// Entries that repeat when looping over `length` beats.
fn looped_len(events: &[Event], length: f64) -> usize {
    events.partition_point(|e| e.beat < length)
}

/// Param events of one name.
#[derive(Debug)]
struct ParamTrack {
    events: Vec<Event>,
    cursor: Cursor,
    /// Entry already sent ahead of its window.
    primed: Option<Cursor>,
}

impl ParamTrack {
    fn cue(
        &mut self,
        b2: f64,
        looping: Option<f64>,
        base: &dyn TimeBase,
        target: Option<&str>,
        out: &mut Vec<ScheduledEvent>,
    ) -> Result<()> {
        while let Some((beat, event)) = self.cursor.peek(&self.events, looping) {
            if beat >= b2 {
                break;
            }
            let kind = event.kind.clone();
            let primed = self.primed == Some(self.cursor);
            self.cursor.advance(&self.events, looping);
            if !primed {
                out.push(schedule_event(base, beat, kind, target)?);
            }
        }

        // Ramps need their end point before the window they end in.
        if let Some((beat, event)) = self.cursor.peek(&self.events, looping) {
            if event.is_transition() && self.primed != Some(self.cursor) {
                out.push(schedule_event(base, beat, event.kind.clone(), target)?);
                self.primed = Some(self.cursor);
            }
        }
        Ok(())
    }

    fn exhausted(&self, looping: Option<f64>) -> bool {
        self.cursor.peek(&self.events, looping).is_none()
    }
}

/// Groups param events by name, in order of first appearance.
fn param_tracks(sequence: &Sequence) -> Vec<ParamTrack> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_name: HashMap<&str, Vec<Event>> = HashMap::new();
    for event in sequence.iter() {
        if let EventKind::Param { name, .. } = &event.kind {
            by_name
                .entry(name.as_str())
                .or_insert_with(|| {
                    order.push(name.as_str());
                    Vec::new()
                })
                .push(event.clone());
        }
    }

    order
        .into_iter()
        .filter_map(|name| by_name.remove(name))
        .map(|events| ParamTrack {
            events,
            cursor: Cursor::default(),
            primed: None,
        })
        .collect()
}

fn schedule_event(
    base: &dyn TimeBase,
    beat: f64,
    kind: EventKind,
    target: Option<&str>,
) -> Result<ScheduledEvent> {
    let time = base.time_at_beat(beat)?;
    let kind = match kind {
        EventKind::Param {
            name,
            value,
            curve,
            duration: Some(duration),
        } => EventKind::Param {
            name,
            value,
            curve,
            duration: Some(base.time_at_beat(beat + duration)? - time),
        },
        kind => kind,
    };
    Ok(ScheduledEvent {
        time,
        target: target.map(str::to_string),
        kind,
    })
}

#[derive(Debug)]
pub struct Scheduler {
    id: CueId,
    sequence: Arc<Sequence>,
    target: Option<String>,
    /// Local beats per parent beat.
    rate: Arc<RateCurve>,
    /// Everything but rate and param events, notes split into on and off.
    events: Vec<Event>,
    params: Vec<ParamTrack>,
    cursor: Cursor,
    status: PlaybackStatus,
    start_time: f64,
    stop_time: Option<f64>,
    /// Parent beat at local beat 0.
    origin: f64,
    /// End of the last window cued.
    t2: f64,
    children: Vec<Scheduler>,
    looping: Option<f64>,
    depth: usize,
}

impl Scheduler {
    pub fn new(timer: &mut Timer, sequence: Arc<Sequence>, target: Option<String>) -> Result<Self> {
        let rate = RateCurve::from_events(sequence.iter(), 1.0)?;

        let mut events: Vec<Event> = sequence
            .iter()
            .filter(|e| !matches!(e.kind, EventKind::Rate { .. } | EventKind::Param { .. }))
            .flat_map(to_note_on_off)
            .collect();
        events.sort_by(|a, b| a.beat.total_cmp(&b.beat));

        let params = param_tracks(&sequence);

        Ok(Self {
            id: timer.register(),
            sequence,
            target,
            rate: Arc::new(rate),
            events,
            params,
            cursor: Cursor::default(),
            status: PlaybackStatus::Idle,
            start_time: 0.0,
            stop_time: None,
            origin: 0.0,
            t2: 0.0,
            children: Vec::new(),
            looping: None,
            depth: 0,
        })
    }

    pub fn id(&self) -> CueId {
        self.id
    }

    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn stop_time(&self) -> Option<f64> {
        self.stop_time
    }

    /// Number of nested sequences currently playing.
    pub fn active_children(&self) -> usize {
        self.children.len()
    }

    pub fn looping(&self) -> Option<f64> {
        self.looping
    }

    /// Repeats the events in `[0, length)` beats forever. Only allowed while
    /// not playing.
    pub fn set_looping(&mut self, length: Option<f64>) -> Result<()> {
        if self.status == PlaybackStatus::Playing {
            return Err(Error::State {
                operation: "change looping",
                status: self.status,
            });
        }
        if let Some(length) = length {
            if non_negative("loop length", length)? == 0.0 {
                return Err(Error::InvalidValue {
                    what: "loop length",
                    value: length,
                });
            }
        }
        self.looping = length;
        Ok(())
    }

    /// This scheduler's time base on top of `parent`.
    pub fn time_base<'a>(&'a self, parent: &'a dyn TimeBase) -> Nested<'a> {
        Nested {
            parent,
            origin: self.origin,
            rate: &self.rate,
        }
    }

    pub fn beat_at_time(&self, parent: &dyn TimeBase, time: f64) -> Result<f64> {
        self.time_base(parent).beat_at_time(time)
    }

    pub fn time_at_beat(&self, parent: &dyn TimeBase, beat: f64) -> Result<f64> {
        self.time_base(parent).time_at_beat(beat)
    }

    /// Starts playing so that local `beat` falls at `time`. A playing
    /// scheduler is stopped at `time` first.
    ///
    /// Entries already inside the timer's current window are cued
    /// immediately.
    pub fn start(
        &mut self,
        time: f64,
        beat: f64,
        parent: &dyn TimeBase,
        ctx: &mut CueContext<'_>,
    ) -> Result<()> {
        let time = non_negative("start time", time)?;
        let beat = non_negative("start beat", beat)?;
        if self.status == PlaybackStatus::Playing {
            self.stop(time, ctx.timer)?;
        }

        let origin = parent.beat_at_time(time)? - self.rate.time_at_beat(beat)?;
        self.begin(time, origin, beat);
        debug!(id = %self.id, time, beat, "sequence started");

        let mut batch = Vec::new();
        let result = self.collect_window(
            ctx.timer.last_cue_time(),
            parent,
            ctx.timer,
            ctx.lookup,
            &mut batch,
        );
        ctx.timer.request(self.id);
        deliver(batch, ctx.sink)?;
        result
    }

    /// Stops playback and every nested sequence. Stopping a finished
    /// scheduler does nothing.
    pub fn stop(&mut self, time: f64, timer: &mut Timer) -> Result<()> {
        let time = non_negative("stop time", time)?;
        match self.status {
            PlaybackStatus::Idle => Err(Error::State {
                operation: "stop",
                status: self.status,
            }),
            PlaybackStatus::Done => Ok(()),
            PlaybackStatus::Playing => {
                debug!(id = %self.id, time, "sequence stopped");
                self.halt(time.max(self.start_time), timer);
                Ok(())
            }
        }
    }

    /// Handles one timer wake and delivers whatever became due.
    pub fn cue(&mut self, wake: &Wake, parent: &dyn TimeBase, ctx: &mut CueContext<'_>) -> Result<()> {
        let mut batch = Vec::new();
        let result = self.collect(wake, parent, ctx.timer, ctx.lookup, &mut batch);
        deliver(batch, ctx.sink)?;
        result
    }

    fn begin(&mut self, time: f64, origin: f64, beat: f64) {
        let looping = self.looping;
        self.children.clear();
        self.origin = origin;
        self.start_time = time;
        self.stop_time = None;
        self.t2 = time;
        self.cursor = Cursor::seek(&self.events, beat, looping);
        for track in &mut self.params {
            track.cursor = Cursor::seek(&track.events, beat, looping);
            track.primed = None;
        }
        self.status = PlaybackStatus::Playing;
    }

    fn halt(&mut self, time: f64, timer: &mut Timer) {
        timer.cancel(self.id);
        for child in &mut self.children {
            child.halt(time, timer);
        }
        self.children.clear();
        self.stop_time = Some(time);
        self.status = PlaybackStatus::Done;
    }

    fn exhausted(&self) -> bool {
        self.cursor.peek(&self.events, self.looping).is_none()
            && self.params.iter().all(|track| track.exhausted(self.looping))
    }

    fn collect(
        &mut self,
        wake: &Wake,
        parent: &dyn TimeBase,
        timer: &mut Timer,
        lookup: &dyn Lookup,
        out: &mut Vec<ScheduledEvent>,
    ) -> Result<()> {
        if self.status != PlaybackStatus::Playing {
            return Ok(());
        }

        if wake.is_due(self.id) {
            if let Err(error) = self.collect_window(wake.time, parent, timer, lookup, out) {
                self.halt(self.t2, timer);
                return Err(error);
            }
            timer.request(self.id);
        }

        if !self.children.is_empty() {
            let rate = Arc::clone(&self.rate);
            let base = Nested {
                parent,
                origin: self.origin,
                rate: &rate,
            };
            for child in &mut self.children {
                if let Err(error) = child.collect(wake, &base, timer, lookup, out) {
                    warn!(%error, id = %child.id, "nested sequence failed and was stopped");
                }
            }
            self.children.retain(|child| child.status == PlaybackStatus::Playing);
        }

        let past_stop = self.stop_time.is_some_and(|stop| self.t2 >= stop);
        if past_stop || (self.looping.is_none() && self.children.is_empty() && self.exhausted()) {
            let time = self.stop_time.unwrap_or(self.t2);
            debug!(id = %self.id, time, "sequence finished");
            self.halt(time, timer);
        }
        Ok(())
    }

    /// Cues everything between the end of the previous window and `t2`.
    fn collect_window(
        &mut self,
        t2: f64,
        parent: &dyn TimeBase,
        timer: &mut Timer,
        lookup: &dyn Lookup,
        out: &mut Vec<ScheduledEvent>,
    ) -> Result<()> {
        let t1 = self.t2;
        if t2 <= t1 {
            return Ok(());
        }
        self.t2 = t2;

        let w1 = t1.max(self.start_time);
        let w2 = self.stop_time.map_or(t2, |stop| t2.min(stop));
        if w2 <= w1 {
            return Ok(());
        }

        let rate = Arc::clone(&self.rate);
        let base = Nested {
            parent,
            origin: self.origin,
            rate: &rate,
        };
        let b2 = base.beat_at_time(w2)?;
        trace!(id = %self.id, t1 = w1, t2 = w2, b2, "cue window");

        let looping = self.looping;
        for track in &mut self.params {
            track.cue(b2, looping, &base, self.target.as_deref(), out)?;
        }

        while let Some((beat, event)) = self.cursor.peek(&self.events, looping) {
            if beat >= b2 {
                break;
            }
            let kind = event.kind.clone();
            self.cursor.advance(&self.events, looping);

            match kind {
                EventKind::Sequence {
                    source,
                    target,
                    duration,
                    ..
                } => {
                    if let Err(error) =
                        self.spawn(&base, beat, &source, target, duration, timer, lookup, out)
                    {
                        warn!(%error, %source, beat, "nested sequence could not start");
                    }
                }
                kind => out.push(schedule_event(&base, beat, kind, self.target.as_deref())?),
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn(
        &mut self,
        base: &dyn TimeBase,
        beat: f64,
        source: &SequenceRef,
        target: Option<String>,
        duration: f64,
        timer: &mut Timer,
        lookup: &dyn Lookup,
        out: &mut Vec<ScheduledEvent>,
    ) -> Result<()> {
        if self.depth + 1 >= MAX_NESTING {
            warn!(%source, depth = self.depth, "sequence nesting too deep, event dropped");
            return Ok(());
        }
        let sequence = lookup
            .find(source)
            .ok_or_else(|| Error::NotFound(source.to_string()))?;

        let target = target.or_else(|| self.target.clone());
        let mut child = Scheduler::new(timer, sequence, target)?;
        child.depth = self.depth + 1;

        let time = base.time_at_beat(beat)?;
        child.begin(time, beat, 0.0);
        if duration > 0.0 {
            child.stop_time = Some(base.time_at_beat(beat + duration)?);
        }
        debug!(id = %child.id, parent = %self.id, %source, beat, time, "nested sequence started");

        child.collect_window(timer.last_cue_time(), base, timer, lookup, out)?;
        timer.request(child.id);
        self.children.push(child);
        Ok(())
    }
}

/// Sends a batch in time order. A full sink drops the batch with a warning.
fn deliver(mut batch: Vec<ScheduledEvent>, sink: &mut dyn EventSink) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    batch.sort_by(|a, b| a.time.total_cmp(&b.time));
    match sink.push(&batch) {
        Err(Error::BufferFull) => {
            warn!(dropped = batch.len(), "event sink full, batch dropped");
            Ok(())
        }
        result => result,
    }
}
