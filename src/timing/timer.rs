//! Lookahead wake-ups for cueing subscribers.

use std::fmt;
use tracing::{debug, trace};

use super::Clock;
use crate::config::TimerConfig;

/// Identity of a timer subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CueId(u64);

impl fmt::Display for CueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cue#{}", self.0)
    }
}

/// One tick of the timer: the end of the reachable window and the
/// subscribers that asked to be woken for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Wake {
    pub time: f64,
    due: Vec<CueId>,
}

impl Wake {
    pub fn new(time: f64, due: Vec<CueId>) -> Self {
        Self { time, due }
    }

    pub fn is_due(&self, id: CueId) -> bool {
        self.due.contains(&id)
    }

    pub fn due(&self) -> &[CueId] {
        &self.due
    }
}

/// Lookahead driver.
///
/// Subscribers ask for exactly one wake at a time with [`Timer::request`].
/// Each [`Timer::frame`] hands out the pending requests and forgets them, so
/// a subscriber that wants to keep running requests again while handling
/// the wake. With nothing requested the timer goes inactive and the owner
/// can stop ticking it.
pub struct Timer {
    clock: Box<dyn Clock + Send>,
    duration: f64,
    lookahead: f64,
    next_id: u64,
    requests: Vec<CueId>,
    last_cue_time: f64,
    active: bool,
}

impl Timer {
    pub fn new(config: &TimerConfig, clock: impl Clock + Send + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            duration: config.duration,
            lookahead: config.lookahead,
            next_id: 0,
            requests: Vec::new(),
            last_cue_time: 0.0,
            active: false,
        }
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Seconds between frames.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn lookahead(&self) -> f64 {
        self.lookahead
    }

    /// Window end handed out by the most recent frame.
    pub fn last_cue_time(&self) -> f64 {
        self.last_cue_time
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn register(&mut self) -> CueId {
        let id = CueId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Asks for `id` to be included in the next frame.
    pub fn request(&mut self, id: CueId) {
        if !self.requests.contains(&id) {
            self.requests.push(id);
        }
        if !self.active {
            debug!("timer started");
            self.active = true;
        }
    }

    /// Withdraws a pending request. Returns whether one was pending.
    pub fn cancel(&mut self, id: CueId) -> bool {
        let before = self.requests.len();
        self.requests.retain(|&pending| pending != id);
        let removed = self.requests.len() != before;
        if removed && self.requests.is_empty() {
            debug!("timer stopped, no pending requests");
            self.active = false;
        }
        removed
    }

    /// Runs one tick. The pending requests are snapshotted before `dispatch`
    /// runs, so requests and cancellations made while handling the wake only
    /// affect the next frame.
    pub fn frame(&mut self, mut dispatch: impl FnMut(&Wake, &mut Timer)) {
        let time = self.clock.now() + self.duration + self.lookahead;
        let due = std::mem::take(&mut self.requests);
        self.last_cue_time = time;
        trace!(time, due = due.len(), "timer frame");

        let wake = Wake::new(time, due);
        dispatch(&wake, self);

        if self.requests.is_empty() && self.active {
            debug!("timer stopped, no pending requests");
            self.active = false;
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("duration", &self.duration)
            .field("lookahead", &self.lookahead)
            .field("requests", &self.requests)
            .field("last_cue_time", &self.last_cue_time)
            .field("active", &self.active)
            .finish()
    }
}
