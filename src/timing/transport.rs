//! The global clock.
//!
//! A [`Transport`] maps wall-clock seconds to beats through its rate curve,
//! counting beats from the moment it was started. Sequences played inside
//! other sequences see the world through a [`Nested`] time base, which puts
//! their own rate curve on top of the parent's beats.

use std::fmt;
use tracing::debug;

use super::RateCurve;
use crate::automation::Curve;
use crate::config::TransportConfig;
use crate::error::{Error, Result, finite, non_negative};

/// A bidirectional beat and time mapping.
pub trait TimeBase {
    fn beat_at_time(&self, time: f64) -> Result<f64>;
    fn time_at_beat(&self, beat: f64) -> Result<f64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Playing,
    Done,
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Done => "done",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Transport {
    rate: RateCurve,
    status: PlaybackStatus,
    start_time: Option<f64>,
    stop_time: Option<f64>,
    /// Curve beat at `start_time`.
    start_location: f64,
}

impl Transport {
    pub fn new(config: &TransportConfig) -> Self {
        Self::with_rate(RateCurve::new(config.default_rate))
    }

    pub fn with_rate(rate: RateCurve) -> Self {
        Self {
            rate,
            status: PlaybackStatus::Idle,
            start_time: None,
            stop_time: None,
            start_location: 0.0,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn stop_time(&self) -> Option<f64> {
        self.stop_time
    }

    pub fn start_location(&self) -> f64 {
        self.start_location
    }

    pub fn rate_curve(&self) -> &RateCurve {
        &self.rate
    }

    /// Starts counting beats from `time`. A running transport is stopped at
    /// `time` first.
    pub fn start(&mut self, time: f64) -> Result<()> {
        let time = non_negative("start time", time)?;
        if self.status == PlaybackStatus::Playing {
            self.stop(time)?;
        }

        self.start_location = self.rate.beat_at_time(time)?;
        self.start_time = Some(time);
        self.stop_time = None;
        self.status = PlaybackStatus::Playing;
        debug!(time, location = self.start_location, "transport started");
        Ok(())
    }

    pub fn stop(&mut self, time: f64) -> Result<()> {
        let time = non_negative("stop time", time)?;
        if self.status != PlaybackStatus::Playing {
            return Err(Error::State {
                operation: "stop",
                status: self.status,
            });
        }
        self.stop_time = Some(time);
        self.status = PlaybackStatus::Done;
        debug!(time, "transport stopped");
        Ok(())
    }

    pub fn rate_at_time(&self, time: f64) -> Result<f64> {
        self.rate.rate_at_time(time)
    }

    /// Tempo in beats per minute at `time`.
    pub fn tempo(&self, time: f64) -> Result<f64> {
        Ok(self.rate_at_time(time)? * 60.0)
    }

    /// Steps the tempo to `bpm` from `time` on.
    pub fn set_tempo(&mut self, time: f64, bpm: f64) -> Result<()> {
        let bpm = finite("tempo", bpm)?;
        if bpm <= 0.0 {
            return Err(Error::InvalidValue {
                what: "tempo",
                value: bpm,
            });
        }
        let beat = self.rate.beat_at_time(time)?;
        self.rate.insert(beat, bpm / 60.0, Curve::Step)?;
        if let Some(start_time) = self.start_time {
            self.start_location = self.rate.beat_at_time(start_time)?;
        }
        debug!(time, bpm, "tempo set");
        Ok(())
    }
}

impl TimeBase for Transport {
    fn beat_at_time(&self, time: f64) -> Result<f64> {
        Ok(self.rate.beat_at_time(time)? - self.start_location)
    }

    fn time_at_beat(&self, beat: f64) -> Result<f64> {
        let beat = non_negative("beat", beat)?;
        self.rate.time_at_beat(self.start_location + beat)
    }
}

/// A child time base: `rate` maps the child's beats onto the parent's beats
/// counted from `origin`. Times before the origin resolve to beat 0.
pub struct Nested<'a> {
    pub parent: &'a dyn TimeBase,
    pub origin: f64,
    pub rate: &'a RateCurve,
}

impl TimeBase for Nested<'_> {
    fn beat_at_time(&self, time: f64) -> Result<f64> {
        let parent_beat = self.parent.beat_at_time(time)?;
        self.rate.beat_at_time((parent_beat - self.origin).max(0.0))
    }

    fn time_at_beat(&self, beat: f64) -> Result<f64> {
        let offset = self.rate.time_at_beat(beat)?;
        self.parent.time_at_beat(self.origin + offset)
    }
}
