//! Beat and time conversion over a piecewise tempo curve.
//!
//! Rate segments are keyed by beat. A segment describes how the rate
//! travels from the previous segment to this one: a step holds the previous
//! rate until the segment's beat, an exponential segment glides at a
//! constant ratio per beat. Both directions integrate the rate in closed
//! form, so they are exact inverses of each other.

use tracing::trace;

use crate::automation::Curve;
use crate::error::{Error, Result, finite, non_negative};
use crate::events::{Event, EventKind};

/// `x^(1/n)`
pub fn root(n: f64, x: f64) -> f64 {
    x.powf(1.0 / n)
}

/// Logarithm of `x` in base `n`.
pub fn log(n: f64, x: f64) -> f64 {
    x.ln() / n.ln()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSegment {
    pub beat: f64,
    /// Beats per unit of the parent time base.
    pub rate: f64,
    pub curve: Curve,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateCurve {
    /// Never empty; the first entry is the anchor at beat 0.
    segments: Vec<RateSegment>,
}

impl RateCurve {
    pub fn new(default_rate: f64) -> Self {
        Self {
            segments: vec![RateSegment {
                beat: 0.0,
                rate: default_rate,
                curve: Curve::Step,
            }],
        }
    }

    /// Builds a curve from the `rate` events of an event list.
    pub fn from_events<'a>(
        events: impl IntoIterator<Item = &'a Event>,
        default_rate: f64,
    ) -> Result<Self> {
        let mut curve = Self::new(default_rate);
        for event in events {
            if let EventKind::Rate { value, curve: law } = event.kind {
                curve.insert(event.beat, value, law)?;
            }
        }
        Ok(curve)
    }

    pub fn segments(&self) -> &[RateSegment] {
        &self.segments
    }

    /// Adds a rate change. A change at the same beat with the same curve
    /// replaces the existing one.
    pub fn insert(&mut self, beat: f64, rate: f64, curve: Curve) -> Result<()> {
        let beat = non_negative("rate beat", beat)?;
        let rate = finite("rate", rate)?;
        if rate <= 0.0 {
            return Err(Error::InvalidValue { what: "rate", value: rate });
        }
        if !matches!(curve, Curve::Step | Curve::Exponential) {
            return Err(Error::InvalidCurve {
                what: "rate",
                curve: curve.to_string(),
            });
        }

        let segment = RateSegment { beat, rate, curve };
        let mut i = self.segments.partition_point(|s| s.beat < beat);
        while let Some(existing) = self.segments.get(i) {
            if existing.beat != beat {
                break;
            }
            if existing.curve == curve {
                self.segments[i] = segment;
                return Ok(());
            }
            i += 1;
        }
        trace!(beat, rate, %curve, "rate change");
        self.segments.insert(i, segment);
        Ok(())
    }

    pub fn rate_at_beat(&self, beat: f64) -> Result<f64> {
        let beat = non_negative("beat", beat)?;
        let next = self.segments.partition_point(|s| s.beat <= beat);
        let e0 = self.segments[next.saturating_sub(1)];

        Ok(match self.segments.get(next) {
            Some(e1) if e1.curve == Curve::Exponential => match growth(e0, *e1) {
                Some(a) => e0.rate * a.powf(beat - e0.beat),
                None => e0.rate,
            },
            _ => e0.rate,
        })
    }

    pub fn rate_at_time(&self, time: f64) -> Result<f64> {
        self.rate_at_beat(self.beat_at_time(time)?)
    }

    pub fn time_at_beat(&self, beat: f64) -> Result<f64> {
        let beat = non_negative("beat", beat)?;
        let mut time = 0.0;
        let mut e0 = self.segments[0];

        for &e1 in &self.segments[1..] {
            if e1.beat >= beat {
                return Ok(time + span_time(e0, e1, beat - e0.beat));
            }
            time += span_time(e0, e1, e1.beat - e0.beat);
            e0 = e1;
        }

        Ok(time + (beat - e0.beat) / e0.rate)
    }

    pub fn beat_at_time(&self, time: f64) -> Result<f64> {
        let time = non_negative("time", time)?;
        let mut t0 = 0.0;
        let mut e0 = self.segments[0];

        for &e1 in &self.segments[1..] {
            let t1 = t0 + span_time(e0, e1, e1.beat - e0.beat);
            if t1 >= time {
                return Ok(e0.beat + span_beats(e0, e1, time - t0));
            }
            t0 = t1;
            e0 = e1;
        }

        Ok(e0.beat + (time - t0) * e0.rate)
    }
}

/// Per-beat growth factor of an exponential segment, or `None` when the
/// segment degenerates to a step.
fn growth(e0: RateSegment, e1: RateSegment) -> Option<f64> {
    let n = e1.beat - e0.beat;
    if e1.curve != Curve::Exponential || n <= 0.0 || e1.rate == e0.rate {
        return None;
    }
    Some(root(n, e1.rate / e0.rate))
}

/// Time taken by the first `b` beats of the segment ending at `e1`.
fn span_time(e0: RateSegment, e1: RateSegment, b: f64) -> f64 {
    match growth(e0, e1) {
        Some(a) => (1.0 - a.powf(-b)) / (a.ln() * e0.rate),
        None => b / e0.rate,
    }
}

/// Beats covered in the first `t` of the segment ending at `e1`.
fn span_beats(e0: RateSegment, e1: RateSegment, t: f64) -> f64 {
    match growth(e0, e1) {
        Some(a) => -log(a, 1.0 - t * e0.rate * a.ln()),
        None => t * e0.rate,
    }
}
