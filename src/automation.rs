//! Per-parameter automation lanes.
//!
//! Each parameter owns an ordered list of timed segments. A segment
//! describes how the value travels from the previous anchor to this one,
//! and the store can reconstruct the instantaneous value at any time from
//! that list. Values are kept at single precision, matching what a
//! renderer consumes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, trace};

use crate::config::AutomationConfig;
use crate::error::{Error, Result, finite};

/// Most samples a single `render` call produces.
pub const MAX_RENDER_SAMPLES: usize = 1 << 24;

/// Interpolation law of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    /// Jump to the value at the segment time.
    Step,
    /// Straight line from the previous anchor.
    Linear,
    /// Constant ratio per unit time from the previous anchor.
    Exponential,
    /// Open-ended exponential decay toward the value.
    Target,
    /// Explicit list of values spread over a duration.
    Curve,
}

impl Curve {
    pub fn name(self) -> &'static str {
        match self {
            Curve::Step => "step",
            Curve::Linear => "linear",
            Curve::Exponential => "exponential",
            Curve::Target => "target",
            Curve::Curve => "curve",
        }
    }

    /// Curves that glide from the previous anchor rather than jumping.
    pub fn is_transition(self) -> bool {
        matches!(self, Curve::Linear | Curve::Exponential)
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Curve {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "step" => Ok(Curve::Step),
            "linear" => Ok(Curve::Linear),
            "exponential" => Ok(Curve::Exponential),
            "target" => Ok(Curve::Target),
            "curve" => Ok(Curve::Curve),
            other => Err(Error::InvalidCurve {
                what: "automation",
                curve: other.to_string(),
            }),
        }
    }
}

/// Stable identity of an automated parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamId(String);

impl ParamId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identity of `name` on an output target, `target.name`.
    pub fn scoped(target: Option<&str>, name: &str) -> Self {
        match target {
            Some(target) => Self(format!("{target}.{name}")),
            None => Self(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParamId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One timed instruction in a parameter's lane.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub time: f64,
    pub curve: Curve,
    pub value: f32,
    /// Time constant of a target curve, or the span of a value curve.
    pub duration: Option<f64>,
    /// Samples of a value curve; empty for every other curve.
    pub values: Vec<f32>,
}

impl Segment {
    pub fn new(time: f64, curve: Curve, value: f32) -> Self {
        Self {
            time,
            curve,
            value,
            duration: None,
            values: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Lane {
    default: f32,
    segments: Vec<Segment>,
}

#[derive(Debug, Default)]
pub struct AutomationStore {
    config: AutomationConfig,
    lanes: HashMap<ParamId, Lane>,
}

impl AutomationStore {
    pub fn new(config: AutomationConfig) -> Self {
        Self {
            config,
            lanes: HashMap::new(),
        }
    }

    /// Sets the value a parameter reports before its first segment.
    pub fn set_default(&mut self, param: &ParamId, value: f32) {
        self.lanes.entry(param.clone()).or_default().default = value;
    }

    pub fn segments(&self, param: &ParamId) -> &[Segment] {
        self.lanes
            .get(param)
            .map(|lane| lane.segments.as_slice())
            .unwrap_or(&[])
    }

    pub fn params(&self) -> impl Iterator<Item = &ParamId> {
        self.lanes.keys()
    }

    pub fn value_at_time(&self, param: &ParamId, time: f64) -> Result<f32> {
        let time = finite("automation time", time)?;
        Ok(match self.lanes.get(param) {
            Some(lane) => value_at(&lane.segments, lane.default, time) as f32,
            None => 0.0,
        })
    }

    /// Inserts a segment, replacing one of the same curve at the same time.
    ///
    /// Exponential segments that would start or end at (or below) the
    /// configured near-zero threshold are stored as steps instead.
    pub fn schedule(
        &mut self,
        param: &ParamId,
        time: f64,
        curve: Curve,
        value: f32,
        duration: Option<f64>,
    ) -> Result<()> {
        let time = finite("automation time", time)?;
        finite("automation value", value as f64)?;

        let duration = match curve {
            Curve::Target => {
                let duration = duration.ok_or(Error::MissingDuration)?;
                Some(positive("target duration", duration)?)
            }
            Curve::Curve => {
                return Err(Error::InvalidCurve {
                    what: "a single value (use schedule_values)",
                    curve: curve.to_string(),
                });
            }
            _ => None,
        };

        let min = self.config.min_exponential_value;
        let lane = self.lanes.entry(param.clone()).or_default();
        let n = lane.segments.partition_point(|s| s.time < time);

        let curve = if curve == Curve::Exponential {
            let prior = n
                .checked_sub(1)
                .map_or(lane.default, |i| lane.segments[i].value);
            if value <= min || prior < min {
                debug!(%param, time, value, prior, "degenerate exponential stored as step");
                Curve::Step
            } else {
                curve
            }
        } else {
            curve
        };

        let segment = Segment {
            time,
            curve,
            value,
            duration,
            values: Vec::new(),
        };
        trace!(%param, time, %curve, value, "schedule");
        insert(&mut lane.segments, n, segment);
        Ok(())
    }

    /// Schedules an explicit value curve spanning `duration` from `time`.
    pub fn schedule_values(
        &mut self,
        param: &ParamId,
        time: f64,
        values: Vec<f32>,
        duration: f64,
    ) -> Result<()> {
        let time = finite("automation time", time)?;
        let duration = positive("curve duration", duration)?;
        let Some(&last) = values.last() else {
            return Err(Error::InvalidValue {
                what: "curve length",
                value: 0.0,
            });
        };
        for &value in &values {
            finite("automation value", value as f64)?;
        }

        let lane = self.lanes.entry(param.clone()).or_default();
        let n = lane.segments.partition_point(|s| s.time < time);
        insert(
            &mut lane.segments,
            n,
            Segment {
                time,
                curve: Curve::Curve,
                value: last,
                duration: Some(duration),
                values,
            },
        );
        Ok(())
    }

    /// Freezes the parameter at its current value and drops everything
    /// scheduled from `time` on.
    ///
    /// A ramp in progress is cut with a segment of the same curve ending at
    /// the interpolated value, so the trajectory up to `time` is unchanged.
    /// Anything else, including a decaying target curve, is frozen with a
    /// step at the value the decay law gives at `time`.
    pub fn hold(&mut self, param: &ParamId, time: f64) -> Result<()> {
        let time = finite("automation time", time)?;
        let min = self.config.min_exponential_value;
        let lane = self.lanes.entry(param.clone()).or_default();

        let value = value_at(&lane.segments, lane.default, time) as f32;
        let n = lane.segments.partition_point(|s| s.time < time);

        let mut curve = match lane.segments.get(n) {
            Some(next) if next.curve.is_transition() => next.curve,
            _ => Curve::Step,
        };
        if curve == Curve::Exponential {
            let prior = n
                .checked_sub(1)
                .map_or(lane.default, |i| lane.segments[i].value);
            if value <= min || prior < min {
                curve = Curve::Step;
            }
        }

        debug!(%param, time, value, %curve, dropped = lane.segments.len() - n, "hold");
        lane.segments.truncate(n);
        lane.segments.push(Segment::new(time, curve, value));
        Ok(())
    }

    /// Purges all automation and steps to `value` at `time`.
    pub fn reset(&mut self, param: &ParamId, time: f64, value: f32) -> Result<()> {
        if let Some(lane) = self.lanes.get_mut(param) {
            lane.segments.clear();
        }
        self.schedule(param, time, Curve::Step, value, None)
    }

    pub fn clear(&mut self, param: &ParamId) {
        self.lanes.remove(param);
    }

    /// Drops segments that no longer affect values at or after `time`, on
    /// one lane or on all of them. Returns how many were dropped.
    ///
    /// The last anchor at or before `time` is kept. A target curve that has
    /// run past its settling time collapses to a step at its value, unless a
    /// ramp follows it.
    pub fn prune_before(&mut self, param: Option<&ParamId>, time: f64) -> usize {
        let factor = self.config.target_duration_factor;
        match param {
            Some(param) => self
                .lanes
                .get_mut(param)
                .map_or(0, |lane| prune_lane(lane, time, factor)),
            None => self
                .lanes
                .values_mut()
                .map(|lane| prune_lane(lane, time, factor))
                .sum(),
        }
    }

    /// Time after which the lane no longer changes.
    pub fn end_time(&self, param: &ParamId) -> f64 {
        let Some(segment) = self.lanes.get(param).and_then(|l| l.segments.last()) else {
            return 0.0;
        };
        match (segment.curve, segment.duration) {
            (Curve::Target, Some(duration)) => {
                segment.time + duration * self.config.target_duration_factor
            }
            (Curve::Curve, Some(duration)) => segment.time + duration,
            _ => segment.time,
        }
    }

    /// Samples the lane at `rate` points per second over `[t0, t1]`.
    pub fn render(&self, param: &ParamId, t0: f64, t1: f64, rate: f64) -> Result<Vec<f32>> {
        let t0 = finite("render start", t0)?;
        let t1 = finite("render end", t1)?;
        let rate = positive("render rate", rate)?;
        if t1 < t0 {
            return Err(Error::InvalidValue {
                what: "render span",
                value: t1 - t0,
            });
        }

        let span = ((t1 - t0) * rate).floor();
        if !(span < MAX_RENDER_SAMPLES as f64) {
            return Err(Error::InvalidValue {
                what: "render span",
                value: t1 - t0,
            });
        }
        let count = span as usize + 1;
        let lane = self.lanes.get(param);
        Ok((0..count)
            .map(|i| {
                let time = t0 + i as f64 / rate;
                lane.map_or(0.0, |l| value_at(&l.segments, l.default, time) as f32)
            })
            .collect())
    }
}

fn prune_lane(lane: &mut Lane, time: f64, factor: f64) -> usize {
    let Some(i) = lane.segments.partition_point(|s| s.time <= time).checked_sub(1) else {
        return 0;
    };

    let segment = &lane.segments[i];
    let settled = segment.curve == Curve::Target
        && segment
            .duration
            .is_some_and(|duration| time >= segment.time + duration * factor)
        && !lane
            .segments
            .get(i + 1)
            .is_some_and(|next| next.curve.is_transition());

    let keep = if settled {
        let step = Segment::new(segment.time, Curve::Step, segment.value);
        lane.segments[i] = step;
        i
    } else {
        lane.segments[..=i]
            .iter()
            .rposition(|s| s.curve != Curve::Target)
            .unwrap_or(0)
    };

    lane.segments.drain(..keep);
    if keep > 0 {
        trace!(dropped = keep, time, "pruned automation");
    }
    keep
}

fn positive(what: &'static str, value: f64) -> Result<f64> {
    let value = finite(what, value)?;
    if value <= 0.0 {
        return Err(Error::InvalidValue { what, value });
    }
    Ok(value)
}

/// Places `segment` at `n`, the first index not earlier than it. A segment
/// with the same time and curve is replaced; otherwise the new one goes
/// after every segment sharing its time.
fn insert(segments: &mut Vec<Segment>, n: usize, segment: Segment) {
    let mut i = n;
    while let Some(existing) = segments.get(i) {
        if existing.time != segment.time {
            break;
        }
        if existing.curve == segment.curve {
            segments[i] = segment;
            return;
        }
        i += 1;
    }
    segments.insert(i, segment);
}

fn value_at(segments: &[Segment], default: f32, time: f64) -> f64 {
    let next = segments.partition_point(|s| s.time <= time);
    let Some(i) = next.checked_sub(1) else {
        return default as f64;
    };
    let segment = &segments[i];
    let prior = value_before(segments, i, default);

    if let Some(to) = segments.get(next) {
        if to.curve.is_transition() {
            let from = match segment.curve {
                Curve::Target => prior,
                _ => segment.value as f64,
            };
            return interpolate(to.curve, from, to.value as f64, segment.time, to.time, time);
        }
    }

    segment_value(segment, prior, time)
}

/// Value the lane holds just as segment `i` takes over.
///
/// Only target curves depend on what came before them, so the walk starts
/// at the last segment of any other kind.
fn value_before(segments: &[Segment], i: usize, default: f32) -> f64 {
    let start = segments[..i]
        .iter()
        .rposition(|s| s.curve != Curve::Target)
        .unwrap_or(0);
    (start..i).fold(default as f64, |prior, k| {
        segment_value(&segments[k], prior, segments[k + 1].time)
    })
}

fn segment_value(segment: &Segment, prior: f64, time: f64) -> f64 {
    match segment.curve {
        Curve::Step | Curve::Linear | Curve::Exponential => segment.value as f64,
        Curve::Target => {
            let target = segment.value as f64;
            match segment.duration {
                Some(duration) if duration > 0.0 => {
                    target + (prior - target) * (-(time - segment.time) / duration).exp()
                }
                _ => target,
            }
        }
        Curve::Curve => sample_values(
            &segment.values,
            segment.time,
            segment.duration.unwrap_or(0.0),
            time,
        ),
    }
}

fn interpolate(curve: Curve, v1: f64, v2: f64, t1: f64, t2: f64, time: f64) -> f64 {
    if t2 <= t1 {
        return v2;
    }
    let progress = (time - t1) / (t2 - t1);
    match curve {
        Curve::Linear => v1 + (v2 - v1) * progress,
        Curve::Exponential => {
            let ratio = v2 / v1;
            if v1 == 0.0 || !(ratio > 0.0) {
                v1
            } else {
                v1 * ratio.powf(progress)
            }
        }
        _ => v1,
    }
}

fn sample_values(values: &[f32], start: f64, duration: f64, time: f64) -> f64 {
    let Some(&last) = values.last() else {
        return 0.0;
    };
    if duration <= 0.0 || time >= start + duration || values.len() == 1 {
        return last as f64;
    }

    let position = (time - start) / duration * (values.len() - 1) as f64;
    let k = position.floor() as usize;
    let frac = position - k as f64;
    let v0 = values[k] as f64;
    let v1 = values[(k + 1).min(values.len() - 1)] as f64;
    v0 + (v1 - v0) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AutomationStore {
        AutomationStore::new(AutomationConfig::default())
    }

    fn gain() -> ParamId {
        ParamId::new("gain")
    }

    #[test]
    fn value_before_first_segment_is_default() {
        let mut store = store();
        store.set_default(&gain(), 0.25);
        store.schedule(&gain(), 1.0, Curve::Step, 1.0, None).unwrap();

        assert_eq!(store.value_at_time(&gain(), 0.5).unwrap(), 0.25);
        assert_eq!(store.value_at_time(&gain(), 1.0).unwrap(), 1.0);
    }

    #[test]
    fn unknown_param_reads_zero() {
        assert_eq!(store().value_at_time(&gain(), 3.0).unwrap(), 0.0);
    }

    #[test]
    fn linear_ramp_midpoint() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 0.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Linear, 10.0, None).unwrap();

        assert_eq!(store.value_at_time(&gain(), 0.5).unwrap(), 5.0);
        assert_eq!(store.value_at_time(&gain(), 1.0).unwrap(), 10.0);
        assert_eq!(store.value_at_time(&gain(), 2.0).unwrap(), 10.0);
    }

    #[test]
    fn exponential_ramp_midpoint() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 100.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Exponential, 50.0, None).unwrap();

        let value = store.value_at_time(&gain(), 0.5).unwrap();
        assert!((value - 70.7107).abs() < 1e-3, "got {value}");
    }

    #[test]
    fn step_holds_until_next_segment() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 2.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Step, 4.0, None).unwrap();

        assert_eq!(store.value_at_time(&gain(), 0.999).unwrap(), 2.0);
        assert_eq!(store.value_at_time(&gain(), 1.0).unwrap(), 4.0);
    }

    #[test]
    fn target_decays_toward_value() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 1.0, None).unwrap();
        store
            .schedule(&gain(), 1.0, Curve::Target, 0.0, Some(0.5))
            .unwrap();

        assert_eq!(store.value_at_time(&gain(), 1.0).unwrap(), 1.0);
        let value = store.value_at_time(&gain(), 1.5).unwrap();
        assert!((value - (-1.0f32).exp()).abs() < 1e-6, "got {value}");
    }

    #[test]
    fn target_without_duration_is_rejected() {
        let mut store = store();
        let result = store.schedule(&gain(), 0.0, Curve::Target, 1.0, None);
        assert_eq!(result, Err(Error::MissingDuration));
        assert!(store.segments(&gain()).is_empty());
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let mut store = store();
        assert!(matches!(
            store.schedule(&gain(), f64::NAN, Curve::Step, 1.0, None),
            Err(Error::NonFinite { .. })
        ));
        assert!(matches!(
            store.schedule(&gain(), 0.0, Curve::Step, f32::INFINITY, None),
            Err(Error::NonFinite { .. })
        ));
    }

    #[test]
    fn exponential_to_zero_becomes_step() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 1.0, None).unwrap();
        store
            .schedule(&gain(), 1.0, Curve::Exponential, 0.0, None)
            .unwrap();

        let segments = store.segments(&gain());
        assert_eq!(segments[1].curve, Curve::Step);
        assert_eq!(store.value_at_time(&gain(), 0.5).unwrap(), 1.0);
    }

    #[test]
    fn exponential_from_zero_becomes_step() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 0.0, None).unwrap();
        store
            .schedule(&gain(), 1.0, Curve::Exponential, 8.0, None)
            .unwrap();

        assert_eq!(store.segments(&gain())[1].curve, Curve::Step);
        assert!(store.value_at_time(&gain(), 0.5).unwrap().is_finite());
    }

    #[test]
    fn same_time_same_curve_replaces() {
        let mut store = store();
        store.schedule(&gain(), 1.0, Curve::Step, 1.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Linear, 2.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Step, 3.0, None).unwrap();

        let segments = store.segments(&gain());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].curve, Curve::Step);
        assert_eq!(segments[0].value, 3.0);
        assert_eq!(segments[1].curve, Curve::Linear);
    }

    #[test]
    fn segments_stay_sorted() {
        let mut store = store();
        for time in [3.0, 1.0, 2.0, 0.0] {
            store.schedule(&gain(), time, Curve::Step, time as f32, None).unwrap();
        }
        let times: Vec<f64> = store.segments(&gain()).iter().map(|s| s.time).collect();
        assert_eq!(times, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn hold_cuts_linear_ramp() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 0.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Linear, 10.0, None).unwrap();
        store.schedule(&gain(), 2.0, Curve::Step, 0.0, None).unwrap();

        store.hold(&gain(), 0.5).unwrap();

        let segments = store.segments(&gain());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1], Segment::new(0.5, Curve::Linear, 5.0));
        assert_eq!(store.value_at_time(&gain(), 0.25).unwrap(), 2.5);
        assert_eq!(store.value_at_time(&gain(), 3.0).unwrap(), 5.0);
    }

    #[test]
    fn hold_cuts_exponential_ramp() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 100.0, None).unwrap();
        store
            .schedule(&gain(), 1.0, Curve::Exponential, 50.0, None)
            .unwrap();

        store.hold(&gain(), 0.5).unwrap();

        let held = &store.segments(&gain())[1];
        assert_eq!(held.curve, Curve::Exponential);
        assert!((held.value - 70.7107).abs() < 1e-3);
    }

    #[test]
    fn hold_freezes_target_decay_as_step() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 1.0, None).unwrap();
        store
            .schedule(&gain(), 1.0, Curve::Target, 0.0, Some(0.5))
            .unwrap();

        store.hold(&gain(), 1.5).unwrap();

        let held = store.segments(&gain()).last().unwrap().clone();
        assert_eq!(held.curve, Curve::Step);
        assert!((held.value - (-1.0f32).exp()).abs() < 1e-6);
        assert_eq!(store.value_at_time(&gain(), 10.0).unwrap(), held.value);
    }

    #[test]
    fn hold_twice_is_idempotent() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 0.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Linear, 10.0, None).unwrap();

        store.hold(&gain(), 0.3).unwrap();
        let once = store.segments(&gain()).to_vec();
        let value_once = store.value_at_time(&gain(), 0.3).unwrap();

        store.hold(&gain(), 0.3).unwrap();
        assert_eq!(store.segments(&gain()), once.as_slice());
        assert_eq!(store.value_at_time(&gain(), 0.3).unwrap(), value_once);
    }

    #[test]
    fn hold_cancels_future_segments() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 1.0, None).unwrap();
        store.schedule(&gain(), 5.0, Curve::Step, 2.0, None).unwrap();
        store
            .schedule(&gain(), 6.0, Curve::Target, 0.0, Some(1.0))
            .unwrap();

        store.hold(&gain(), 2.0).unwrap();

        assert_eq!(store.segments(&gain()).len(), 2);
        assert_eq!(store.value_at_time(&gain(), 7.0).unwrap(), 1.0);
    }

    #[test]
    fn value_curve_interpolates_samples() {
        let mut store = store();
        store
            .schedule_values(&gain(), 1.0, vec![0.0, 1.0, 0.0], 2.0)
            .unwrap();

        assert_eq!(store.value_at_time(&gain(), 1.5).unwrap(), 0.5);
        assert_eq!(store.value_at_time(&gain(), 2.0).unwrap(), 1.0);
        assert_eq!(store.value_at_time(&gain(), 4.0).unwrap(), 0.0);
        assert_eq!(store.end_time(&gain()), 3.0);
    }

    #[test]
    fn end_time_extends_target() {
        let mut store = store();
        assert_eq!(store.end_time(&gain()), 0.0);
        store
            .schedule(&gain(), 2.0, Curve::Target, 1.0, Some(0.1))
            .unwrap();
        assert!((store.end_time(&gain()) - 2.9).abs() < 1e-9);
    }

    #[test]
    fn render_samples_lane() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 0.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Linear, 4.0, None).unwrap();

        let data = store.render(&gain(), 0.0, 1.0, 4.0).unwrap();
        assert_eq!(data, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn reset_purges_lane() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 0.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Linear, 4.0, None).unwrap();

        store.reset(&gain(), 0.5, 9.0).unwrap();

        assert_eq!(store.segments(&gain()), &[Segment::new(0.5, Curve::Step, 9.0)]);
    }

    #[test]
    fn chained_targets_start_from_the_decayed_value() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 1.0, None).unwrap();
        store
            .schedule(&gain(), 1.0, Curve::Target, 0.0, Some(0.5))
            .unwrap();
        store
            .schedule(&gain(), 2.0, Curve::Target, 1.0, Some(0.5))
            .unwrap();

        let prior = (-2.0f64).exp();
        let expected = 1.0 + (prior - 1.0) * (-1.0f64).exp();
        let value = store.value_at_time(&gain(), 2.5).unwrap();
        assert!((value as f64 - expected).abs() < 1e-6, "got {value}");
    }

    #[test]
    fn long_target_chain_on_a_small_stack() {
        let mut store = store();
        for i in 0..50_000 {
            let value = (i % 2) as f32;
            store
                .schedule(&gain(), i as f64 * 0.01, Curve::Target, value, Some(0.005))
                .unwrap();
        }

        let (settled, held) = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || {
                let settled = store.value_at_time(&gain(), 600.0).unwrap();
                store.hold(&gain(), 250.005).unwrap();
                (settled, store.value_at_time(&gain(), 600.0).unwrap())
            })
            .unwrap()
            .join()
            .unwrap();
        assert!((settled - 1.0).abs() < 1e-6, "got {settled}");
        assert!((0.0..=1.0).contains(&held), "got {held}");
    }

    #[test]
    fn render_refuses_huge_spans() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 1.0, None).unwrap();

        assert!(matches!(
            store.render(&gain(), 0.0, 1e20, 1.0),
            Err(Error::InvalidValue {
                what: "render span",
                ..
            })
        ));
        assert!(store.render(&gain(), 0.0, 1e6, 1e6).is_err());
        assert_eq!(store.render(&gain(), 0.0, 2.0, 1.0).unwrap().len(), 3);
    }

    #[test]
    fn prune_keeps_values_from_time_on() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 0.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Linear, 4.0, None).unwrap();
        store.schedule(&gain(), 2.0, Curve::Step, 1.0, None).unwrap();
        store.schedule(&gain(), 3.0, Curve::Linear, 3.0, None).unwrap();
        store
            .schedule(&gain(), 4.0, Curve::Target, 0.0, Some(0.5))
            .unwrap();
        let times = [2.5, 3.0, 3.5, 4.0, 4.2, 5.0, 9.0];
        let before: Vec<f32> = times
            .iter()
            .map(|&t| store.value_at_time(&gain(), t).unwrap())
            .collect();

        let dropped = store.prune_before(Some(&gain()), 2.5);

        assert_eq!(dropped, 2);
        assert_eq!(store.segments(&gain())[0].time, 2.0);
        let after: Vec<f32> = times
            .iter()
            .map(|&t| store.value_at_time(&gain(), t).unwrap())
            .collect();
        assert_eq!(after, before);
    }

    #[test]
    fn prune_keeps_the_anchor_of_a_running_target_chain() {
        let mut store = store();
        store.schedule(&gain(), 0.0, Curve::Step, 0.0, None).unwrap();
        store.schedule(&gain(), 1.0, Curve::Step, 1.0, None).unwrap();
        store
            .schedule(&gain(), 2.0, Curve::Target, 0.0, Some(1.0))
            .unwrap();
        store
            .schedule(&gain(), 2.5, Curve::Target, 1.0, Some(1.0))
            .unwrap();
        let before = store.value_at_time(&gain(), 2.7).unwrap();

        assert_eq!(store.prune_before(None, 2.6), 1);
        assert_eq!(store.segments(&gain()).len(), 3);
        assert_eq!(store.value_at_time(&gain(), 2.7).unwrap(), before);
    }

    #[test]
    fn prune_collapses_settled_target() {
        let mut store = store();
        let other = ParamId::new("pan");
        store.schedule(&other, 0.0, Curve::Step, 0.5, None).unwrap();
        store.schedule(&gain(), 0.0, Curve::Step, 1.0, None).unwrap();
        store
            .schedule(&gain(), 1.0, Curve::Target, 0.25, Some(0.1))
            .unwrap();
        store.schedule(&gain(), 8.0, Curve::Step, 2.0, None).unwrap();

        assert_eq!(store.prune_before(None, 3.0), 1);
        assert_eq!(
            store.segments(&gain())[0],
            Segment::new(1.0, Curve::Step, 0.25)
        );
        assert_eq!(store.value_at_time(&gain(), 3.0).unwrap(), 0.25);
        assert_eq!(store.value_at_time(&gain(), 8.0).unwrap(), 2.0);
        assert_eq!(store.value_at_time(&other, 3.0).unwrap(), 0.5);
    }
}
