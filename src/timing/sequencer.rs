use std::sync::Arc;
use tracing::{debug, info};

use super::{
    CueContext, Meter, MeterTable, PlaybackStatus, Scheduler, Sequence, TimeBase, Timer, Transport,
    Wake,
};
use crate::config::Config;
use crate::error::{Error, Result, non_negative};

/// Plays a root sequence on the global transport.
///
/// Schedulers play once. The sequencer keeps a fresh one ready at all
/// times, so it can be started again right after it stops or runs out.
#[derive(Debug)]
pub struct Sequencer {
    transport: Transport,
    meter: MeterTable,
    sequence: Arc<Sequence>,
    stream: Scheduler,
    /// Sequence beat the next start plays from.
    resume_beat: f64,
    looping: Option<f64>,
}

impl Sequencer {
    pub fn new(config: &Config, sequence: Sequence, timer: &mut Timer) -> Result<Self> {
        let meter = MeterTable::from_events(sequence.iter(), config.transport.default_meter)?;
        let sequence = Arc::new(sequence);
        let stream = Scheduler::new(timer, Arc::clone(&sequence), None)?;

        Ok(Self {
            transport: Transport::new(&config.transport),
            meter,
            sequence,
            stream,
            resume_beat: 0.0,
            looping: None,
        })
    }

    pub fn status(&self) -> PlaybackStatus {
        self.transport.status()
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlaybackStatus::Playing
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    /// The scheduler that plays, or will play, the root sequence.
    pub fn stream(&self) -> &Scheduler {
        &self.stream
    }

    /// Starts playing at `time` from `beat`, or from where the last stop
    /// left off. Playback in progress is stopped at `time` first.
    pub fn start(&mut self, time: f64, beat: Option<f64>, ctx: &mut CueContext<'_>) -> Result<()> {
        let time = non_negative("start time", time)?;
        if self.stream.status() != PlaybackStatus::Idle {
            self.stop(time, ctx.timer)?;
        }
        if let Some(beat) = beat {
            self.resume_beat = non_negative("start beat", beat)?;
        }

        self.transport.start(time)?;
        info!(time, beat = self.resume_beat, "sequencer started");
        self.stream.start(time, self.resume_beat, &self.transport, ctx)
    }

    /// Stops at `time`, remembering the beat reached. Does nothing when not
    /// started.
    pub fn stop(&mut self, time: f64, timer: &mut Timer) -> Result<()> {
        let time = non_negative("stop time", time)?;
        if self.stream.status() == PlaybackStatus::Idle {
            return Ok(());
        }

        self.resume_beat = self.stream.beat_at_time(&self.transport, time)?;
        self.stream.stop(time, timer)?;
        if self.transport.status() == PlaybackStatus::Playing {
            self.transport.stop(time)?;
        }
        info!(time, beat = self.resume_beat, "sequencer stopped");
        self.prepare(timer)
    }

    /// Handles a timer wake for the root sequence and everything it spawned.
    pub fn cue(&mut self, wake: &Wake, ctx: &mut CueContext<'_>) -> Result<()> {
        let result = self.stream.cue(wake, &self.transport, ctx);

        if self.stream.status() == PlaybackStatus::Done {
            let time = self.stream.stop_time().unwrap_or(wake.time);
            if self.transport.status() == PlaybackStatus::Playing {
                self.transport.stop(time)?;
            }
            self.resume_beat = 0.0;
            info!(time, "sequence ended");
            self.prepare(ctx.timer)?;
        }
        result
    }

    fn prepare(&mut self, timer: &mut Timer) -> Result<()> {
        let mut stream = Scheduler::new(timer, Arc::clone(&self.sequence), None)?;
        stream.set_looping(self.looping)?;
        debug!(id = %stream.id(), "stream ready");
        self.stream = stream;
        Ok(())
    }

    /// Beat the next start plays from when no beat is given.
    pub fn resume_beat(&self) -> f64 {
        self.resume_beat
    }

    /// Moves the resume point. Not allowed while playing.
    pub fn seek(&mut self, beat: f64) -> Result<()> {
        if self.is_playing() {
            return Err(Error::State {
                operation: "seek",
                status: self.status(),
            });
        }
        self.resume_beat = non_negative("seek beat", beat)?;
        Ok(())
    }

    /// Loops the root sequence over `[0, length)` beats, or stops looping.
    pub fn set_loop(&mut self, length: Option<f64>) -> Result<()> {
        if self.is_playing() {
            return Err(Error::State {
                operation: "change looping",
                status: self.status(),
            });
        }
        self.stream.set_looping(length)?;
        self.looping = length;
        Ok(())
    }

    /// Sequence beat and bar at `time`; the resume point when stopped.
    pub fn position(&self, time: f64) -> Result<(f64, u32)> {
        let beat = if self.is_playing() {
            self.stream.beat_at_time(&self.transport, time)?
        } else {
            self.resume_beat
        };
        Ok((beat, self.meter.bar_at_beat(beat)?))
    }

    pub fn bar_at_beat(&self, beat: f64) -> Result<u32> {
        self.meter.bar_at_beat(beat)
    }

    pub fn beat_at_bar(&self, bar: u32) -> f64 {
        self.meter.beat_at_bar(bar)
    }

    pub fn meter_at_beat(&self, beat: f64) -> Result<Meter> {
        self.meter.meter_at_beat(beat)
    }

    pub fn set_meter_at_beat(&mut self, beat: f64, numerator: u32, denominator: u32) -> Result<()> {
        self.meter.set_meter_at_beat(beat, numerator, denominator)
    }

    pub fn tempo(&self, time: f64) -> Result<f64> {
        self.transport.tempo(time)
    }

    pub fn set_tempo(&mut self, time: f64, bpm: f64) -> Result<()> {
        self.transport.set_tempo(time, bpm)
    }
}

/// Sequence beats, with the root sequence's own rate events applied on top
/// of the transport.
impl TimeBase for Sequencer {
    fn beat_at_time(&self, time: f64) -> Result<f64> {
        self.stream.beat_at_time(&self.transport, time)
    }

    fn time_at_beat(&self, beat: f64) -> Result<f64> {
        self.stream.time_at_beat(&self.transport, beat)
    }
}
