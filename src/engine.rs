//! The engine thread.
//!
//! Owns the timer, the sequencer and the output ring, and drives them from
//! one thread. Other threads talk to it through channels.

use crossbeam::channel::{Receiver, RecvError, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use ringbuf::{HeapCons, HeapRb, traits::Split};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::Project;
use crate::automation::{AutomationStore, ParamId};
use crate::config::Config;
use crate::error::ProjectError;
use crate::events::ScheduledEvent;
use crate::output::{AutomatingSink, RingSink};
use crate::timing::{CueContext, Library, Sequencer, SystemClock, Timer};

#[derive(Debug, Clone)]
pub enum EngineCommand {
    LoadProject(PathBuf),
    /// Swaps in an edited project. Playback carries on from the same beat.
    ReloadProject(Project),
    Play { beat: Option<f64> },
    Stop,
    Seek(f64),
    SetTempo(f64),
    HoldParam(ParamId),
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    ProjectLoaded { project: Project },
    PlaybackState { playing: bool },
    Position { beat: f64, bar: u32 },
    Error { message: String },
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    /// Scheduled events, in time order.
    pub events: HeapCons<ScheduledEvent>,
    /// Param automation, written as param events are scheduled.
    pub automation: Arc<Mutex<AutomationStore>>,
    /// The clock event times are measured on.
    pub clock: SystemClock,
}

pub fn spawn_engine(config: Config) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    let ring_buffer = HeapRb::<ScheduledEvent>::new(config.engine.ring_capacity);
    let (producer, consumer) = ring_buffer.split();
    let automation = Arc::new(Mutex::new(AutomationStore::new(
        config.automation.clone(),
    )));
    let clock = SystemClock::new();

    let state = EngineState {
        timer: Timer::new(&config.timer, clock.clone()),
        config,
        library: Library::new(),
        sequencer: None,
        automation: automation.clone(),
        sink: AutomatingSink::new(automation.clone(), RingSink::new(producer)),
    };

    std::thread::spawn(move || {
        engine_thread(state, command_rx, update_tx);
    });

    EngineHandle {
        command_tx,
        update_rx,
        events: consumer,
        automation,
        clock,
    }
}

struct EngineState {
    config: Config,
    timer: Timer,
    library: Library,
    sequencer: Option<Sequencer>,
    automation: Arc<Mutex<AutomationStore>>,
    sink: AutomatingSink<RingSink>,
}

fn engine_thread(
    mut state: EngineState,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) {
    let period = Duration::from_secs_f64(state.config.timer.duration);
    let mut next_wake = Instant::now();

    loop {
        if state.timer.is_active() {
            match command_rx.recv_deadline(next_wake) {
                Ok(command) => state.handle(command, &update_tx),
                Err(RecvTimeoutError::Timeout) => {
                    state.frame(&update_tx);
                    next_wake += period;
                    let now = Instant::now();
                    if next_wake < now {
                        warn!(behind = ?(now - next_wake), "cue loop fell behind");
                        next_wake = now;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match command_rx.recv() {
                Ok(command) => {
                    state.handle(command, &update_tx);
                    next_wake = Instant::now();
                }
                Err(RecvError) => break,
            }
        }
    }
    info!("engine stopped");
}

impl EngineState {
    fn handle(&mut self, command: EngineCommand, update_tx: &Sender<EngineUpdate>) {
        debug!(?command, "engine command");
        let result = match command {
            EngineCommand::LoadProject(path) => match Project::load(&path) {
                Ok(project) => {
                    let result = self.load(&project);
                    if result.is_ok() {
                        let _ = update_tx.send(EngineUpdate::ProjectLoaded { project });
                    }
                    result
                }
                Err(e) => Err(e),
            },
            EngineCommand::ReloadProject(project) => self.reload(&project, update_tx),
            EngineCommand::Play { beat } => self.play(beat, update_tx),
            EngineCommand::Stop => self.stop(update_tx),
            EngineCommand::Seek(beat) => self
                .sequencer_mut()
                .and_then(|sequencer| Ok(sequencer.seek(beat)?)),
            EngineCommand::SetTempo(bpm) => {
                let now = self.timer.now();
                self.sequencer_mut()
                    .and_then(|sequencer| Ok(sequencer.set_tempo(now, bpm)?))
            }
            EngineCommand::HoldParam(param) => {
                let now = self.timer.now();
                self.automation
                    .lock()
                    .hold(&param, now)
                    .map_err(ProjectError::from)
            }
        };

        if let Err(e) = result {
            error!(error = %e, "engine command failed");
            let _ = update_tx.send(EngineUpdate::Error {
                message: e.to_string(),
            });
        }
    }

    fn sequencer_mut(&mut self) -> Result<&mut Sequencer, ProjectError> {
        self.sequencer.as_mut().ok_or(ProjectError::NoProject)
    }

    fn load(&mut self, project: &Project) -> Result<(), ProjectError> {
        let now = self.timer.now();
        if let Some(sequencer) = self.sequencer.as_mut() {
            sequencer.stop(now, &mut self.timer)?;
        }

        self.library = project.library();
        self.sequencer = Some(Sequencer::new(
            &project.config,
            project.events.clone(),
            &mut self.timer,
        )?);
        *self.automation.lock() = AutomationStore::new(project.config.automation.clone());
        info!(name = %project.name, events = project.events.len(), "project ready");
        Ok(())
    }

    fn reload(
        &mut self,
        project: &Project,
        update_tx: &Sender<EngineUpdate>,
    ) -> Result<(), ProjectError> {
        let now = self.timer.now();
        let resume = match self.sequencer.as_ref() {
            Some(sequencer) if sequencer.is_playing() => Some(sequencer.position(now)?.0),
            _ => None,
        };

        self.load(project)?;
        if let Some(beat) = resume {
            self.play(Some(beat), update_tx)?;
        }
        Ok(())
    }

    fn play(
        &mut self,
        beat: Option<f64>,
        update_tx: &Sender<EngineUpdate>,
    ) -> Result<(), ProjectError> {
        let now = self.timer.now();
        let Some(sequencer) = self.sequencer.as_mut() else {
            return Err(ProjectError::NoProject);
        };

        let mut ctx = CueContext {
            timer: &mut self.timer,
            lookup: &self.library,
            sink: &mut self.sink,
        };
        sequencer.start(now, beat, &mut ctx)?;
        let _ = update_tx.send(EngineUpdate::PlaybackState { playing: true });
        Ok(())
    }

    fn stop(&mut self, update_tx: &Sender<EngineUpdate>) -> Result<(), ProjectError> {
        let now = self.timer.now();
        let Some(sequencer) = self.sequencer.as_mut() else {
            return Ok(());
        };

        sequencer.stop(now, &mut self.timer)?;
        let (beat, bar) = sequencer.position(now)?;
        let _ = update_tx.send(EngineUpdate::PlaybackState { playing: false });
        let _ = update_tx.send(EngineUpdate::Position { beat, bar });
        Ok(())
    }

    fn frame(&mut self, update_tx: &Sender<EngineUpdate>) {
        let Some(sequencer) = self.sequencer.as_mut() else {
            return;
        };
        let was_playing = sequencer.is_playing();
        let library = &self.library;
        let sink = &mut self.sink;

        self.timer.frame(|wake, timer| {
            let mut ctx = CueContext {
                timer,
                lookup: library,
                sink: &mut *sink,
            };
            if let Err(e) = sequencer.cue(wake, &mut ctx) {
                warn!(error = %e, time = wake.time, "cue failed");
            }
        });

        let now = self.timer.now();
        self.automation.lock().prune_before(None, now);
        if sequencer.is_playing() {
            match sequencer.position(now) {
                Ok((beat, bar)) => {
                    let _ = update_tx.send(EngineUpdate::Position { beat, bar });
                }
                Err(e) => warn!(error = %e, "position unavailable"),
            }
        } else if was_playing {
            let _ = update_tx.send(EngineUpdate::PlaybackState { playing: false });
        }
    }
}
