use cuestage::automation::{AutomationStore, ParamId};
use cuestage::config::AutomationConfig;
use cuestage::timing::{
    Clock, CueContext, Library, ManualClock, PlaybackStatus, Sequence, Sequencer, Timer,
};
use cuestage::{AutomatingSink, Event, EventKind, EventSink, Project, ScheduledEvent};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;

const TICK: [f64; 1] = [0.24];
const JITTER: [f64; 5] = [0.24, 0.31, 0.12, 0.4, 0.2];

struct Player<S> {
    clock: ManualClock,
    timer: Timer,
    library: Library,
    sequencer: Sequencer,
    sink: S,
}

impl<S: EventSink> Player<S> {
    fn new(project: &Project, sink: S) -> Self {
        let clock = ManualClock::new(0.0);
        let mut timer = Timer::new(&project.config.timer, clock.clone());
        let sequencer = Sequencer::new(&project.config, project.events.clone(), &mut timer).unwrap();
        Self {
            clock,
            timer,
            library: project.library(),
            sequencer,
            sink,
        }
    }

    fn start(&mut self, beat: Option<f64>) {
        let now = self.clock.now();
        let mut ctx = CueContext {
            timer: &mut self.timer,
            lookup: &self.library,
            sink: &mut self.sink,
        };
        self.sequencer.start(now, beat, &mut ctx).unwrap();
    }

    fn stop(&mut self) {
        let now = self.clock.now();
        self.sequencer.stop(now, &mut self.timer).unwrap();
    }

    fn run(&mut self, until: f64, steps: &[f64]) {
        let mut step = steps.iter().cycle();
        while self.clock.now() < until {
            let sequencer = &mut self.sequencer;
            let library = &self.library;
            let sink = &mut self.sink;
            self.timer.frame(|wake, timer| {
                let mut ctx = CueContext {
                    timer,
                    lookup: library,
                    sink: &mut *sink,
                };
                sequencer.cue(wake, &mut ctx).unwrap();
            });
            self.clock.advance(*step.next().unwrap());
        }
    }
}

fn project(events: Vec<Event>) -> Project {
    let mut project = Project::new("test");
    project.events = Sequence::from_events(events);
    project
}

fn pitches(events: &[ScheduledEvent]) -> Vec<(f64, Option<&str>, f64)> {
    events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::Pitch { semitones } => Some((e.time, e.target.as_deref(), semitones)),
            _ => None,
        })
        .collect()
}

#[test]
fn irregular_wakes_deliver_every_note_once_in_order() {
    let notes = (0..100).map(|i| Event::note(i as f64 * 0.25, 60.0, 1.0, 0.2));
    let mut player = Player::new(&project(notes.collect()), Vec::new());
    player.start(None);
    player.run(30.0, &JITTER);

    let onsets: Vec<f64> = player
        .sink
        .iter()
        .filter(|e| matches!(e.kind, EventKind::NoteOn { .. }))
        .map(|e| e.time)
        .collect();
    let expected: Vec<f64> = (0..100).map(|i| i as f64 * 0.125).collect();
    assert_eq!(onsets, expected);

    let offs = player
        .sink
        .iter()
        .filter(|e| matches!(e.kind, EventKind::NoteOff { .. }))
        .count();
    assert_eq!(offs, 100);
    assert!(player.sink.windows(2).all(|w| w[0].time <= w[1].time));
    assert_eq!(player.sequencer.status(), PlaybackStatus::Done);
}

#[test]
fn nested_sequence_from_project_document() {
    let source = r#"(
        name: "nesting",
        version: "0.1.0",
        events: [
            [0.0, "pitch", 0.0],
            [4.0, "sequence", "riff", "bass", 0.0],
        ],
        sequences: [
            (name: Some("riff"), events: [[0.0, "pitch", 1.0], [1.0, "pitch", 2.0]]),
        ],
    )"#;
    let mut player = Player::new(&Project::from_ron(source).unwrap(), Vec::new());
    player.start(None);
    player.run(4.0, &TICK);

    assert_eq!(
        pitches(&player.sink),
        vec![
            (0.0, None, 0.0),
            (2.0, Some("bass"), 1.0),
            (2.5, Some("bass"), 2.0),
        ]
    );
}

#[test]
fn rate_event_slows_the_rest_of_the_sequence() {
    let events = vec![
        Event::new(0.0, EventKind::Pitch { semitones: 0.0 }),
        Event::rate(4.0, 0.5, cuestage::Curve::Step),
        Event::new(4.0, EventKind::Pitch { semitones: 4.0 }),
        Event::new(5.0, EventKind::Pitch { semitones: 5.0 }),
    ];
    let mut player = Player::new(&project(events), Vec::new());
    player.start(None);
    player.run(4.0, &TICK);

    let times: Vec<f64> = pitches(&player.sink).iter().map(|p| p.0).collect();
    assert_eq!(times, vec![0.0, 2.0, 3.0]);
}

#[test]
fn param_events_drive_shared_automation() {
    let source = r#"(
        name: "params",
        version: "0.1.0",
        events: [
            [2.0, "param", "gain", 0.5, "step"],
            [0.0, "sequence", "pad", "synth", 0.0],
        ],
        sequences: [
            (name: Some("pad"), events: [[1.0, "param", "cutoff", 800.0, "linear"]]),
        ],
    )"#;
    let automation = Arc::new(Mutex::new(AutomationStore::new(AutomationConfig::default())));
    let sink = AutomatingSink::new(automation.clone(), Vec::new());
    let mut player = Player::new(&Project::from_ron(source).unwrap(), sink);
    player.start(None);
    player.run(2.0, &TICK);

    let store = automation.lock();
    let gain = ParamId::new("gain");
    let cutoff = ParamId::new("synth.cutoff");
    assert_eq!(store.value_at_time(&gain, 0.5).unwrap(), 0.0);
    assert_eq!(store.value_at_time(&gain, 1.0).unwrap(), 0.5);
    assert_eq!(store.value_at_time(&cutoff, 0.5).unwrap(), 800.0);
    assert_eq!(store.value_at_time(&cutoff, 3.0).unwrap(), 800.0);
    assert_eq!(player.sink.inner().len(), 2);
}

#[test]
fn missing_sequence_does_not_stop_playback() {
    let source = r#"(
        name: "missing",
        version: "0.1.0",
        events: [
            [0.0, "sequence", "nowhere", "", 0.0],
            [1.0, "pitch", 3.0],
        ],
    )"#;
    let mut player = Player::new(&Project::from_ron(source).unwrap(), Vec::new());
    player.start(None);
    player.run(2.0, &TICK);

    assert_eq!(pitches(&player.sink), vec![(0.5, None, 3.0)]);
}

#[test]
fn looping_repeats_until_stopped() {
    let events = vec![
        Event::new(0.0, EventKind::Pitch { semitones: 0.0 }),
        Event::new(1.0, EventKind::Pitch { semitones: 1.0 }),
    ];
    let mut player = Player::new(&project(events), Vec::new());
    player.sequencer.set_loop(Some(2.0)).unwrap();
    player.start(None);
    player.run(2.2, &TICK);

    let times: Vec<f64> = pitches(&player.sink).iter().map(|p| p.0).collect();
    assert_eq!(times, vec![0.0, 0.5, 1.0, 1.5, 2.0, 2.5]);
    assert!(player.sequencer.is_playing());

    player.stop();
    let delivered = player.sink.len();
    player.run(4.0, &TICK);
    assert_eq!(player.sink.len(), delivered);
    assert!(!player.timer.is_active());
}

#[test]
fn resume_skips_nested_sequences_started_earlier() {
    let source = r#"(
        name: "resume",
        version: "0.1.0",
        events: [
            [0.0, "sequence", "run", "lead", 0.0],
            [3.0, "pitch", 30.0],
        ],
        sequences: [
            (name: Some("run"), events: [
                [0.0, "pitch", 0.0], [1.0, "pitch", 1.0], [2.0, "pitch", 2.0],
                [3.0, "pitch", 3.0], [4.0, "pitch", 4.0], [5.0, "pitch", 5.0],
            ]),
        ],
    )"#;
    let mut player = Player::new(&Project::from_ron(source).unwrap(), Vec::new());
    player.start(None);
    player.run(0.5, &TICK);
    assert_eq!(
        pitches(&player.sink),
        vec![(0.0, Some("lead"), 0.0), (0.5, Some("lead"), 1.0)]
    );

    player.clock.set(1.0);
    player.stop();
    assert_eq!(player.sequencer.resume_beat(), 2.0);

    player.sink.clear();
    player.clock.set(5.0);
    player.start(None);
    player.run(7.0, &TICK);

    assert_eq!(pitches(&player.sink), vec![(5.5, None, 30.0)]);
    assert_eq!(player.sequencer.status(), PlaybackStatus::Done);
}
