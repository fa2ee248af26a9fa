mod clock;
mod meter;
mod rate;
mod scheduler;
mod sequence;
mod sequencer;
mod timer;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use meter::{Meter, MeterChange, MeterTable};
pub use rate::{RateCurve, RateSegment, log, root};
pub use scheduler::{CueContext, Scheduler};
pub use sequence::{Library, Lookup, Sequence, SequenceRef};
pub use sequencer::Sequencer;
pub use timer::{CueId, Timer, Wake};
pub use transport::{Nested, PlaybackStatus, TimeBase, Transport};
