//! Where scheduled events go.

use parking_lot::Mutex;
use ringbuf::HeapProd;
use ringbuf::traits::{Observer, Producer};
use std::sync::Arc;
use tracing::warn;

use crate::automation::{AutomationStore, ParamId};
use crate::error::{Error, Result};
use crate::events::{EventKind, ScheduledEvent};

/// Receives batches of events, ordered by time, from the cue loop.
pub trait EventSink {
    fn push(&mut self, batch: &[ScheduledEvent]) -> Result<()>;
}

impl EventSink for Vec<ScheduledEvent> {
    fn push(&mut self, batch: &[ScheduledEvent]) -> Result<()> {
        self.extend_from_slice(batch);
        Ok(())
    }
}

/// Producer half of the ring read by the renderer.
pub struct RingSink {
    producer: HeapProd<ScheduledEvent>,
}

impl RingSink {
    pub fn new(producer: HeapProd<ScheduledEvent>) -> Self {
        Self { producer }
    }
}

impl EventSink for RingSink {
    /// Pushes the whole batch or, when it does not fit, none of it.
    fn push(&mut self, batch: &[ScheduledEvent]) -> Result<()> {
        if self.producer.vacant_len() < batch.len() {
            return Err(Error::BufferFull);
        }
        for event in batch {
            if self.producer.try_push(event.clone()).is_err() {
                return Err(Error::BufferFull);
            }
        }
        Ok(())
    }
}

/// Applies `param` events to a shared automation store before passing the
/// batch on.
pub struct AutomatingSink<S> {
    automation: Arc<Mutex<AutomationStore>>,
    inner: S,
}

impl<S: EventSink> AutomatingSink<S> {
    pub fn new(automation: Arc<Mutex<AutomationStore>>, inner: S) -> Self {
        Self { automation, inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: EventSink> EventSink for AutomatingSink<S> {
    fn push(&mut self, batch: &[ScheduledEvent]) -> Result<()> {
        {
            let mut automation = self.automation.lock();
            for event in batch {
                if let EventKind::Param {
                    name,
                    value,
                    curve,
                    duration,
                } = &event.kind
                {
                    let param = ParamId::scoped(event.target.as_deref(), name);
                    if let Err(error) =
                        automation.schedule(&param, event.time, *curve, *value, *duration)
                    {
                        warn!(%error, %param, time = event.time, "automation rejected");
                    }
                }
            }
        }
        self.inner.push(batch)
    }
}
