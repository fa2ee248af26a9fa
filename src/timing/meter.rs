//! Bars and time signatures over a beat grid.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, non_negative};
use crate::events::{Event, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    /// Beats per bar.
    pub numerator: u32,
    /// Notational only; does not change bar length.
    pub denominator: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterChange {
    pub beat: f64,
    pub meter: Meter,
}

impl MeterChange {
    fn bar_length(&self) -> f64 {
        self.meter.numerator as f64
    }
}

/// Bar and beat conversion over a list of meter changes.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterTable {
    anchor: MeterChange,
    changes: Vec<MeterChange>,
}

impl MeterTable {
    pub fn new((numerator, denominator): (u32, u32)) -> Self {
        Self {
            anchor: MeterChange {
                beat: 0.0,
                meter: Meter {
                    numerator,
                    denominator,
                },
            },
            changes: Vec::new(),
        }
    }

    pub fn from_events<'a>(
        events: impl IntoIterator<Item = &'a Event>,
        default_meter: (u32, u32),
    ) -> Result<Self> {
        let mut table = Self::new(default_meter);
        for event in events {
            if let EventKind::Meter {
                numerator,
                denominator,
            } = event.kind
            {
                table.set_meter_at_beat(event.beat, numerator, denominator)?;
            }
        }
        Ok(table)
    }

    pub fn changes(&self) -> &[MeterChange] {
        &self.changes
    }

    /// Zero-based bar containing `beat`.
    pub fn bar_at_beat(&self, beat: f64) -> Result<u32> {
        let beat = non_negative("beat", beat)?;
        let mut bars = 0.0;
        let mut current = self.anchor;

        for change in self.changes.iter().take_while(|c| c.beat < beat) {
            bars += ((change.beat - current.beat) / current.bar_length()).floor();
            current = *change;
        }

        bars += ((beat - current.beat) / current.bar_length()).floor();
        Ok(bars as u32)
    }

    /// Beat at which `bar` starts.
    pub fn beat_at_bar(&self, bar: u32) -> f64 {
        let bar = bar as f64;
        let mut bars = 0.0;
        let mut current = self.anchor;

        for change in &self.changes {
            let reached = bars + (change.beat - current.beat) / current.bar_length();
            if reached >= bar {
                break;
            }
            bars = reached;
            current = *change;
        }

        current.beat + (bar - bars) * current.bar_length()
    }

    /// Changes the meter from `beat` on, discarding later changes.
    pub fn set_meter_at_beat(&mut self, beat: f64, numerator: u32, denominator: u32) -> Result<()> {
        let beat = non_negative("meter beat", beat)?;
        if numerator == 0 || denominator == 0 {
            return Err(Error::InvalidValue {
                what: "meter",
                value: numerator.min(denominator) as f64,
            });
        }

        let keep = self.changes.partition_point(|c| c.beat < beat);
        self.changes.truncate(keep);
        self.changes.push(MeterChange {
            beat,
            meter: Meter {
                numerator,
                denominator,
            },
        });
        Ok(())
    }

    pub fn meter_at_beat(&self, beat: f64) -> Result<Meter> {
        let beat = non_negative("beat", beat)?;
        let n = self.changes.partition_point(|c| c.beat <= beat);
        Ok(match n.checked_sub(1) {
            Some(i) => self.changes[i].meter,
            None => self.anchor.meter,
        })
    }
}
