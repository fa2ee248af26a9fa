use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Error, ProjectError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Seconds between wakes
    pub duration: f64,
    /// Seconds scheduled beyond the next wake
    pub lookahead: f64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            duration: 0.24,
            lookahead: 0.12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Values at or below this are treated as zero when scheduling
    /// exponential curves.
    pub min_exponential_value: f32,
    /// Multiple of a target curve's time constant after which it is
    /// considered settled.
    pub target_duration_factor: f64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            min_exponential_value: 1.40130e-45,
            target_duration_factor: 9.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Beats per second before any tempo change
    pub default_rate: f64,
    /// (numerator, denominator) before any meter change
    pub default_meter: (u32, u32),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_rate: 2.0,
            default_meter: (4, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the ring carrying scheduled events to the renderer
    pub ring_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 4096,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timer: TimerConfig,
    pub automation: AutomationConfig,
    pub transport: TransportConfig,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_ron(source: &str) -> std::result::Result<Self, ProjectError> {
        let config: Config = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> std::result::Result<Self, ProjectError> {
        let source = fs::read_to_string(path)?;
        Self::from_ron(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.timer.duration.is_finite() && self.timer.duration > 0.0) {
            return Err(Error::InvalidValue {
                what: "timer duration",
                value: self.timer.duration,
            });
        }
        if !(self.timer.lookahead.is_finite() && self.timer.lookahead >= 0.0) {
            return Err(Error::InvalidValue {
                what: "timer lookahead",
                value: self.timer.lookahead,
            });
        }
        if !(self.transport.default_rate.is_finite() && self.transport.default_rate > 0.0) {
            return Err(Error::InvalidValue {
                what: "default rate",
                value: self.transport.default_rate,
            });
        }
        if self.transport.default_meter.0 == 0 || self.transport.default_meter.1 == 0 {
            return Err(Error::InvalidValue {
                what: "default meter",
                value: 0.0,
            });
        }
        if !(self.automation.target_duration_factor.is_finite()
            && self.automation.target_duration_factor >= 0.0)
        {
            return Err(Error::InvalidValue {
                what: "target duration factor",
                value: self.automation.target_duration_factor,
            });
        }
        if self.engine.ring_capacity == 0 {
            return Err(Error::InvalidValue {
                what: "ring capacity",
                value: 0.0,
            });
        }
        Ok(())
    }
}
