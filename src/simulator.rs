// Synthetic muscle signal generator
//
// Stands in for the hardware when no sensor is attached. Each tick yields
// base + pattern offset + uniform noise, plus an occasional positive spike
// that emulates a contraction.

use crate::config::clamp_or_default;
use crate::types::Reading;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;

/// Resting signal level
pub const BASE_VALUE: f64 = 500.0;
/// Noise amplitude at 100% noise. The default 20% gives ±25.
pub const FULL_SCALE_NOISE: f64 = 125.0;
/// Chance per tick of a contraction spike
pub const SPIKE_PROBABILITY: f64 = 0.1;
pub const SPIKE_MIN: f64 = 100.0;
pub const SPIKE_MAX: f64 = 400.0;

const SINE_AMPLITUDE: f64 = 150.0;
const SINE_PERIOD_TICKS: u64 = 40;
const STEP_HEIGHT: f64 = 250.0;
const STEP_LENGTH_TICKS: u64 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignalPattern {
    #[default]
    Random,
    Sine,
    Steps,
}

impl fmt::Display for SignalPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalPattern::Random => "random",
            SignalPattern::Sine => "sine",
            SignalPattern::Steps => "steps",
        };
        f.write_str(name)
    }
}

impl FromStr for SignalPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(SignalPattern::Random),
            "sine" => Ok(SignalPattern::Sine),
            "steps" => Ok(SignalPattern::Steps),
            other => Err(format!("unknown signal pattern: {}", other)),
        }
    }
}

/// Simulator settings. Only mutable while simulation mode is selected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SimulationConfig {
    pub pattern: SignalPattern,
    /// Noise level in percent, `[0, 100]`
    pub noise_percent: f64,
    /// True while the simulator timer is running
    pub active: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            pattern: SignalPattern::Random,
            noise_percent: 20.0,
            active: false,
        }
    }
}

impl SimulationConfig {
    pub fn new(pattern: SignalPattern, noise_percent: f64) -> Self {
        Self {
            pattern,
            noise_percent: clamp_noise(noise_percent),
            active: false,
        }
    }

    pub fn set_noise(&mut self, noise_percent: f64) {
        self.noise_percent = clamp_noise(noise_percent);
    }

    /// Half-width of the uniform noise band in sensor units
    pub fn noise_amplitude(&self) -> f64 {
        self.noise_percent / 100.0 * FULL_SCALE_NOISE
    }
}

fn clamp_noise(noise_percent: f64) -> f64 {
    clamp_or_default(
        "simulation noise",
        noise_percent,
        0.0,
        100.0,
        SimulationConfig::default().noise_percent,
    )
}

pub struct SignalSimulator {
    rng: StdRng,
    tick: u64,
}

impl SignalSimulator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            tick: 0,
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            tick: 0,
        }
    }

    /// Produce the next synthetic reading
    pub fn next_value(&mut self, config: &SimulationConfig) -> Reading {
        let offset = pattern_offset(config.pattern, self.tick);
        self.tick = self.tick.wrapping_add(1);

        let amplitude = config.noise_amplitude();
        let noise = if amplitude > 0.0 {
            self.rng.gen_range(-amplitude..amplitude)
        } else {
            0.0
        };

        let spike = if self.rng.gen_bool(SPIKE_PROBABILITY) {
            self.rng.gen_range(SPIKE_MIN..SPIKE_MAX)
        } else {
            0.0
        };

        BASE_VALUE + offset + noise + spike
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }
}

impl Default for SignalSimulator {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern_offset(pattern: SignalPattern, tick: u64) -> f64 {
    match pattern {
        SignalPattern::Random => 0.0,
        SignalPattern::Sine => {
            let phase = (tick % SINE_PERIOD_TICKS) as f64 / SINE_PERIOD_TICKS as f64;
            SINE_AMPLITUDE * (phase * TAU).sin()
        }
        SignalPattern::Steps => {
            if (tick / STEP_LENGTH_TICKS) % 2 == 1 {
                STEP_HEIGHT
            } else {
                0.0
            }
        }
    }
}
