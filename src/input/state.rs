//! Per-cycle phase machine for live input state
//!
//! ```text
//!            active                 active, duration >= threshold
//! (none) ───────────► Start ──────────────────────────────► Active
//!                       │                                     │
//!                       └──────────── inactive ───────────────┤
//!                                                             ▼
//!   (removed) ◄── inactive >= tap window ──────────────────── End
//!                                                             │
//!   Start/Active ◄── active within tap window (tap + 1) ──────┘
//! ```
//!
//! `duration` is active time accumulated since the interaction's first Start
//! and drives the Start→Active threshold. It is not reset by the Start→Active
//! transition or by a tap reactivation. `phase_duration` is time in the
//! current phase.

use super::motion::{estimate_motion, PointerMotion, PointerSample};
use super::{InputId, Phase, PowerMap};
use crate::device::DeviceId;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Timing and sizing options applied by the phase machine
///
/// Values are validated when the configuration is compiled; the transition
/// function assumes they are well formed.
#[derive(Clone, Debug, PartialEq)]
pub struct StateOptions {
    /// Accumulated active time after which Start becomes Active
    pub active_time_threshold: Duration,
    /// Time after End during which a new activation continues the interaction
    pub tap_reactivation_time: Duration,
    /// Minimum axis magnitude for an analog report to count as active
    pub analog_activation_threshold: f32,
    /// Maximum pointer samples kept per pointer state
    pub max_pointer_samples: usize,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            active_time_threshold: Duration::from_millis(150),
            tap_reactivation_time: Duration::from_millis(250),
            analog_activation_threshold: 0.05,
            max_pointer_samples: 8,
        }
    }
}

/// Outcome of one per-cycle transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateStep {
    /// The input is (or just became) in this phase and should be reported
    Report(Phase),
    /// Ended earlier; waiting out the reactivation window
    Waiting,
    /// Reactivation window elapsed; the state should be removed
    Expired,
}

/// Live activity of one input on one device
#[derive(Clone, Debug, PartialEq)]
pub struct InputState {
    input: InputId,
    device: DeviceId,
    phase: Phase,
    duration: Duration,
    phase_duration: Duration,
    inactive_duration: Option<Duration>,
    tap_count: u32,
}

impl InputState {
    /// Fresh interaction: Start, zero duration, first tap
    pub fn start(input: InputId, device: DeviceId) -> Self {
        Self {
            input,
            device,
            phase: Phase::Start,
            duration: Duration::ZERO,
            phase_duration: Duration::ZERO,
            inactive_duration: None,
            tap_count: 1,
        }
    }

    pub fn input(&self) -> &InputId {
        &self.input
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn phase_duration(&self) -> Duration {
        self.phase_duration
    }

    /// Time since the last positive activity; `None` while active
    pub fn inactive_duration(&self) -> Option<Duration> {
        self.inactive_duration
    }

    pub fn tap_count(&self) -> u32 {
        self.tap_count
    }

    /// Applies one cycle worth of elapsed time and the device's active signal
    pub fn advance(&mut self, delta: Duration, active: bool, options: &StateOptions) -> StateStep {
        match (self.phase, active) {
            (Phase::Start | Phase::Active, true) => {
                self.duration += delta;
                self.phase_duration += delta;
                if self.phase == Phase::Start && self.duration >= options.active_time_threshold {
                    self.enter(Phase::Active);
                }
                StateStep::Report(self.phase)
            }
            (Phase::Start | Phase::Active, false) => {
                self.enter(Phase::End);
                self.inactive_duration = Some(Duration::ZERO);
                StateStep::Report(Phase::End)
            }
            (Phase::End, false) => {
                let inactive = self.inactive_duration.unwrap_or_default() + delta;
                self.inactive_duration = Some(inactive);
                self.phase_duration += delta;
                if inactive >= options.tap_reactivation_time {
                    StateStep::Expired
                } else {
                    StateStep::Waiting
                }
            }
            (Phase::End, true) => {
                let inactive = self.inactive_duration.unwrap_or_default() + delta;
                if inactive < options.tap_reactivation_time {
                    self.tap_count += 1;
                    self.inactive_duration = None;
                    let next = if self.duration >= options.active_time_threshold {
                        Phase::Active
                    } else {
                        Phase::Start
                    };
                    debug!(
                        "Input {} reactivated after {:?} (tap {})",
                        self.input, inactive, self.tap_count
                    );
                    self.enter(next);
                    StateStep::Report(next)
                } else {
                    // window elapsed while the device was not read: fresh interaction
                    *self = Self::start(self.input.clone(), self.device.clone());
                    StateStep::Report(Phase::Start)
                }
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_duration = Duration::ZERO;
    }
}

/// Analog (or digital) input state with its latest magnitude per axis
#[derive(Clone, Debug, PartialEq)]
pub struct PowerState {
    base: InputState,
    power: PowerMap,
}

impl PowerState {
    pub fn new(input: InputId, device: DeviceId, power: PowerMap) -> Self {
        Self {
            base: InputState::start(input, device),
            power,
        }
    }

    pub fn state(&self) -> &InputState {
        &self.base
    }

    pub fn power(&self) -> &PowerMap {
        &self.power
    }

    pub fn set_power(&mut self, power: PowerMap) {
        self.power = power;
    }

    pub fn advance(&mut self, delta: Duration, active: bool, options: &StateOptions) -> StateStep {
        self.base.advance(delta, active, options)
    }
}

/// Pointer input state with a bounded, time-ordered sample history
#[derive(Clone, Debug, PartialEq)]
pub struct PointerState {
    base: InputState,
    samples: VecDeque<PointerSample>,
    capacity: usize,
}

impl PointerState {
    pub fn new(input: InputId, device: DeviceId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            base: InputState::start(input, device),
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn state(&self) -> &InputState {
        &self.base
    }

    /// Appends a sample, evicting the oldest beyond capacity
    pub fn push_sample(&mut self, sample: PointerSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn samples(&self) -> impl ExactSizeIterator<Item = &PointerSample> + '_ {
        self.samples.iter()
    }

    pub fn motion(&self) -> Option<PointerMotion> {
        estimate_motion(self.samples.iter())
    }

    pub fn advance(&mut self, delta: Duration, active: bool, options: &StateOptions) -> StateStep {
        self.base.advance(delta, active, options)
    }
}
