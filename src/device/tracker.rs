//! Per-device registry of live input states
//!
//! One tracker per paired device, owned exclusively by the read cycle of that
//! device. Power states (digital, analog, composite) and pointer states live
//! in separate maps keyed by input id. Reports are routed by the input's
//! catalog kind, so a `(device, input)` pair never has more than one state.

use super::{DeviceId, RawActivation, RawValue};
use crate::input::{
    Axis, DeviceFamily, InputCatalog, InputId, InputKind, InputState, Phase, PointerMotion,
    PointerSample, PointerState, PowerMap, PowerState, StateOptions, StateStep, Vec2,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Runtime kind of a tracked state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StateKind {
    Power,
    Pointer,
}

/// Address of a tracked state inside its tracker
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub kind: StateKind,
    pub input: InputId,
}

/// Payload carried by an activation
#[derive(Clone, Debug, PartialEq)]
pub enum ActivationPayload {
    Power(PowerMap),
    Pointer(PointerMotion),
}

/// Phase-tagged report of one input for one cycle
#[derive(Clone, Debug, PartialEq)]
pub struct Activation {
    pub input: InputId,
    pub family: DeviceFamily,
    pub phase: Phase,
    /// Active time accumulated since the interaction started
    pub duration: Duration,
    pub phase_duration: Duration,
    pub tap_count: u32,
    pub payload: ActivationPayload,
}

impl Activation {
    fn from_state(family: DeviceFamily, state: &InputState, payload: ActivationPayload) -> Self {
        Self {
            input: state.input().clone(),
            family,
            phase: state.phase(),
            duration: state.duration(),
            phase_duration: state.phase_duration(),
            tap_count: state.tap_count(),
            payload,
        }
    }

    /// Pointer motion, if this is a pointer activation
    pub fn motion(&self) -> Option<&PointerMotion> {
        match &self.payload {
            ActivationPayload::Pointer(motion) => Some(motion),
            ActivationPayload::Power(_) => None,
        }
    }

    /// Magnitude on an axis, if this is a power activation
    pub fn power(&self, axis: Axis) -> Option<f32> {
        match &self.payload {
            ActivationPayload::Power(power) => power.get(&axis).copied(),
            ActivationPayload::Pointer(_) => None,
        }
    }
}

fn full_power() -> PowerMap {
    PowerMap::from([(Axis::X, 1.0)])
}

#[derive(Clone, Debug)]
pub struct DeviceStateTracker {
    device: DeviceId,
    family: DeviceFamily,
    power_states: BTreeMap<InputId, PowerState>,
    pointer_states: BTreeMap<InputId, PointerState>,
    // timestamp of the last applied read, so skipped cycles are not lost time
    last_update: Option<Duration>,
}

impl DeviceStateTracker {
    pub fn new(device: DeviceId, family: DeviceFamily) -> Self {
        Self {
            device,
            family,
            power_states: BTreeMap::new(),
            pointer_states: BTreeMap::new(),
            last_update: None,
        }
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    pub fn get_or_create_power(
        &mut self,
        input: &InputId,
        factory: impl FnOnce() -> PowerState,
    ) -> &mut PowerState {
        self.power_states
            .entry(input.clone())
            .or_insert_with(factory)
    }

    pub fn get_or_create_pointer(
        &mut self,
        input: &InputId,
        factory: impl FnOnce() -> PointerState,
    ) -> &mut PointerState {
        self.pointer_states
            .entry(input.clone())
            .or_insert_with(factory)
    }

    pub fn power(&self, input: &InputId) -> Option<&PowerState> {
        self.power_states.get(input)
    }

    pub fn pointer(&self, input: &InputId) -> Option<&PointerState> {
        self.pointer_states.get(input)
    }

    /// Removes a state from the map of its kind; false if it was not tracked
    pub fn remove(&mut self, key: &StateKey) -> bool {
        match key.kind {
            StateKind::Power => self.power_states.remove(&key.input).is_some(),
            StateKind::Pointer => self.pointer_states.remove(&key.input).is_some(),
        }
    }

    pub fn len(&self) -> usize {
        self.power_states.len() + self.pointer_states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Feeds one read into the phase machines and returns what should be reported
    ///
    /// Inputs present in `reports` are active this cycle; tracked inputs missing
    /// from it are inactive. Each report goes to the state map of the input's
    /// catalog kind, so an input id has at most one state on the device; unknown
    /// ids and payloads that do not fit the kind are dropped. Composite inputs of
    /// the device family are active when all of their members are.
    pub fn apply(
        &mut self,
        reports: Vec<RawActivation>,
        now: Duration,
        catalog: &InputCatalog,
        options: &StateOptions,
    ) -> Vec<Activation> {
        let delta = self
            .last_update
            .map(|last| now.saturating_sub(last))
            .unwrap_or(Duration::ZERO);
        self.last_update = Some(now);

        let mut powered: BTreeMap<InputId, PowerMap> = BTreeMap::new();
        let mut pointed: BTreeMap<InputId, Vec2> = BTreeMap::new();
        for report in reports {
            let Some(input) = catalog.get(self.family, &report.input) else {
                debug!("Ignoring unknown input {} on {}", report.input, self.device);
                continue;
            };
            // the declared kind picks the state map; composites are derived below
            match (&input.kind, report.value) {
                (InputKind::Digital, RawValue::Pressed) => {
                    powered.insert(report.input, full_power());
                }
                (InputKind::Analog, RawValue::Power(power)) => {
                    if power
                        .values()
                        .any(|value| value.abs() > options.analog_activation_threshold)
                    {
                        powered.insert(report.input, power);
                    } else {
                        debug!("Ignoring {} below activation threshold", report.input);
                    }
                }
                (InputKind::Pointer, RawValue::Position(position)) => {
                    pointed.insert(report.input, position);
                }
                (kind, value) => warn!(
                    "Dropping {:?} report for {:?} input {} on {}",
                    value, kind, report.input, self.device
                ),
            }
        }

        for composite in catalog.composites(self.family) {
            if let InputKind::Composite { members } = &composite.kind {
                let all_active = !members.is_empty()
                    && members
                        .iter()
                        .all(|member| powered.contains_key(member) || pointed.contains_key(member));
                if all_active {
                    powered.insert(composite.id.clone(), full_power());
                }
            }
        }

        let family = self.family;
        let mut activations = Vec::new();
        let mut expired = Vec::new();

        for (id, state) in self.power_states.iter_mut() {
            let power = powered.remove(id);
            let active = power.is_some();
            if let Some(power) = power {
                state.set_power(power);
            }
            match state.advance(delta, active, options) {
                StateStep::Report(_) => activations.push(Activation::from_state(
                    family,
                    state.state(),
                    ActivationPayload::Power(state.power().clone()),
                )),
                StateStep::Waiting => {}
                StateStep::Expired => expired.push(StateKey {
                    kind: StateKind::Power,
                    input: id.clone(),
                }),
            }
        }

        for (id, state) in self.pointer_states.iter_mut() {
            let position = pointed.remove(id);
            let active = position.is_some();
            if let Some(position) = position {
                state.push_sample(PointerSample {
                    position,
                    timestamp: now,
                });
            }
            match state.advance(delta, active, options) {
                StateStep::Report(_) => activations.push(Activation::from_state(
                    family,
                    state.state(),
                    ActivationPayload::Pointer(state.motion().unwrap_or_default()),
                )),
                StateStep::Waiting => {}
                StateStep::Expired => expired.push(StateKey {
                    kind: StateKind::Pointer,
                    input: id.clone(),
                }),
            }
        }

        for key in &expired {
            debug!("Input {} on {} concluded", key.input, self.device);
            self.remove(key);
        }

        // whatever is left was not tracked before: fresh interactions
        for (id, power) in powered {
            let device = self.device.clone();
            let state =
                self.get_or_create_power(&id, || PowerState::new(id.clone(), device, power));
            activations.push(Activation::from_state(
                family,
                state.state(),
                ActivationPayload::Power(state.power().clone()),
            ));
        }

        let capacity = options.max_pointer_samples;
        for (id, position) in pointed {
            let device = self.device.clone();
            let state = self.get_or_create_pointer(&id, || {
                PointerState::new(id.clone(), device, capacity)
            });
            state.push_sample(PointerSample {
                position,
                timestamp: now,
            });
            activations.push(Activation::from_state(
                family,
                state.state(),
                ActivationPayload::Pointer(state.motion().unwrap_or_default()),
            ));
        }

        activations.sort_by(|a, b| a.input.cmp(&b.input));
        activations
    }
}
