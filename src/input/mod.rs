//! Input model: what an input is, and the live state it carries while in use
//!
//! 1. [`Input`] - immutable description (id, device family, kind)
//! 2. [`state`] - per-cycle phase machine for power and pointer states
//! 3. [`motion`] - velocity/acceleration from pointer sample history
//!
//! Inputs are data, not types: a [`InputCatalog`] is filled once from the
//! configuration table and looked up by `(DeviceFamily, InputId)`.

pub mod motion;
pub mod state;

pub use motion::{estimate_motion, PointerMotion, PointerSample};
pub use state::{InputState, PointerState, PowerState, StateOptions, StateStep};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display};
use std::ops::{Add, Div, Sub};

/// Identifier of an input, unique within its device family
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputId(String);

impl InputId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for InputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InputId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Family of physical (or virtual) device an input belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    Keyboard,
    Mouse,
    Gamepad,
    Joystick,
    Touch,
    Virtual,
}

impl Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFamily::Keyboard => write!(f, "keyboard"),
            DeviceFamily::Mouse => write!(f, "mouse"),
            DeviceFamily::Gamepad => write!(f, "gamepad"),
            DeviceFamily::Joystick => write!(f, "joystick"),
            DeviceFamily::Touch => write!(f, "touch"),
            DeviceFamily::Virtual => write!(f, "virtual"),
        }
    }
}

/// What kind of signal an input produces
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputKind {
    Digital,
    Analog,
    Pointer,
    /// Active while every member input is active on the same device
    Composite { members: BTreeSet<InputId> },
}

/// Logical stage of an input's activity cycle. Idle is the absence of state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Active,
    End,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Start => write!(f, "start"),
            Phase::Active => write!(f, "active"),
            Phase::End => write!(f, "end"),
        }
    }
}

/// Analog axis of a power-reporting input
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Magnitude per axis
pub type PowerMap = BTreeMap<Axis, f32>;

/// Two-dimensional position or derivative
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x.powi(2) + self.y.powi(2)).sqrt()
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Div<f32> for Vec2 {
    type Output = Vec2;

    fn div(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x / rhs, self.y / rhs)
    }
}

/// A physical or virtual input capability
#[derive(Clone, Debug, PartialEq)]
pub struct Input {
    pub id: InputId,
    pub name: String,
    pub family: DeviceFamily,
    pub kind: InputKind,
}

impl Input {
    pub fn new(id: impl Into<InputId>, family: DeviceFamily, kind: InputKind) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            family,
            kind,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, InputKind::Composite { .. })
    }

    /// True if `id` is one of the inputs this composite aggregates
    pub fn has_member(&self, id: &InputId) -> bool {
        match &self.kind {
            InputKind::Composite { members } => members.contains(id),
            _ => false,
        }
    }
}

impl From<String> for InputId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Data table of every known input, keyed by family and id
#[derive(Clone, Debug, Default)]
pub struct InputCatalog {
    inputs: HashMap<(DeviceFamily, InputId), Input>,
    // registration order per family, for deterministic composite evaluation
    composites: HashMap<DeviceFamily, Vec<InputId>>,
}

impl InputCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an input; returns false (and keeps the existing entry) on a duplicate id
    pub fn insert(&mut self, input: Input) -> bool {
        let key = (input.family, input.id.clone());
        if self.inputs.contains_key(&key) {
            return false;
        }
        if input.is_composite() {
            self.composites
                .entry(input.family)
                .or_default()
                .push(input.id.clone());
        }
        self.inputs.insert(key, input);
        true
    }

    pub fn get(&self, family: DeviceFamily, id: &InputId) -> Option<&Input> {
        self.inputs.get(&(family, id.clone()))
    }

    pub fn contains(&self, family: DeviceFamily, id: &InputId) -> bool {
        self.inputs.contains_key(&(family, id.clone()))
    }

    /// Composite inputs of a family, in registration order
    pub fn composites(&self, family: DeviceFamily) -> impl Iterator<Item = &Input> + '_ {
        self.composites
            .get(&family)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.get(family, id))
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo() -> Input {
        Input::new(
            "save",
            DeviceFamily::Keyboard,
            InputKind::Composite {
                members: [InputId::from("ctrl"), InputId::from("s")].into_iter().collect(),
            },
        )
    }

    #[test]
    fn composite_membership_is_set_based() {
        let input = combo();
        assert!(input.is_composite());
        assert!(input.has_member(&"ctrl".into()));
        assert!(!input.has_member(&"shift".into()));
        assert!(!Input::new("s", DeviceFamily::Keyboard, InputKind::Digital).has_member(&"s".into()));
    }

    #[test]
    fn catalog_rejects_duplicates_per_family() {
        let mut catalog = InputCatalog::new();
        assert!(catalog.insert(Input::new("south", DeviceFamily::Gamepad, InputKind::Digital)));
        assert!(!catalog.insert(Input::new("south", DeviceFamily::Gamepad, InputKind::Analog)));
        // same id, other family is fine
        assert!(catalog.insert(Input::new("south", DeviceFamily::Joystick, InputKind::Digital)));
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.get(DeviceFamily::Gamepad, &"south".into()).map(|i| &i.kind),
            Some(&InputKind::Digital)
        );
    }

    #[test]
    fn composites_keep_registration_order() {
        let mut catalog = InputCatalog::new();
        catalog.insert(combo());
        catalog.insert(Input::new(
            "copy",
            DeviceFamily::Keyboard,
            InputKind::Composite {
                members: [InputId::from("ctrl"), InputId::from("c")].into_iter().collect(),
            },
        ));
        let ids: Vec<_> = catalog
            .composites(DeviceFamily::Keyboard)
            .map(|i| i.id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["save", "copy"]);
        assert_eq!(catalog.composites(DeviceFamily::Mouse).count(), 0);
    }
}
