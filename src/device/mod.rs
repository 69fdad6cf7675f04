//! Device subsystem: raw activity in, tracked input state out
//!
//! 1. [`DeviceReader`] - injected polling capability (one per input receiver)
//! 2. [`tracker`] - per-device registry of live power and pointer states
//! 3. [`replay`] - scripted reader used by the demo binary and tests
//!
//! ```text
//! DeviceReader ──► RawActivation ──► DeviceStateTracker ──► Activation
//!  (collaborator)   (id + payload)    (phase machine)       (phase-tagged)
//! ```

pub mod replay;
pub mod tracker;

pub use replay::{ScriptFrame, ScriptedReader};
pub use tracker::{Activation, ActivationPayload, DeviceStateTracker, StateKey, StateKind};

use crate::input::{Axis, InputId, PowerMap, Vec2};
use crate::user::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identifier of a physical device instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Payload of one raw report
#[derive(Clone, Debug, PartialEq)]
pub enum RawValue {
    /// Digital input held down
    Pressed,
    /// Analog magnitude per axis
    Power(PowerMap),
    /// Pointer position
    Position(Vec2),
}

/// One input reported as active by a device read
#[derive(Clone, Debug, PartialEq)]
pub struct RawActivation {
    pub input: InputId,
    pub value: RawValue,
}

impl RawActivation {
    pub fn pressed(input: impl Into<InputId>) -> Self {
        Self {
            input: input.into(),
            value: RawValue::Pressed,
        }
    }

    pub fn power(input: impl Into<InputId>, axes: impl IntoIterator<Item = (Axis, f32)>) -> Self {
        Self {
            input: input.into(),
            value: RawValue::Power(axes.into_iter().collect()),
        }
    }

    pub fn position(input: impl Into<InputId>, position: Vec2) -> Self {
        Self {
            input: input.into(),
            value: RawValue::Position(position),
        }
    }
}

/// What a reader gets to know about the read it is serving
#[derive(Clone, Debug, PartialEq)]
pub struct ReadContext {
    pub user: UserId,
    pub device: DeviceId,
    /// Sequence number of the top-level read
    pub cycle: u64,
    /// Time since the input system started
    pub now: Duration,
}

/// Errors raised by a device reader
///
/// Never fatal to a read cycle: the failing receiver contributes nothing and
/// the error is surfaced as a diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("Device {device} unavailable: {message}")]
    Unavailable { device: DeviceId, message: String },

    #[error("Device {device} read failed: {message}")]
    Failed { device: DeviceId, message: String },

    #[error("Device {device} sent malformed data: {message}")]
    Malformed { device: DeviceId, message: String },
}

/// Polling capability for one input receiver
///
/// Implementations must treat `cancel` as a normal end of the read and return
/// whatever they have (usually nothing) rather than an error.
#[async_trait]
pub trait DeviceReader: Send + Sync + 'static {
    /// Human readable receiver name used in diagnostics
    fn name(&self) -> &str;

    /// Reports the inputs currently active on the device
    async fn read(
        &self,
        context: &ReadContext,
        cancel: CancellationToken,
    ) -> Result<Vec<RawActivation>, ReadError>;
}
