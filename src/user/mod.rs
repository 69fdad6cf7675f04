//! Users and the devices paired to them
//!
//! Each user owns a [`UserAggregator`] holding its paired devices in
//! registration order, its active scheme and its active device.

pub mod aggregator;

pub use aggregator::{UserAggregator, UserReadResult};

use crate::controller::Controller;
use crate::device::{DeviceId, DeviceStateTracker};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A physical device bound to a user, with the live state tracked for it
///
/// Only connected devices are paired: a disconnect notification removes the
/// pairing together with its tracked state.
#[derive(Debug)]
pub struct PairedDevice {
    pub user: UserId,
    pub device: DeviceId,
    pub controller: Controller,
    pub tracker: DeviceStateTracker,
}

impl PairedDevice {
    pub fn new(user: UserId, device: DeviceId, controller: Controller) -> Self {
        let tracker = DeviceStateTracker::new(device.clone(), controller.config().family);
        Self {
            user,
            device,
            controller,
            tracker,
        }
    }
}
