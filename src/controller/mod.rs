//! Controller subsystem: logical groupings of input receivers
//!
//! A [`Controller`] bundles one or more [`DeviceReader`]s (several sensors under
//! one logical device) with its [`ControllerConfig`]. The
//! [`orchestrator`] reads all receivers of a controller under one time budget.
//!
//! ```text
//! Controller ──► ControllerReadOrchestrator ──► ControllerRead
//! (receivers)     (timeout + fault isolation)    (concatenated activations)
//! ```

pub mod orchestrator;

pub use orchestrator::{ControllerRead, ControllerReadOrchestrator, ReceiverFault};

use crate::device::DeviceReader;
use crate::input::DeviceFamily;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Static description of a controller, reported with "active controller changed"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    pub family: DeviceFamily,
    /// Overrides the runtime-wide read budget for this controller
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,
}

impl ControllerConfig {
    pub fn new(name: impl Into<String>, family: DeviceFamily) -> Self {
        Self {
            name: name.into(),
            family,
            read_timeout_ms: None,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Clone)]
pub struct Controller {
    config: ControllerConfig,
    receivers: Vec<Arc<dyn DeviceReader>>,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            receivers: Vec::new(),
        }
    }

    pub fn with_receiver(mut self, receiver: Arc<dyn DeviceReader>) -> Self {
        self.receivers.push(receiver);
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn receivers(&self) -> &[Arc<dyn DeviceReader>] {
        &self.receivers
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field(
                "receivers",
                &self.receivers.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
