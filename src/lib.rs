//! Runtime input-processing core.
//!
//! Turns raw per-device activity into phase-tagged, action-resolved events for
//! one or more concurrently connected users.
//!
//! # Pipeline
//!
//! ```text
//! InputSystem::read ──► per-user fan-out ──► UserAggregator ──► ControllerReadOrchestrator
//!  (cancellation)        (executor)          (arbitration)      (time-boxed read)
//!                                                  │
//!                                                  ▼
//!                       TriggeredActionEvent ◄── resolver ◄── DeviceStateTracker
//!                                                               (phases, pointer motion)
//! ```
//!
//! Device polling, configuration and scheme storage are collaborators: readers
//! implement [`device::DeviceReader`], configuration arrives as a
//! [`config::InputConfig`] and is validated once when the [`system::InputSystem`]
//! is built.

pub mod action;
pub mod config;
pub mod controller;
pub mod device;
pub mod executor;
pub mod input;
pub mod notify;
pub mod system;
pub mod user;

pub use action::{ActionError, ActionRegistry, ActivationContext, ActiveInputScheme};
pub use config::{ConfigError, InputConfig, ValidationIssue};
pub use controller::{Controller, ControllerConfig};
pub use device::{DeviceId, DeviceReader, RawActivation, RawValue, ReadContext, ReadError};
pub use input::{Axis, DeviceFamily, InputId, Phase, Vec2};
pub use notify::{Notification, NotificationHub};
pub use system::{InputSystem, ReadReport, SystemError};
pub use user::UserId;
