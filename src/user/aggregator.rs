//! Per-user read cycle with active device arbitration
//!
//! Once a device is known to be live only that device is read each cycle. When
//! it goes silent the remaining paired devices are tried in registration order
//! and the first one with something to report takes over. Switching the active
//! device publishes [`Notification::ActiveControllerChanged`].

use super::{PairedDevice, UserId};
use crate::action::{dispatch, ResolvedScheme, TriggeredActionEvent};
use crate::controller::{Controller, ControllerReadOrchestrator};
use crate::device::{Activation, DeviceId, ReadContext};
use crate::input::{InputCatalog, StateOptions};
use crate::notify::{Notification, NotificationHub};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of one user's read cycle
#[derive(Clone, Debug, PartialEq)]
pub struct UserReadResult {
    pub user: UserId,
    /// Device the activations came from, if any reported
    pub device: Option<DeviceId>,
    pub activations: Vec<Activation>,
    pub triggered: Vec<TriggeredActionEvent>,
}

impl UserReadResult {
    fn empty(user: UserId) -> Self {
        Self {
            user,
            device: None,
            activations: Vec::new(),
            triggered: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.activations.is_empty()
    }
}

#[derive(Debug)]
pub struct UserAggregator {
    user: UserId,
    scheme: Arc<ResolvedScheme>,
    devices: Vec<PairedDevice>,
    active_device: Option<DeviceId>,
    orchestrator: ControllerReadOrchestrator,
    catalog: Arc<InputCatalog>,
    options: StateOptions,
    notifications: Arc<NotificationHub>,
}

impl UserAggregator {
    pub fn new(
        user: UserId,
        scheme: Arc<ResolvedScheme>,
        orchestrator: ControllerReadOrchestrator,
        catalog: Arc<InputCatalog>,
        options: StateOptions,
        notifications: Arc<NotificationHub>,
    ) -> Self {
        Self {
            user,
            scheme,
            devices: Vec::new(),
            active_device: None,
            orchestrator,
            catalog,
            options,
            notifications,
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    pub fn scheme(&self) -> &Arc<ResolvedScheme> {
        &self.scheme
    }

    /// Replaces the scheme wholesale
    pub fn set_scheme(&mut self, scheme: Arc<ResolvedScheme>) {
        self.scheme = scheme;
    }

    pub fn active_device(&self) -> Option<&DeviceId> {
        self.active_device.as_ref()
    }

    pub fn devices(&self) -> impl Iterator<Item = &PairedDevice> + '_ {
        self.devices.iter()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn has_device(&self, device: &DeviceId) -> bool {
        self.position(device).is_some()
    }

    /// Pairs a device; false if it was already paired (nothing changes)
    pub fn add_device(&mut self, device: DeviceId, controller: Controller) -> bool {
        if self.has_device(&device) {
            debug!("Device {} already paired to {}", device, self.user);
            return false;
        }
        info!(
            "Pairing device {} ({}) to user {}",
            device,
            controller.config().name,
            self.user
        );
        self.devices
            .push(PairedDevice::new(self.user.clone(), device, controller));
        true
    }

    /// Unpairs a device, dropping its tracked state; clears the active device if it was this one
    pub fn remove_device(&mut self, device: &DeviceId) -> Option<PairedDevice> {
        let index = self.position(device)?;
        if self.active_device.as_ref() == Some(device) {
            debug!("Active device {} of {} removed", device, self.user);
            self.active_device = None;
        }
        info!("Unpairing device {} from user {}", device, self.user);
        Some(self.devices.remove(index))
    }

    fn position(&self, device: &DeviceId) -> Option<usize> {
        self.devices.iter().position(|paired| &paired.device == device)
    }

    /// Runs one arbitration cycle and dispatches the resulting actions
    pub async fn read_cycle(
        &mut self,
        cycle: u64,
        now: Duration,
        cancel: &CancellationToken,
    ) -> UserReadResult {
        let mut tried = None;

        if let Some(index) = self.active_device.as_ref().and_then(|d| self.position(d)) {
            let activations = self.read_device(index, cycle, now, cancel).await;
            if !activations.is_empty() {
                return self.finish(index, activations);
            }
            debug!(
                "Active device {} of {} silent in cycle {}",
                self.devices[index].device, self.user, cycle
            );
            tried = Some(index);
        }

        for index in 0..self.devices.len() {
            if Some(index) == tried {
                continue;
            }
            if cancel.is_cancelled() {
                break;
            }
            let activations = self.read_device(index, cycle, now, cancel).await;
            if activations.is_empty() {
                continue;
            }

            let device = self.devices[index].device.clone();
            if self.active_device.as_ref() != Some(&device) {
                let previous = self.active_device.replace(device.clone());
                info!(
                    "Active controller of {} changed: {:?} -> {}",
                    self.user, previous, device
                );
                self.notifications
                    .publish(Notification::ActiveControllerChanged {
                        user: self.user.clone(),
                        previous,
                        device,
                        controller: self.devices[index].controller.config().clone(),
                        at: Local::now(),
                    });
            }
            return self.finish(index, activations);
        }

        UserReadResult::empty(self.user.clone())
    }

    async fn read_device(
        &mut self,
        index: usize,
        cycle: u64,
        now: Duration,
        cancel: &CancellationToken,
    ) -> Vec<Activation> {
        let paired = &mut self.devices[index];
        let context = ReadContext {
            user: self.user.clone(),
            device: paired.device.clone(),
            cycle,
            now,
        };
        let read = self
            .orchestrator
            .read(&paired.controller, &context, cancel)
            .await;

        if read.timed_out {
            debug!(
                "Device {} of {} missed its read budget in cycle {}, treating it as silent",
                paired.device, self.user, cycle
            );
        }
        for fault in read.faults {
            self.notifications.publish(Notification::ReaderFault {
                user: self.user.clone(),
                device: paired.device.clone(),
                receiver: fault.receiver,
                message: fault.message,
            });
        }

        // an interrupted read says nothing about which inputs were released
        if cancel.is_cancelled() {
            return Vec::new();
        }
        paired
            .tracker
            .apply(read.activations, now, &self.catalog, &self.options)
    }

    fn finish(&self, index: usize, activations: Vec<Activation>) -> UserReadResult {
        let device = &self.devices[index].device;
        let triggered = dispatch(
            &self.user,
            device,
            &self.scheme,
            &activations,
            &self.notifications,
        );
        UserReadResult {
            user: self.user.clone(),
            device: Some(device.clone()),
            activations,
            triggered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActiveInputScheme;
    use crate::controller::ControllerConfig;
    use crate::device::{RawActivation, ScriptedReader};
    use crate::input::{DeviceFamily, Input, InputKind, Phase};

    struct Rig {
        aggregator: UserAggregator,
        hub: Arc<NotificationHub>,
    }

    fn rig() -> Rig {
        let hub = Arc::new(NotificationHub::new());
        let scheme = Arc::new(ResolvedScheme::empty(ActiveInputScheme::new("test", "none")));
        let aggregator = UserAggregator::new(
            UserId::new("p1"),
            scheme,
            ControllerReadOrchestrator::new(Duration::from_millis(50)),
            Arc::new(pad_catalog()),
            StateOptions::default(),
            Arc::clone(&hub),
        );
        Rig { aggregator, hub }
    }

    fn pad_catalog() -> InputCatalog {
        let mut catalog = InputCatalog::new();
        for id in ["south", "east"] {
            catalog.insert(Input::new(id, DeviceFamily::Gamepad, InputKind::Digital));
        }
        catalog
    }

    fn device(name: &str, family: DeviceFamily) -> (Arc<ScriptedReader>, Controller) {
        let reader = Arc::new(ScriptedReader::new(name));
        let controller =
            Controller::new(ControllerConfig::new(name, family)).with_receiver(reader.clone());
        (reader, controller)
    }

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    #[test]
    fn pairing_is_idempotent() {
        let mut rig = rig();
        let (_, pad) = device("pad", DeviceFamily::Gamepad);
        assert!(rig.aggregator.add_device(DeviceId::new("pad-0"), pad.clone()));
        assert!(!rig.aggregator.add_device(DeviceId::new("pad-0"), pad));
        assert_eq!(rig.aggregator.device_count(), 1);
    }

    #[tokio::test]
    async fn silent_active_device_hands_over_to_next() {
        let mut rig = rig();
        let mut sub = rig.hub.subscribe();
        let (a, pad_a) = device("pad-a", DeviceFamily::Gamepad);
        let (b, pad_b) = device("pad-b", DeviceFamily::Gamepad);
        rig.aggregator.add_device(DeviceId::new("a"), pad_a);
        rig.aggregator.add_device(DeviceId::new("b"), pad_b);
        let cancel = CancellationToken::new();

        a.push_frame(vec![RawActivation::pressed("south")]);
        let first = rig.aggregator.read_cycle(1, ms(0), &cancel).await;
        assert_eq!(first.device, Some(DeviceId::new("a")));
        assert_eq!(b.invocations(), 0);

        // a releases (End is still a report), then goes quiet while b is pressed
        a.push_idle(2);
        b.push_idle(1);
        b.push_frame(vec![RawActivation::pressed("east")]);
        let release = rig.aggregator.read_cycle(2, ms(16), &cancel).await;
        assert_eq!(release.activations[0].phase, Phase::End);
        assert_eq!(rig.aggregator.active_device(), Some(&DeviceId::new("a")));

        let _ = rig.aggregator.read_cycle(3, ms(32), &cancel).await;
        let switched = rig.aggregator.read_cycle(4, ms(48), &cancel).await;
        assert_eq!(switched.device, Some(DeviceId::new("b")));
        assert_eq!(rig.aggregator.active_device(), Some(&DeviceId::new("b")));

        let mut changes = Vec::new();
        while let Ok(notification) = sub.receiver.try_recv() {
            if let Notification::ActiveControllerChanged { device, controller, .. } = notification {
                changes.push((device, controller.name));
            }
        }
        assert_eq!(
            changes,
            vec![
                (DeviceId::new("a"), "pad-a".to_string()),
                (DeviceId::new("b"), "pad-b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn removing_the_active_device_clears_it() {
        let mut rig = rig();
        let (a, pad_a) = device("pad-a", DeviceFamily::Gamepad);
        rig.aggregator.add_device(DeviceId::new("a"), pad_a);
        a.push_frame(vec![RawActivation::pressed("south")]);
        rig.aggregator
            .read_cycle(1, ms(0), &CancellationToken::new())
            .await;
        assert!(rig.aggregator.active_device().is_some());

        assert!(rig.aggregator.remove_device(&DeviceId::new("a")).is_some());
        assert!(rig.aggregator.active_device().is_none());
        assert!(rig.aggregator.remove_device(&DeviceId::new("a")).is_none());
    }

    #[tokio::test]
    async fn failing_receiver_is_published_as_fault() {
        let mut rig = rig();
        let mut sub = rig.hub.subscribe();
        let (a, pad_a) = device("pad-a", DeviceFamily::Gamepad);
        rig.aggregator.add_device(DeviceId::new("a"), pad_a);
        a.push_failure("unplugged");

        let result = rig
            .aggregator
            .read_cycle(1, ms(0), &CancellationToken::new())
            .await;
        assert!(result.is_empty());
        assert!(matches!(
            sub.receiver.try_recv().unwrap(),
            Notification::ReaderFault { receiver, .. } if receiver == "pad-a"
        ));
    }
}
