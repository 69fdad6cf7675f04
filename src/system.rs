//! Top-level input system
//!
//! Owns every user, fans a read request out over them with the bounded
//! executor and collects the per-user results into a [`ReadReport`]. One
//! request runs through the [`ReadCycle`] state machine:
//!
//! ```text
//! ReadCycle<Pending> ──collect──► ReadCycle<Collected> ──finish──► ReadReport
//!                    (user fan-out)  (CycleBatch)
//! ```

use crate::action::{ActionRegistry, ActiveInputScheme, SchemeBook, TriggeredActionEvent};
use crate::config::{CompiledConfig, ConfigError, InputConfig, RuntimeOptions};
use crate::controller::{Controller, ControllerReadOrchestrator};
use crate::device::{Activation, DeviceId};
use crate::executor::{run_bounded, ExecutorOptions};
use crate::input::{InputCatalog, StateOptions};
use crate::notify::{Notification, NotificationHub, Subscription};
use crate::user::{UserAggregator, UserId, UserReadResult};
use chrono::{DateTime, Local};
use statum::{machine, state};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SystemError {
    #[error("User {0} already joined")]
    UserExists(UserId),

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Unknown scheme: {0}")]
    UnknownScheme(ActiveInputScheme),

    #[error("Device {device} is already paired to {owner}")]
    DeviceOwned { device: DeviceId, owner: UserId },
}

/// Everything one top-level read produced
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadReport {
    pub cycle: u64,
    /// One entry per user that was read, in user order when read sequentially
    pub users: Vec<UserReadResult>,
}

impl ReadReport {
    pub fn is_empty(&self) -> bool {
        self.users.iter().all(UserReadResult::is_empty)
    }

    pub fn activations(&self) -> impl Iterator<Item = &Activation> + '_ {
        self.users.iter().flat_map(|user| user.activations.iter())
    }

    pub fn triggered(&self) -> impl Iterator<Item = &TriggeredActionEvent> + '_ {
        self.users.iter().flat_map(|user| user.triggered.iter())
    }

    pub fn for_user(&self, user: &UserId) -> Option<&UserReadResult> {
        self.users.iter().find(|result| &result.user == user)
    }
}

/// Per-user results gathered during one cycle
#[derive(Debug, Clone, Default)]
pub struct CycleBatch {
    pub users: Vec<UserReadResult>,
}

#[state]
#[derive(Debug, Clone)]
pub enum CycleState {
    Pending,
    Collected(CycleBatch),
}

#[machine]
pub struct ReadCycle<S: CycleState> {
    cycle: u64,
    now: Duration,
}

impl<S: CycleState> ReadCycle<S> {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn now(&self) -> Duration {
        self.now
    }
}

impl ReadCycle<Pending> {
    pub fn begin(cycle: u64, now: Duration) -> Self {
        debug!("Beginning read cycle {} at {:?}", cycle, now);
        Self::new(cycle, now)
    }

    /// Reads every user under the executor options
    pub async fn collect(
        self,
        users: Vec<Arc<Mutex<UserAggregator>>>,
        options: ExecutorOptions,
        cancel: &CancellationToken,
    ) -> ReadCycle<Collected> {
        let cycle = self.cycle;
        let now = self.now;

        let results = run_bounded(users, options, |aggregator| {
            let cancel = cancel.clone();
            async move {
                let mut aggregator = aggregator.lock().await;
                Ok::<_, Infallible>(aggregator.read_cycle(cycle, now, &cancel).await)
            }
        })
        .await;

        let mut batch = CycleBatch::default();
        for result in results {
            match result {
                Ok(user) => batch.users.push(user),
                Err(e) => error!("User read in cycle {} did not complete: {}", cycle, e),
            }
        }
        self.transition_with(batch)
    }
}

impl ReadCycle<Collected> {
    pub fn finish(self) -> ReadReport {
        let users = match self.get_state_data() {
            Some(batch) => batch.users.clone(),
            None => Vec::new(),
        };
        ReadReport {
            cycle: self.cycle,
            users,
        }
    }
}

struct UserSlot {
    user: UserId,
    aggregator: Arc<Mutex<UserAggregator>>,
}

struct CycleStats {
    cycles: u64,
    activations: usize,
    triggered: usize,
    since: DateTime<Local>,
}

pub struct InputSystem {
    catalog: Arc<InputCatalog>,
    schemes: SchemeBook,
    state: StateOptions,
    runtime: RuntimeOptions,
    notifications: Arc<NotificationHub>,
    // registration order
    users: parking_lot::Mutex<Vec<UserSlot>>,
    owners: parking_lot::Mutex<HashMap<DeviceId, UserId>>,
    epoch: Instant,
    cycles: AtomicU64,
    stats: parking_lot::Mutex<CycleStats>,
}

impl InputSystem {
    pub fn new(compiled: CompiledConfig) -> Self {
        info!(
            "Creating input system with {} inputs and {} schemes",
            compiled.catalog.len(),
            compiled.schemes.len()
        );
        Self {
            catalog: Arc::new(compiled.catalog),
            schemes: compiled.schemes,
            state: compiled.state,
            runtime: compiled.runtime,
            notifications: Arc::new(NotificationHub::new()),
            users: parking_lot::Mutex::new(Vec::new()),
            owners: parking_lot::Mutex::new(HashMap::new()),
            epoch: Instant::now(),
            cycles: AtomicU64::new(0),
            stats: parking_lot::Mutex::new(CycleStats {
                cycles: 0,
                activations: 0,
                triggered: 0,
                since: Local::now(),
            }),
        }
    }

    pub fn from_config(config: &InputConfig, registry: &ActionRegistry) -> Result<Self, ConfigError> {
        Ok(Self::new(config.compile(registry)?))
    }

    pub fn notifications(&self) -> &Arc<NotificationHub> {
        &self.notifications
    }

    pub fn subscribe(&self) -> Subscription {
        self.notifications.subscribe()
    }

    pub fn users(&self) -> Vec<UserId> {
        self.users.lock().iter().map(|slot| slot.user.clone()).collect()
    }

    fn slot(&self, user: &UserId) -> Result<Arc<Mutex<UserAggregator>>, SystemError> {
        self.users
            .lock()
            .iter()
            .find(|slot| &slot.user == user)
            .map(|slot| Arc::clone(&slot.aggregator))
            .ok_or_else(|| SystemError::UnknownUser(user.clone()))
    }

    pub fn join_user(&self, user: UserId, scheme: ActiveInputScheme) -> Result<(), SystemError> {
        let resolved = self
            .schemes
            .get(&scheme)
            .ok_or_else(|| SystemError::UnknownScheme(scheme.clone()))?;

        let mut users = self.users.lock();
        if users.iter().any(|slot| slot.user == user) {
            return Err(SystemError::UserExists(user));
        }
        let aggregator = UserAggregator::new(
            user.clone(),
            resolved,
            ControllerReadOrchestrator::new(self.runtime.controller_read_timeout),
            Arc::clone(&self.catalog),
            self.state.clone(),
            Arc::clone(&self.notifications),
        );
        users.push(UserSlot {
            user: user.clone(),
            aggregator: Arc::new(Mutex::new(aggregator)),
        });
        drop(users);

        info!("User {} joined with scheme {}", user, scheme);
        self.notifications.publish(Notification::UserJoined { user });
        Ok(())
    }

    /// Removes a user and releases every device paired to it
    pub fn leave_user(&self, user: &UserId) -> Result<(), SystemError> {
        let mut users = self.users.lock();
        let index = users
            .iter()
            .position(|slot| &slot.user == user)
            .ok_or_else(|| SystemError::UnknownUser(user.clone()))?;
        users.remove(index);
        drop(users);

        self.owners.lock().retain(|_, owner| owner != user);
        info!("User {} left", user);
        self.notifications.publish(Notification::UserLeft { user: user.clone() });
        Ok(())
    }

    /// Swaps the user's scheme wholesale
    pub async fn set_scheme(
        &self,
        user: &UserId,
        scheme: ActiveInputScheme,
    ) -> Result<(), SystemError> {
        let resolved = self
            .schemes
            .get(&scheme)
            .ok_or_else(|| SystemError::UnknownScheme(scheme.clone()))?;
        let slot = self.slot(user)?;
        slot.lock().await.set_scheme(resolved);

        info!("User {} switched to scheme {}", user, scheme);
        self.notifications.publish(Notification::SchemeChanged {
            user: user.clone(),
            definition: scheme.definition,
            scheme: scheme.scheme,
        });
        Ok(())
    }

    /// Pairs a device to a user; `Ok(false)` if it already was
    ///
    /// A device belongs to at most one user, so it is never read by two
    /// cycles at once.
    pub async fn pair_device(
        &self,
        user: &UserId,
        device: DeviceId,
        controller: Controller,
    ) -> Result<bool, SystemError> {
        let slot = self.slot(user)?;
        {
            let mut owners = self.owners.lock();
            match owners.get(&device) {
                Some(owner) if owner != user => {
                    return Err(SystemError::DeviceOwned {
                        device,
                        owner: owner.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    owners.insert(device.clone(), user.clone());
                }
            }
        }
        let added = slot.lock().await.add_device(device, controller);
        Ok(added)
    }

    /// Unpairs a device; `Ok(false)` if it was not paired to this user
    pub async fn unpair_device(&self, user: &UserId, device: &DeviceId) -> Result<bool, SystemError> {
        let slot = self.slot(user)?;
        let removed = slot.lock().await.remove_device(device).is_some();
        if removed {
            self.owners.lock().remove(device);
        }
        Ok(removed)
    }

    /// Pairs a newly connected device and announces it
    pub async fn device_connected(
        &self,
        user: &UserId,
        device: DeviceId,
        controller: Controller,
    ) -> Result<bool, SystemError> {
        let added = self.pair_device(user, device.clone(), controller).await?;
        if added {
            self.notifications.publish(Notification::DeviceConnected {
                user: user.clone(),
                device,
            });
        }
        Ok(added)
    }

    /// Drops the pairing of a device that went away; false if nobody owned it
    pub async fn device_disconnected(&self, device: &DeviceId) -> bool {
        let owner = self.owners.lock().get(device).cloned();
        let Some(user) = owner else {
            debug!("Disconnect of unpaired device {}", device);
            return false;
        };
        match self.unpair_device(&user, device).await {
            Ok(true) => {
                info!("Device {} of {} disconnected", device, user);
                self.notifications
                    .publish(Notification::DeviceDisconnected { user, device: device.clone() });
                true
            }
            Ok(false) | Err(_) => {
                self.owners.lock().remove(device);
                false
            }
        }
    }

    pub async fn paired_devices(&self, user: &UserId) -> Result<Vec<DeviceId>, SystemError> {
        let slot = self.slot(user)?;
        let aggregator = slot.lock().await;
        Ok(aggregator.devices().map(|paired| paired.device.clone()).collect())
    }

    pub async fn active_device(&self, user: &UserId) -> Result<Option<DeviceId>, SystemError> {
        let slot = self.slot(user)?;
        let aggregator = slot.lock().await;
        Ok(aggregator.active_device().cloned())
    }

    /// Time since the system was created; the clock all device states run on
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Reads every user once
    ///
    /// A token that is already cancelled yields an empty report without
    /// touching any device. Cancellation during the read ends it early with
    /// whatever was collected; it is never an error.
    pub async fn read(&self, cancel: &CancellationToken) -> ReadReport {
        if cancel.is_cancelled() {
            debug!("Read requested after cancellation, skipping");
            return ReadReport::default();
        }
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let users: Vec<_> = self
            .users
            .lock()
            .iter()
            .map(|slot| Arc::clone(&slot.aggregator))
            .collect();

        let pending = ReadCycle::begin(cycle, self.elapsed());
        let collected = pending.collect(users, self.runtime.users, cancel).await;
        let report = collected.finish();
        self.record(&report);
        report
    }

    fn record(&self, report: &ReadReport) {
        let mut stats = self.stats.lock();
        stats.cycles += 1;
        stats.activations += report.activations().count();
        stats.triggered += report.triggered().count();

        let interval = chrono::Duration::from_std(self.runtime.stats_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let now = Local::now();
        if now - stats.since > interval {
            let elapsed_seconds = (now - stats.since).num_seconds().max(1);
            info!(
                "Input stats: {} cycles, {} activations, {} actions in {} seconds",
                stats.cycles, stats.activations, stats.triggered, elapsed_seconds
            );
            info!(
                "Average: {:.2} activations/cycle, {:.2} cycles/sec",
                stats.activations as f64 / stats.cycles as f64,
                stats.cycles as f64 / elapsed_seconds as f64
            );
            stats.cycles = 0;
            stats.activations = 0;
            stats.triggered = 0;
            stats.since = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerConfig;
    use crate::device::{RawActivation, ScriptedReader};
    use crate::input::{DeviceFamily, Phase};

    fn system() -> InputSystem {
        let mut registry = ActionRegistry::new();
        for name in ["jump", "quick_save", "move", "aim"] {
            registry
                .register(name, name, [Phase::Start], |_| Ok(()))
                .unwrap();
        }
        InputSystem::from_config(&InputConfig::default_config(), &registry).unwrap()
    }

    fn scheme() -> ActiveInputScheme {
        ActiveInputScheme::new("platformer", "default")
    }

    fn keyboard(reader: &Arc<ScriptedReader>) -> Controller {
        Controller::new(ControllerConfig::new("keyboard", DeviceFamily::Keyboard))
            .with_receiver(reader.clone())
    }

    #[tokio::test]
    async fn cancelled_read_touches_no_device() {
        let system = system();
        let user = UserId::new("p1");
        system.join_user(user.clone(), scheme()).unwrap();
        let reader = Arc::new(ScriptedReader::new("kbd"));
        reader.push_frame(vec![RawActivation::pressed("space")]);
        system
            .pair_device(&user, DeviceId::new("kbd-0"), keyboard(&reader))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = system.read(&cancel).await;
        assert!(report.users.is_empty());
        assert_eq!(reader.invocations(), 0);
    }

    #[tokio::test]
    async fn devices_are_owned_by_one_user() {
        let system = system();
        let (p1, p2) = (UserId::new("p1"), UserId::new("p2"));
        system.join_user(p1.clone(), scheme()).unwrap();
        system.join_user(p2.clone(), scheme()).unwrap();
        let reader = Arc::new(ScriptedReader::new("kbd"));

        assert_eq!(
            system.pair_device(&p1, DeviceId::new("kbd-0"), keyboard(&reader)).await,
            Ok(true)
        );
        assert_eq!(
            system.pair_device(&p1, DeviceId::new("kbd-0"), keyboard(&reader)).await,
            Ok(false)
        );
        assert_eq!(
            system.pair_device(&p2, DeviceId::new("kbd-0"), keyboard(&reader)).await,
            Err(SystemError::DeviceOwned {
                device: DeviceId::new("kbd-0"),
                owner: p1.clone(),
            })
        );

        system.leave_user(&p1).unwrap();
        assert_eq!(
            system.pair_device(&p2, DeviceId::new("kbd-0"), keyboard(&reader)).await,
            Ok(true)
        );
    }

    #[tokio::test]
    async fn unknown_users_and_schemes_are_rejected() {
        let system = system();
        let ghost = UserId::new("ghost");
        assert_eq!(
            system.join_user(ghost.clone(), ActiveInputScheme::new("platformer", "nope")),
            Err(SystemError::UnknownScheme(ActiveInputScheme::new("platformer", "nope")))
        );
        assert_eq!(
            system.paired_devices(&ghost).await,
            Err(SystemError::UnknownUser(ghost.clone()))
        );
        system.join_user(ghost.clone(), scheme()).unwrap();
        assert_eq!(
            system.join_user(ghost.clone(), scheme()),
            Err(SystemError::UserExists(ghost))
        );
    }

    #[tokio::test]
    async fn disconnect_drops_pairing_and_announces_it() {
        let system = system();
        let user = UserId::new("p1");
        system.join_user(user.clone(), scheme()).unwrap();
        let mut sub = system.subscribe();
        let reader = Arc::new(ScriptedReader::new("kbd"));
        reader.push_frame(vec![RawActivation::pressed("space")]);

        system
            .device_connected(&user, DeviceId::new("kbd-0"), keyboard(&reader))
            .await
            .unwrap();
        system.read(&CancellationToken::new()).await;
        assert_eq!(
            system.active_device(&user).await.unwrap(),
            Some(DeviceId::new("kbd-0"))
        );

        assert!(system.device_disconnected(&DeviceId::new("kbd-0")).await);
        assert!(!system.device_disconnected(&DeviceId::new("kbd-0")).await);
        assert!(system.paired_devices(&user).await.unwrap().is_empty());
        assert_eq!(system.active_device(&user).await.unwrap(), None);

        let kinds: Vec<_> = std::iter::from_fn(|| sub.receiver.try_recv().ok())
            .map(|n| match n {
                Notification::DeviceConnected { .. } => "connected",
                Notification::ActiveControllerChanged { .. } => "changed",
                Notification::DeviceDisconnected { .. } => "disconnected",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["connected", "changed", "disconnected"]);
    }
}
