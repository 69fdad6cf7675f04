//! Notification hub
//!
//! Subscribers register for the lifetime of their [`Subscription`] id and
//! receive every notification through an unbounded channel. Publishing is
//! synchronous: by the time `publish` returns, the notification sits in every
//! subscriber's queue, in publish order.

use crate::controller::ControllerConfig;
use crate::device::DeviceId;
use crate::input::{InputId, Phase};
use crate::user::UserId;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    ActiveControllerChanged {
        user: UserId,
        previous: Option<DeviceId>,
        device: DeviceId,
        controller: ControllerConfig,
        at: DateTime<Local>,
    },
    DeviceConnected {
        user: UserId,
        device: DeviceId,
    },
    DeviceDisconnected {
        user: UserId,
        device: DeviceId,
    },
    UserJoined {
        user: UserId,
    },
    UserLeft {
        user: UserId,
    },
    SchemeChanged {
        user: UserId,
        definition: String,
        scheme: String,
    },
    ReaderFault {
        user: UserId,
        device: DeviceId,
        receiver: String,
        message: String,
    },
    ActionFailed {
        user: UserId,
        action: String,
        input: InputId,
        phase: Phase,
        message: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::UnboundedReceiver<Notification>,
}

#[derive(Debug, Default)]
pub struct NotificationHub {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, mpsc::UnboundedSender<Notification>)>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().push((id, sender));
        debug!("Subscriber {:?} registered", id);
        Subscription { id, receiver }
    }

    /// Returns false if the id was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        before != subscribers.len()
    }

    pub fn publish(&self, notification: Notification) {
        let mut subscribers = self.subscribers.lock();
        // receivers that were dropped without unsubscribing are pruned here
        subscribers.retain(|(id, sender)| {
            let delivered = sender.send(notification.clone()).is_ok();
            if !delivered {
                debug!("Dropping closed subscriber {:?}", id);
            }
            delivered
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
