//! Time-boxed controller reads
//!
//! All receivers of a controller are read concurrently under one budget. A
//! missed deadline is not an error: the read reports nothing, exactly like a
//! device that had nothing to say. A failing or panicking receiver only loses
//! its own contribution.

use super::Controller;
use crate::device::{RawActivation, ReadContext};
use crate::executor::panic_message;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// A receiver that failed during a read
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiverFault {
    pub receiver: String,
    pub message: String,
}

/// Result of one controller read
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ControllerRead {
    pub activations: Vec<RawActivation>,
    pub faults: Vec<ReceiverFault>,
    /// The read budget elapsed before all receivers answered
    pub timed_out: bool,
}

impl ControllerRead {
    fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerReadOrchestrator {
    read_timeout: Duration,
}

impl ControllerReadOrchestrator {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Reads every receiver of `controller` within the controller's budget
    ///
    /// `cancel` is the caller's signal; receivers get a child of it that is also
    /// cancelled when the budget runs out. Neither cancellation nor a timeout is
    /// reported upward as an error.
    pub async fn read(
        &self,
        controller: &Controller,
        context: &ReadContext,
        cancel: &CancellationToken,
    ) -> ControllerRead {
        let budget = controller
            .config()
            .read_timeout()
            .unwrap_or(self.read_timeout);
        let token = cancel.child_token();

        let reads = controller.receivers().iter().map(|receiver| {
            let token = token.clone();
            async move {
                let outcome = AssertUnwindSafe(receiver.read(context, token))
                    .catch_unwind()
                    .await;
                (receiver.name(), outcome)
            }
        });

        let outcomes = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Read of {} cancelled by caller", controller.config().name);
                token.cancel();
                return ControllerRead::default();
            }
            outcomes = tokio::time::timeout(budget, join_all(reads)) => outcomes,
        };

        let outcomes = match outcomes {
            Ok(outcomes) => outcomes,
            Err(_) => {
                debug!(
                    "Read of {} exceeded {:?}, reporting no input",
                    controller.config().name,
                    budget
                );
                token.cancel();
                return ControllerRead::timed_out();
            }
        };

        let mut read = ControllerRead::default();
        for (receiver, outcome) in outcomes {
            let message = match outcome {
                Ok(Ok(activations)) => {
                    read.activations.extend(activations);
                    continue;
                }
                Ok(Err(e)) => {
                    warn!(
                        "Receiver {} of {} failed: {}",
                        receiver,
                        controller.config().name,
                        e
                    );
                    e.to_string()
                }
                Err(payload) => {
                    let message = format!("panicked: {}", panic_message(payload.as_ref()));
                    error!(
                        "Receiver {} of {} {}",
                        receiver,
                        controller.config().name,
                        message
                    );
                    message
                }
            };
            read.faults.push(ReceiverFault {
                receiver: receiver.to_string(),
                message,
            });
        }
        read
    }
}
