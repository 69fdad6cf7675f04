//! Activation to action dispatch

use super::registry::ActionError;
use super::scheme::{ActiveInputScheme, InputActionMap, ResolvedBinding, ResolvedScheme};
use crate::device::{Activation, DeviceId};
use crate::executor::panic_message;
use crate::input::{Axis, InputId, Phase, PointerMotion};
use crate::notify::{Notification, NotificationHub};
use crate::user::UserId;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};

/// Everything an action handler gets to see about the activation that fired it
#[derive(Clone, Copy, Debug)]
pub struct ActivationContext<'a> {
    pub user: &'a UserId,
    pub device: &'a DeviceId,
    pub scheme: &'a ActiveInputScheme,
    pub map: &'a InputActionMap,
    pub activation: &'a Activation,
}

impl ActivationContext<'_> {
    pub fn input(&self) -> &InputId {
        &self.activation.input
    }

    pub fn phase(&self) -> Phase {
        self.activation.phase
    }

    pub fn tap_count(&self) -> u32 {
        self.activation.tap_count
    }

    pub fn motion(&self) -> Option<&PointerMotion> {
        self.activation.motion()
    }

    pub fn power(&self, axis: Axis) -> Option<f32> {
        self.activation.power(axis)
    }
}

/// One resolved action invocation
#[derive(Clone, Debug, PartialEq)]
pub struct TriggeredActionEvent {
    pub user: UserId,
    pub device: DeviceId,
    pub scheme: ActiveInputScheme,
    pub map: InputActionMap,
    pub activation: Activation,
    /// Handler failure message, if the handler returned an error
    pub error: Option<String>,
}

/// Looks up the binding for an activation; `None` means the input is unmapped
pub fn resolve<'s>(scheme: &'s ResolvedScheme, activation: &Activation) -> Option<&'s ResolvedBinding> {
    scheme.lookup(activation.family, &activation.input, activation.phase)
}

/// Invokes the bound action of every activation that has one
///
/// Unmapped activations are skipped silently. A handler error or panic is
/// logged and published; it never stops the remaining activations from being
/// dispatched.
pub fn dispatch(
    user: &UserId,
    device: &DeviceId,
    scheme: &ResolvedScheme,
    activations: &[Activation],
    notifications: &NotificationHub,
) -> Vec<TriggeredActionEvent> {
    let mut triggered = Vec::new();

    for activation in activations {
        let Some(binding) = resolve(scheme, activation) else {
            continue;
        };
        let context = ActivationContext {
            user,
            device,
            scheme: scheme.id(),
            map: &binding.map,
            activation,
        };
        debug!(
            "{} {} on {} triggers {}",
            activation.input, activation.phase, device, binding.map.action
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| (binding.handler)(&context)))
            .unwrap_or_else(|payload| {
                Err(ActionError::new(format!(
                    "panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        let error = match outcome {
            Ok(()) => None,
            Err(e) => {
                warn!("Action {} failed for {}: {}", binding.map.action, user, e);
                notifications.publish(Notification::ActionFailed {
                    user: user.clone(),
                    action: binding.map.action.clone(),
                    input: activation.input.clone(),
                    phase: activation.phase,
                    message: e.to_string(),
                });
                Some(e.to_string())
            }
        };

        triggered.push(TriggeredActionEvent {
            user: user.clone(),
            device: device.clone(),
            scheme: scheme.id().clone(),
            map: binding.map.clone(),
            activation: activation.clone(),
            error,
        });
    }
    triggered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionError, ActionRegistry, DefinitionConfig, SchemeBook, SchemeConfig};
    use crate::device::ActivationPayload;
    use crate::input::{DeviceFamily, Input, InputCatalog, InputKind, PowerMap};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn activation(input: &str, phase: Phase, tap_count: u32) -> Activation {
        Activation {
            input: InputId::from(input),
            family: DeviceFamily::Keyboard,
            phase,
            duration: Duration::ZERO,
            phase_duration: Duration::ZERO,
            tap_count,
            payload: ActivationPayload::Power(PowerMap::from([(Axis::X, 1.0)])),
        }
    }

    fn scheme(registry: &ActionRegistry) -> Arc<ResolvedScheme> {
        let mut catalog = InputCatalog::new();
        for id in ["space", "e", "q"] {
            catalog.insert(Input::new(id, DeviceFamily::Keyboard, InputKind::Digital));
        }
        let maps = [("space", "jump"), ("e", "use")]
            .into_iter()
            .map(|(input, action)| InputActionMap {
                input: InputId::from(input),
                family: DeviceFamily::Keyboard,
                action: action.into(),
                phases: None,
            })
            .collect();
        let definitions = vec![DefinitionConfig {
            name: "game".into(),
            schemes: vec![SchemeConfig {
                name: "default".into(),
                maps,
            }],
        }];
        let mut issues = Vec::new();
        let book = SchemeBook::build(&definitions, &catalog, registry, &mut issues);
        assert!(issues.is_empty(), "{issues:?}");
        book.get(&ActiveInputScheme::new("game", "default")).unwrap()
    }

    #[test]
    fn matching_phase_invokes_handler_with_context() {
        let taps = Arc::new(AtomicU32::new(0));
        let mut registry = ActionRegistry::new();
        let seen = Arc::clone(&taps);
        registry
            .register("jump", "Jump", [Phase::Start], move |ctx| {
                seen.store(ctx.tap_count(), Ordering::SeqCst);
                assert_eq!(ctx.user.as_str(), "p1");
                Ok(())
            })
            .unwrap();
        registry
            .register("use", "Use", [Phase::End], |_| Ok(()))
            .unwrap();
        let scheme = scheme(&registry);
        let hub = NotificationHub::new();

        let triggered = dispatch(
            &UserId::new("p1"),
            &DeviceId::new("kbd-0"),
            &scheme,
            &[
                activation("space", Phase::Start, 2),
                activation("e", Phase::Start, 1),
                activation("q", Phase::Start, 1),
            ],
            &hub,
        );

        assert_eq!(triggered.len(), 1);
        assert_eq!(triggered[0].map.action, "jump");
        assert_eq!(taps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_handler_is_published_and_does_not_stop_dispatch() {
        let mut registry = ActionRegistry::new();
        registry
            .register("jump", "Jump", [Phase::Start], |_| Err(ActionError::new("stuck")))
            .unwrap();
        registry
            .register("use", "Use", [Phase::Start], |_| Ok(()))
            .unwrap();
        let scheme = scheme(&registry);
        let hub = NotificationHub::new();
        let mut sub = hub.subscribe();

        let triggered = dispatch(
            &UserId::new("p1"),
            &DeviceId::new("kbd-0"),
            &scheme,
            &[activation("space", Phase::Start, 1), activation("e", Phase::Start, 1)],
            &hub,
        );

        assert_eq!(triggered.len(), 2);
        assert_eq!(triggered[0].error.as_deref(), Some("stuck"));
        assert!(triggered[1].error.is_none());
        assert!(matches!(
            sub.receiver.try_recv().unwrap(),
            Notification::ActionFailed { action, .. } if action == "jump"
        ));
    }

    #[test]
    fn panicking_handler_is_recorded_as_failure() {
        let mut registry = ActionRegistry::new();
        registry
            .register("jump", "Jump", [Phase::Start], |_| panic!("handler bug"))
            .unwrap();
        registry
            .register("use", "Use", [Phase::Start], |_| Ok(()))
            .unwrap();
        let scheme = scheme(&registry);
        let hub = NotificationHub::new();

        let triggered = dispatch(
            &UserId::new("p1"),
            &DeviceId::new("kbd-0"),
            &scheme,
            &[activation("space", Phase::Start, 1), activation("e", Phase::Start, 1)],
            &hub,
        );

        assert_eq!(triggered.len(), 2);
        assert_eq!(triggered[0].error.as_deref(), Some("panicked: handler bug"));
        assert!(triggered[1].error.is_none());
    }
}
