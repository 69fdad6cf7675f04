use openinput::action::{ActionRegistry, ActiveInputScheme};
use openinput::controller::{Controller, ControllerConfig};
use openinput::device::{DeviceId, RawActivation, ScriptedReader};
use openinput::input::{DeviceFamily, Phase};
use openinput::notify::{Notification, Subscription};
use openinput::{InputConfig, InputSystem, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn system() -> InputSystem {
    let mut registry = ActionRegistry::new();
    for name in ["jump", "quick_save", "move", "aim"] {
        registry
            .register(name, name, [Phase::Start], |_| Ok(()))
            .unwrap();
    }
    InputSystem::from_config(&InputConfig::default_config(), &registry).unwrap()
}

struct Player {
    user: UserId,
    a: Arc<ScriptedReader>,
    b: Arc<ScriptedReader>,
}

async fn player_with_two_pads(system: &InputSystem) -> Player {
    let user = UserId::new("p1");
    system
        .join_user(user.clone(), ActiveInputScheme::new("platformer", "default"))
        .unwrap();
    let a = Arc::new(ScriptedReader::new("pad-a"));
    let b = Arc::new(ScriptedReader::new("pad-b"));
    for (id, name, reader) in [("a", "Pad A", &a), ("b", "Pad B", &b)] {
        let controller = Controller::new(ControllerConfig::new(name, DeviceFamily::Gamepad))
            .with_receiver(reader.clone());
        system
            .pair_device(&user, DeviceId::new(id), controller)
            .await
            .unwrap();
    }
    Player { user, a, b }
}

fn controller_changes(subscription: &mut Subscription) -> Vec<(DeviceId, String)> {
    let mut changes = Vec::new();
    while let Ok(notification) = subscription.receiver.try_recv() {
        if let Notification::ActiveControllerChanged {
            device, controller, ..
        } = notification
        {
            changes.push((device, controller.name));
        }
    }
    changes
}

async fn tick(system: &InputSystem) -> openinput::ReadReport {
    tokio::time::advance(Duration::from_millis(16)).await;
    system.read(&CancellationToken::new()).await
}

#[tokio::test(start_paused = true)]
async fn silent_active_device_hands_over_with_one_event() {
    let system = system();
    let player = player_with_two_pads(&system).await;
    let mut sub = system.subscribe();

    player.a.push_frame(vec![RawActivation::pressed("south")]);
    player.a.push_idle(2);
    tick(&system).await;
    let release = tick(&system).await;
    assert_eq!(release.activations().next().map(|a| a.phase), Some(Phase::End));
    assert_eq!(controller_changes(&mut sub).len(), 1);

    // A has nothing this cycle, B reports
    player.b.push_frame(vec![RawActivation::pressed("south")]);
    player.b.push_frame(vec![RawActivation::pressed("south")]);
    let handover = tick(&system).await;
    let user = handover.for_user(&player.user).unwrap();
    assert_eq!(user.device, Some(DeviceId::new("b")));
    assert_eq!(user.activations.len(), 1);

    tick(&system).await;
    assert_eq!(
        system.active_device(&player.user).await.unwrap(),
        Some(DeviceId::new("b"))
    );
    assert_eq!(
        controller_changes(&mut sub),
        vec![(DeviceId::new("b"), "Pad B".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn steadily_active_device_fires_no_further_events() {
    let system = system();
    let player = player_with_two_pads(&system).await;
    let mut sub = system.subscribe();

    player.a.hold(vec![RawActivation::pressed("south")], 10);
    player.b.hold(vec![RawActivation::pressed("south")], 10);
    for _ in 0..10 {
        let report = tick(&system).await;
        assert_eq!(
            report.for_user(&player.user).unwrap().device,
            Some(DeviceId::new("a"))
        );
    }

    assert_eq!(controller_changes(&mut sub).len(), 1);
    // B was never needed
    assert_eq!(player.b.invocations(), 0);
}

#[tokio::test(start_paused = true)]
async fn simultaneous_activation_goes_to_first_registered() {
    let system = system();
    let player = player_with_two_pads(&system).await;

    player.a.push_frame(vec![RawActivation::pressed("south")]);
    player.b.push_frame(vec![RawActivation::pressed("south")]);
    let report = tick(&system).await;

    assert_eq!(
        report.for_user(&player.user).unwrap().device,
        Some(DeviceId::new("a"))
    );
    assert_eq!(player.b.invocations(), 0);
}

#[tokio::test(start_paused = true)]
async fn device_missing_its_deadline_counts_as_silent() {
    let system = system();
    let user = UserId::new("p1");
    system
        .join_user(user.clone(), ActiveInputScheme::new("platformer", "default"))
        .unwrap();
    let slow = Arc::new(ScriptedReader::new("slow").with_latency(Duration::from_millis(500)));
    slow.hold(vec![RawActivation::pressed("south")], 3);
    let fast = Arc::new(ScriptedReader::new("fast"));
    fast.push_frame(vec![RawActivation::pressed("south")]);

    for (id, reader) in [("slow", &slow), ("fast", &fast)] {
        let controller = Controller::new(ControllerConfig::new(id, DeviceFamily::Gamepad))
            .with_receiver(reader.clone());
        system
            .pair_device(&user, DeviceId::new(id), controller)
            .await
            .unwrap();
    }

    let report = tick(&system).await;
    assert_eq!(
        report.for_user(&user).unwrap().device,
        Some(DeviceId::new("fast"))
    );
    assert_eq!(slow.invocations(), 1);
}

#[tokio::test]
async fn pairing_the_same_device_twice_keeps_one() {
    let system = system();
    let player = player_with_two_pads(&system).await;
    let again = Controller::new(ControllerConfig::new("Pad A", DeviceFamily::Gamepad))
        .with_receiver(player.a.clone());

    let added = system
        .pair_device(&player.user, DeviceId::new("a"), again)
        .await
        .unwrap();
    assert!(!added);
    assert_eq!(system.paired_devices(&player.user).await.unwrap().len(), 2);
}
