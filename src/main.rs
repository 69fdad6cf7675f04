use color_eyre::{eyre::eyre, Result};
use openinput::action::{ActionRegistry, ActiveInputScheme};
use openinput::controller::{Controller, ControllerConfig};
use openinput::device::{DeviceId, RawActivation, ScriptedReader};
use openinput::input::{Axis, DeviceFamily, Phase};
use openinput::notify::Notification;
use openinput::{InputConfig, InputSystem, UserId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const CYCLE_INTERVAL_MS: u64 = 16;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(InputConfig::default_path);
    info!("Loading input configuration from {}", path.display());
    let config = InputConfig::load(&path).await?;

    let registry = demo_actions()?;
    let system = Arc::new(
        InputSystem::from_config(&config, &registry)
            .map_err(|e| eyre!("Failed to build input system: {}", e))?,
    );

    let mut subscription = system.subscribe();
    let _notification_handle = tokio::spawn(async move {
        while let Some(notification) = subscription.receiver.recv().await {
            match notification {
                Notification::ActiveControllerChanged {
                    user,
                    controller,
                    at,
                    ..
                } => info!(
                    "{} now plays on {} ({}) since {}",
                    user,
                    controller.name,
                    controller.family,
                    at.format("%H:%M:%S.%3f")
                ),
                other => debug!("Notification: {:?}", other),
            }
        }
    });

    let player = UserId::new("player-1");
    system
        .join_user(player.clone(), ActiveInputScheme::new("platformer", "default"))
        .map_err(|e| eyre!("Failed to join {}: {}", player, e))?;

    let keyboard = Arc::new(ScriptedReader::new("keyboard"));
    let gamepad = Arc::new(ScriptedReader::new("gamepad"));
    script_session(&keyboard, &gamepad);

    system
        .device_connected(
            &player,
            DeviceId::new("kbd-0"),
            Controller::new(ControllerConfig::new("Keyboard", DeviceFamily::Keyboard))
                .with_receiver(keyboard.clone()),
        )
        .await?;
    system
        .device_connected(
            &player,
            DeviceId::new("pad-0"),
            Controller::new(ControllerConfig::new("Gamepad", DeviceFamily::Gamepad))
                .with_receiver(gamepad.clone()),
        )
        .await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping read loop");
            ctrl_c.cancel();
        }
    });

    info!("Entering read loop ({} ms interval)", CYCLE_INTERVAL_MS);
    let mut interval = tokio::time::interval(Duration::from_millis(CYCLE_INTERVAL_MS));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let report = system.read(&cancel).await;
        for event in report.triggered() {
            debug!(
                "Cycle {}: {} -> {}",
                report.cycle, event.activation.input, event.map.action
            );
        }

        if keyboard.remaining() == 0 && gamepad.remaining() == 0 && report.is_empty() {
            info!("Script finished after {} cycles", report.cycle);
            break;
        }
    }

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

fn demo_actions() -> Result<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    registry.register("jump", "Jump", [Phase::Start], |ctx| {
        if ctx.tap_count() > 1 {
            info!("{} double jumps (tap {})", ctx.user, ctx.tap_count());
        } else {
            info!("{} jumps", ctx.user);
        }
        Ok(())
    })?;
    registry.register("quick_save", "Quick save", [Phase::Start], |ctx| {
        info!("{} saved the game", ctx.user);
        Ok(())
    })?;
    registry.register("move", "Move", [Phase::Active], |ctx| {
        let x = ctx.power(Axis::X).unwrap_or_default();
        let y = ctx.power(Axis::Y).unwrap_or_default();
        debug!("{} moves ({:.2}, {:.2})", ctx.user, x, y);
        Ok(())
    })?;
    registry.register("aim", "Aim", [Phase::Start, Phase::Active], |ctx| {
        match ctx.motion() {
            Some(motion) => debug!(
                "{} aims at ({:.1}, {:.1})",
                ctx.user, motion.position.x, motion.position.y
            ),
            None => warn!("Aim without pointer data from {}", ctx.device),
        }
        Ok(())
    })?;
    Ok(registry)
}

/// A short session: keyboard play, a double tap, then a hand-off to the gamepad
fn script_session(keyboard: &ScriptedReader, gamepad: &ScriptedReader) {
    keyboard
        .hold(vec![RawActivation::pressed("space")], 3)
        .push_idle(2)
        .hold(vec![RawActivation::pressed("space")], 2)
        .push_idle(3)
        .hold(
            vec![RawActivation::pressed("ctrl"), RawActivation::pressed("s")],
            2,
        )
        .push_idle(30);

    gamepad
        .push_idle(40)
        .hold(
            vec![RawActivation::power("left_stick", [(Axis::X, 0.7), (Axis::Y, 0.1)])],
            20,
        )
        .hold(vec![RawActivation::pressed("south")], 2);
}
