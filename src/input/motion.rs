//! Pointer motion estimation from a bounded sample history
//!
//! Recomputed from scratch on every call: no running derivative is persisted,
//! so irregular sampling and evicted samples never leave stale state behind.

use super::Vec2;
use std::time::Duration;

/// One positional sample of a pointer input
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerSample {
    pub position: Vec2,
    /// Time since the input system started
    pub timestamp: Duration,
}

/// Position and derivatives at the most recent sample
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointerMotion {
    pub position: Vec2,
    pub velocity: Vec2,
    pub acceleration: Vec2,
}

/// Estimates motion at the newest sample of an oldest-first sequence
///
/// Returns `None` without samples. Pairs with zero elapsed time contribute zero
/// velocity and acceleration.
pub fn estimate_motion<'a, I>(samples: I) -> Option<PointerMotion>
where
    I: IntoIterator<Item = &'a PointerSample>,
{
    let mut samples = samples.into_iter();
    let first = samples.next()?;

    let mut previous = first;
    let mut previous_velocity = Vec2::ZERO;
    let mut motion = PointerMotion {
        position: first.position,
        ..PointerMotion::default()
    };

    for sample in samples {
        let dt = sample
            .timestamp
            .saturating_sub(previous.timestamp)
            .as_secs_f32();
        motion.position = sample.position;
        if dt > 0.0 {
            let velocity = (sample.position - previous.position) / dt;
            motion.acceleration = (velocity - previous_velocity) / dt;
            motion.velocity = velocity;
            previous_velocity = velocity;
        } else {
            motion.velocity = Vec2::ZERO;
            motion.acceleration = Vec2::ZERO;
        }
        previous = sample;
    }

    Some(motion)
}
