//! Master volume and mute, projected onto the active strategy.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;

use chime_core::VolumeState;
use parking_lot::Mutex;
use tracing::debug;

use crate::strategy::PlaybackStrategy;

struct Inner {
    state: VolumeState,
    target: Option<Arc<dyn PlaybackStrategy>>,
}

/// Single owner of [`VolumeState`] and the only caller of a strategy's
/// volume and mute setters.
pub struct VolumeController {
    inner: Mutex<Inner>,
}

impl VolumeController {
    pub fn new(initial_volume: f32, muted: bool) -> Self {
        let volume = sanitize(initial_volume).unwrap_or(1.0);
        Self {
            inner: Mutex::new(Inner {
                state: VolumeState {
                    master_volume: volume,
                    is_muted: muted,
                    previous_volume: volume,
                },
                target: None,
            }),
        }
    }

    pub fn state(&self) -> VolumeState {
        self.inner.lock().state
    }

    pub fn effective_volume(&self) -> f32 {
        self.inner.lock().state.effective_volume()
    }

    /// Clamp to [0, 1] and store. While muted the backend stays silent and
    /// the new level is used on unmute. Non-finite input is ignored.
    pub fn set_volume(&self, volume: f32) {
        let Some(volume) = sanitize(volume) else {
            debug!("Ignoring non-finite volume {volume}");
            return;
        };

        let mut inner = self.inner.lock();
        inner.state.master_volume = volume;
        if !inner.state.is_muted {
            inner.state.previous_volume = volume;
            if let Some(target) = &inner.target {
                target.set_volume(volume);
            }
        }
    }

    /// Idempotent in both directions.
    pub fn set_muted(&self, muted: bool) {
        let mut inner = self.inner.lock();
        if inner.state.is_muted == muted {
            return;
        }

        inner.state.is_muted = muted;
        if muted {
            inner.state.previous_volume = inner.state.master_volume;
        }
        debug!(
            "{} (level {:.2})",
            if muted { "Muted" } else { "Unmuted" },
            inner.state.master_volume
        );

        if let Some(target) = &inner.target {
            project(target.as_ref(), &inner.state);
        }
    }

    /// Flip mute and return the new flag.
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.inner.lock().state.is_muted;
        self.set_muted(muted);
        muted
    }

    /// Make `strategy` the projection target and push the current state to it.
    pub fn apply_to(&self, strategy: Arc<dyn PlaybackStrategy>) {
        let mut inner = self.inner.lock();
        project(strategy.as_ref(), &inner.state);
        inner.target = Some(strategy);
    }

    /// Stop projecting. The stored state is kept.
    pub fn detach(&self) {
        self.inner.lock().target.take();
    }
}

impl Default for VolumeController {
    fn default() -> Self {
        Self::new(1.0, false)
    }
}

fn sanitize(volume: f32) -> Option<f32> {
    volume.is_finite().then(|| volume.clamp(0.0, 1.0))
}

fn project(strategy: &dyn PlaybackStrategy, state: &VolumeState) {
    if state.is_muted {
        strategy.set_volume(0.0);
        strategy.set_muted(true);
    } else {
        strategy.set_volume(state.master_volume);
        strategy.set_muted(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SilentStrategy;
    use proptest::prelude::*;

    fn attached() -> (VolumeController, Arc<SilentStrategy>) {
        let controller = VolumeController::default();
        let strategy = Arc::new(SilentStrategy::new());
        controller.apply_to(strategy.clone());
        (controller, strategy)
    }

    #[test]
    fn test_set_volume_clamps() {
        let (controller, strategy) = attached();
        controller.set_volume(1.7);
        assert!((controller.state().master_volume - 1.0).abs() < f32::EPSILON);
        controller.set_volume(-0.3);
        assert!(controller.state().master_volume.abs() < f32::EPSILON);
        assert!(strategy.state().master_volume.abs() < f32::EPSILON);

        controller.set_volume(f32::NAN);
        assert!(controller.state().master_volume.abs() < f32::EPSILON);
    }

    #[test]
    fn test_toggle_twice_restores_level() {
        let (controller, strategy) = attached();
        controller.set_volume(0.8);
        assert!(controller.toggle_mute());
        assert!(controller.effective_volume().abs() < f32::EPSILON);
        assert!(strategy.state().is_muted);
        assert!(strategy.state().master_volume.abs() < f32::EPSILON);

        assert!(!controller.toggle_mute());
        assert!((controller.effective_volume() - 0.8).abs() < f32::EPSILON);
        assert!((strategy.state().master_volume - 0.8).abs() < f32::EPSILON);
        assert!(!strategy.state().is_muted);
    }

    #[test]
    fn test_volume_while_muted_is_stored_not_projected() {
        let (controller, strategy) = attached();
        controller.set_volume(0.6);
        controller.set_muted(true);
        controller.set_volume(0.3);

        let state = controller.state();
        assert!((state.previous_volume - 0.6).abs() < f32::EPSILON);
        assert!(strategy.state().master_volume.abs() < f32::EPSILON);

        controller.set_muted(false);
        assert!((strategy.state().master_volume - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_apply_to_projects_onto_new_target() {
        let (controller, _) = attached();
        controller.set_volume(0.4);
        controller.set_muted(true);

        let next = Arc::new(SilentStrategy::new());
        controller.apply_to(next.clone());
        assert!(next.state().is_muted);

        controller.set_muted(false);
        assert!((next.state().master_volume - 0.4).abs() < f32::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_repeated_mute_keeps_pre_mute_level(
            level in 0.0f32..=1.0,
            mutes in 1usize..8,
        ) {
            let controller = VolumeController::default();
            controller.set_volume(level);
            for _ in 0..mutes {
                controller.set_muted(true);
                prop_assert!((controller.state().previous_volume - level).abs() < f32::EPSILON);
            }
            controller.set_muted(false);
            prop_assert!((controller.effective_volume() - level).abs() < f32::EPSILON);
        }

        #[test]
        fn prop_volume_always_in_range(levels in proptest::collection::vec(-10.0f32..10.0, 1..20)) {
            let controller = VolumeController::default();
            for level in levels {
                controller.set_volume(level);
                let state = controller.state();
                prop_assert!((0.0..=1.0).contains(&state.master_volume));
                prop_assert!((0.0..=1.0).contains(&state.previous_volume));
            }
        }

        #[test]
        fn prop_previous_volume_frozen_while_muted(
            before in 0.0f32..=1.0,
            during in proptest::collection::vec(0.0f32..=1.0, 0..10),
        ) {
            let controller = VolumeController::default();
            controller.set_volume(before);
            controller.set_muted(true);
            for level in during {
                controller.set_volume(level);
                prop_assert!((controller.state().previous_volume - before).abs() < f32::EPSILON);
                prop_assert!(controller.effective_volume().abs() < f32::EPSILON);
            }
        }
    }
}
