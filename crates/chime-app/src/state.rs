//! Snapshots handed to the game.

use chime_core::{ErrorKind, SoundKey};
use serde::Serialize;

/// What happened to a play request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum PlayOutcome {
    Played { id: u64, strategy: &'static str },
    /// Swallowed failure. Details went to the event channel.
    Dropped { kind: ErrorKind },
}

impl PlayOutcome {
    pub const fn is_played(&self) -> bool {
        matches!(self, Self::Played { .. })
    }
}

/// Diagnostics view combining the active strategy and the volume controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedAudioState {
    pub initialized: bool,
    pub suspended: bool,
    pub loaded_sounds: Vec<SoundKey>,
    pub active_sounds: usize,
    pub master_volume: f32,
    pub is_muted: bool,
}
