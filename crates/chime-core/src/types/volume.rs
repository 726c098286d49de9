//! Master volume state.

use serde::{Deserialize, Serialize};

/// Master volume and mute flag.
///
/// `previous_volume` holds the level captured when muting so that unmuting
/// restores it exactly. It only changes while unmuted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeState {
    pub master_volume: f32,
    pub is_muted: bool,
    pub previous_volume: f32,
}

impl Default for VolumeState {
    fn default() -> Self {
        Self {
            master_volume: 1.0,
            is_muted: false,
            previous_volume: 1.0,
        }
    }
}

impl VolumeState {
    /// Level the backend should actually output.
    pub fn effective_volume(&self) -> f32 {
        if self.is_muted {
            0.0
        } else {
            self.master_volume
        }
    }
}
