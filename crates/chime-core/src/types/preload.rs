//! Preload bookkeeping.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Load state of a single sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreloadState {
    #[default]
    Pending,
    Loading,
    Loaded,
    Failed,
}

impl PreloadState {
    /// Loaded and Failed only leave via an explicit reset.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Loaded | Self::Failed)
    }
}

/// Preload aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreloadProfile {
    Aggressive,
    #[default]
    Normal,
    Conservative,
}

/// Explicit per-key retry record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreloadRecord {
    pub state: PreloadState,
    /// Load attempts started so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Earliest time the next retry may start, on the runtime clock. Set
    /// only while the key waits out a backoff in `Pending`.
    pub next_eligible_at: Option<Instant>,
    /// Size of the fetched asset once loaded.
    pub bytes: u64,
}

/// Aggregate preload progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PreloadProgress {
    pub total: usize,
    pub loaded: usize,
    pub failed: usize,
    pub in_progress: usize,
    /// `loaded / total`, 0.0 when nothing is tracked.
    pub progress: f32,
}

impl PreloadProgress {
    pub fn from_states<I: IntoIterator<Item = PreloadState>>(states: I) -> Self {
        let mut out = Self::default();
        for state in states {
            out.total += 1;
            match state {
                PreloadState::Loaded => out.loaded += 1,
                PreloadState::Failed => out.failed += 1,
                PreloadState::Loading => out.in_progress += 1,
                PreloadState::Pending => {}
            }
        }
        if out.total > 0 {
            out.progress = out.loaded as f32 / out.total as f32;
        }
        out
    }

    /// Every tracked key reached a terminal state.
    pub const fn is_complete(&self) -> bool {
        self.loaded + self.failed == self.total
    }
}
