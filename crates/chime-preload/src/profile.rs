//! Preload profile parameters.

use std::time::Duration;

use chime_core::PreloadProfile;

/// Assumed size of an asset whose manifest entry has no size hint.
pub const DEFAULT_SIZE_ESTIMATE: u64 = 256 * 1024;

const MIB: u64 = 1024 * 1024;

/// Concrete limits selected by a [`PreloadProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSettings {
    /// Per-attempt fetch timeout.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub memory_budget: u64,
    /// Start offset between consecutive keys.
    pub stagger: Duration,
}

impl ProfileSettings {
    pub const fn for_profile(profile: PreloadProfile) -> Self {
        match profile {
            PreloadProfile::Aggressive => Self {
                timeout: Duration::from_secs(15),
                max_retries: 3,
                memory_budget: 64 * MIB,
                stagger: Duration::from_millis(25),
            },
            PreloadProfile::Normal => Self {
                timeout: Duration::from_secs(10),
                max_retries: 2,
                memory_budget: 32 * MIB,
                stagger: Duration::from_millis(75),
            },
            PreloadProfile::Conservative => Self {
                timeout: Duration::from_secs(6),
                max_retries: 1,
                memory_budget: 8 * MIB,
                stagger: Duration::from_millis(200),
            },
        }
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt` (1-based): `2^(attempt-1)` seconds.
    pub fn backoff(attempt: u32) -> Duration {
        Duration::from_secs(1u64 << attempt.saturating_sub(1).min(16))
    }
}

impl From<PreloadProfile> for ProfileSettings {
    fn from(profile: PreloadProfile) -> Self {
        Self::for_profile(profile)
    }
}
