//! Visual stand-ins for sounds that cannot be played.

use std::time::{Duration, Instant};

use super::SoundKey;

/// On-screen indicator for one play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indicator {
    pub key: SoundKey,
    pub label: &'static str,
    pub shown_at: Instant,
    pub expires_at: Instant,
}

impl Indicator {
    pub fn new(key: SoundKey, shown_at: Instant, lifetime: Duration) -> Self {
        Self {
            key,
            label: key.label(),
            shown_at,
            expires_at: shown_at + lifetime,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left on screen at `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_lifetime() {
        let now = Instant::now();
        let indicator = Indicator::new(SoundKey::Tetris, now, Duration::from_millis(600));
        assert_eq!(indicator.label, SoundKey::Tetris.label());
        assert!(!indicator.is_expired(now));
        assert_eq!(indicator.remaining(now), Duration::from_millis(600));
        assert!(indicator.is_expired(now + Duration::from_millis(600)));
        assert_eq!(indicator.remaining(now + Duration::from_secs(1)), Duration::ZERO);
    }
}
