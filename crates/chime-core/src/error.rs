//! Error types for chime.

use crate::types::SoundKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using chime's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chime.
#[derive(Error, Debug)]
pub enum Error {
    // Capability errors
    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Audio output requires user interaction before it can start")]
    PermissionPending,

    // Loading errors
    #[error("Transient load failure: {0}")]
    TransientLoad(String),

    #[error("Sound {0} has not been preloaded")]
    NotLoaded(SoundKey),

    #[error("Memory budget exceeded for {key}: {needed} bytes needed, {remaining} remaining")]
    MemoryBudget {
        key: SoundKey,
        needed: u64,
        remaining: u64,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    // Playback errors
    #[error("All instances of {0} are busy")]
    InstanceExhausted(SoundKey),

    #[error("Audio decode error: {0}")]
    AudioDecode(String),

    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Strategy {0} has been disposed")]
    Disposed(&'static str),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Generic errors
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used to decide how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Capability absent. Never retried.
    Unsupported,
    /// Output blocked until a user gesture. Retried once.
    PermissionPending,
    /// Network or decode hiccup while loading. Retried with backoff.
    TransientLoadFailure,
    /// No free playback slot. Reported only.
    InstanceExhausted,
    /// Anything else.
    Unknown,
}

impl Error {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::PermissionPending => ErrorKind::PermissionPending,
            Self::TransientLoad(_) | Self::Network(_) | Self::Timeout(_) | Self::AudioDecode(_) => {
                ErrorKind::TransientLoadFailure
            }
            Self::InstanceExhausted(_) => ErrorKind::InstanceExhausted,
            _ => ErrorKind::Unknown,
        }
    }

    /// Returns true if a preload attempt failing with this error may be retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientLoadFailure) || matches!(self, Self::Io(_))
    }

    /// Returns true if a playback failure should make the orchestrator fall
    /// back to the next strategy. A sound that was never loaded is the
    /// caller's problem, not the backend's.
    pub const fn degrades_strategy(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::PermissionPending | ErrorKind::InstanceExhausted
        ) && !matches!(self, Self::NotLoaded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(
            Error::Unsupported("no device".into()).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(Error::Timeout(500).kind(), ErrorKind::TransientLoadFailure);
        assert_eq!(
            Error::InstanceExhausted(SoundKey::LineClear).kind(),
            ErrorKind::InstanceExhausted
        );
        assert_eq!(
            Error::NotLoaded(SoundKey::HardDrop).kind(),
            ErrorKind::Unknown
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::AudioDecode("truncated".into()).is_retryable());
        assert!(!Error::Unsupported("test".into()).is_retryable());
        assert!(!Error::InvalidArgument("test".into()).is_retryable());
    }

    #[test]
    fn test_degrades_strategy() {
        assert!(Error::AudioOutput("device lost".into()).degrades_strategy());
        assert!(!Error::NotLoaded(SoundKey::Tetris).degrades_strategy());
        assert!(!Error::PermissionPending.degrades_strategy());
        assert!(!Error::InstanceExhausted(SoundKey::PieceMove).degrades_strategy());
    }

    #[test]
    fn test_error_display() {
        let err = Error::NotLoaded(SoundKey::LineClear);
        assert_eq!(err.to_string(), "Sound lineClear has not been preloaded");
    }
}
