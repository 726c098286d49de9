//! The closed set of playable sound effects.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Identifier of a short effect sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SoundKey {
    PieceMove,
    PieceRotate,
    PieceLand,
    HardDrop,
    LineClear,
    Tetris,
    LevelUp,
    GameOver,
}

impl SoundKey {
    /// Every key, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::PieceMove,
        Self::PieceRotate,
        Self::PieceLand,
        Self::HardDrop,
        Self::LineClear,
        Self::Tetris,
        Self::LevelUp,
        Self::GameOver,
    ];

    /// Stable name used in manifests and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PieceMove => "pieceMove",
            Self::PieceRotate => "pieceRotate",
            Self::PieceLand => "pieceLand",
            Self::HardDrop => "hardDrop",
            Self::LineClear => "lineClear",
            Self::Tetris => "tetris",
            Self::LevelUp => "levelUp",
            Self::GameOver => "gameOver",
        }
    }

    /// How often the sound fires during gameplay. Higher loads first.
    pub const fn gameplay_frequency(self) -> u8 {
        match self {
            Self::PieceMove => 100,
            Self::PieceRotate => 90,
            Self::PieceLand => 80,
            Self::HardDrop => 70,
            Self::LineClear => 60,
            Self::Tetris => 40,
            Self::LevelUp => 20,
            Self::GameOver => 10,
        }
    }

    /// All keys sorted by descending gameplay frequency.
    pub fn by_priority() -> Vec<Self> {
        let mut keys = Self::ALL.to_vec();
        keys.sort_by(|a, b| b.gameplay_frequency().cmp(&a.gameplay_frequency()));
        keys
    }

    /// Human readable label for visual feedback.
    pub const fn label(self) -> &'static str {
        match self {
            Self::PieceMove => "Move",
            Self::PieceRotate => "Rotate",
            Self::PieceLand => "Land",
            Self::HardDrop => "Hard drop",
            Self::LineClear => "Line clear",
            Self::Tetris => "Tetris!",
            Self::LevelUp => "Level up",
            Self::GameOver => "Game over",
        }
    }
}

impl fmt::Display for SoundKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoundKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown sound key: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let keys = SoundKey::by_priority();
        assert_eq!(keys.len(), SoundKey::ALL.len());
        assert_eq!(keys[0], SoundKey::PieceMove);
        assert_eq!(keys[keys.len() - 1], SoundKey::GameOver);
    }

    #[test]
    fn test_parse_key() {
        assert_eq!("lineClear".parse::<SoundKey>().unwrap(), SoundKey::LineClear);
        assert_eq!("HARDDROP".parse::<SoundKey>().unwrap(), SoundKey::HardDrop);
        assert!("explosion".parse::<SoundKey>().is_err());
    }

    #[test]
    fn test_serde_name_matches_display() {
        let json = serde_json::to_string(&SoundKey::GameOver).unwrap();
        assert_eq!(json, "\"gameOver\"");
        assert_eq!(SoundKey::GameOver.to_string(), "gameOver");
    }
}
