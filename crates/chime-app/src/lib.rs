//! # chime
//!
//! Sound effects for a falling-block game that keep working when audio
//! does not.

pub mod engine;
pub mod state;

pub use engine::SoundEngine;
pub use state::{DetailedAudioState, PlayOutcome};
