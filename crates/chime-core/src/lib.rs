//! # chime-core
//!
//! Core types, configuration, and error handling for the chime sound effect engine.

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::{
    AssetBase, AssetEntry, AssetLocation, ChimeConfig, SoundManifest, MAX_ELEMENT_POOL,
};
pub use error::{Error, ErrorKind, Result};
pub use events::{EngineEvent, ErrorReport, EventSink};
pub use types::*;
