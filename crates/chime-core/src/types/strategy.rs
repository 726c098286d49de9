//! Strategy bookkeeping shared between the orchestrator and its callers.

use serde::{Deserialize, Serialize};

/// Static and runtime facts about one playback strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDescriptor {
    pub name: String,
    /// Higher is preferred. Unique within a chain.
    pub priority: u32,
    /// Backed by the capability snapshot.
    pub available: bool,
    /// Passed initialization and its self-test.
    pub verified: bool,
}

impl StrategyDescriptor {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            available: false,
            verified: false,
        }
    }
}

/// Diagnostic view of the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackStatus {
    /// Index of the active strategy in the chain (0 is the most preferred).
    pub current_level: usize,
    /// Names of the strategies whose capability requirements hold.
    pub available_levels: Vec<String>,
    /// True when the terminal silent strategy is active.
    pub silent_mode: bool,
}
