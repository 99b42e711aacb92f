//! Public types for the engine facade.

use crate::bulk::BulkState;
use crate::queue::QueueStats;
use crate::resilience::circuit_breaker::CircuitStats;

/// Engine lifecycle state.
///
/// Use [`super::OfflineEngine::state()`] to check the current state or
/// [`super::OfflineEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, not yet started
    Created,
    /// Checking schema, loading the cache index, recovering the queue
    Starting,
    /// Accepting calls
    Ready,
    /// Cancelling the active bulk run and closing the store
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Starting => write!(f, "Starting"),
            Self::Ready => write!(f, "Ready"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Snapshot of engine health for diagnostics screens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHealth {
    pub state: EngineState,
    pub ready: bool,
    /// Cache health score (0 - 100)
    pub cache_score: u8,
    pub cache_items: usize,
    pub cache_bytes: usize,
    pub queue: QueueStats,
    /// Unresolved conflicts
    pub conflicts: usize,
    pub bulk_state: BulkState,
    /// Calls made to the remote backend through the drain loop
    pub remote_circuit: CircuitStats,
    /// Ready, nothing conflicting, nothing out of retries, remote circuit closed
    pub healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(format!("{}", EngineState::Created), "Created");
        assert_eq!(format!("{}", EngineState::Ready), "Ready");
        assert_eq!(format!("{}", EngineState::ShuttingDown), "ShuttingDown");
    }
}
