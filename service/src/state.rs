//! Service state definitions.

use serde::{Deserialize, Serialize};

/// Service operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    /// Service is constructed but not yet serving.
    Starting,
    /// Service is running and accepting requests.
    Running,
    /// Service is shutting down, not accepting new requests.
    ShuttingDown,
    /// Service is stopped.
    Stopped,
}

impl ServiceState {
    /// Check if the service is accepting new requests.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service can be (re)started from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Stopped)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_accepts_requests() {
        assert!(ServiceState::Running.accepts_requests());
        for state in [
            ServiceState::Starting,
            ServiceState::ShuttingDown,
            ServiceState::Stopped,
        ] {
            assert!(!state.accepts_requests());
        }
        assert!(ServiceState::Stopped.can_start());
        assert!(!ServiceState::Running.can_start());
    }
}
