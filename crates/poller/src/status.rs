use std::sync::Arc;

use {
    chrono::{DateTime, Utc},
    ebike_flow_api::BikeSnapshot,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    /// Polling stopped for good; the account needs a new login.
    Halted,
}

/// Whether subscribers have data they can show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// No snapshot has been fetched yet.
    Unavailable,
    Available,
    NeedsReconfiguration,
}

/// What subscribers of a [`Coordinator`](crate::Coordinator) observe.
#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub state: PollState,
    pub availability: Availability,
    /// Last known good snapshot. Failed polls never clear it.
    pub snapshot: Option<Arc<BikeSnapshot>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        Self {
            state: PollState::Idle,
            availability: Availability::Unavailable,
            snapshot: None,
            consecutive_failures: 0,
            last_error: None,
            last_success_at: None,
        }
    }
}
