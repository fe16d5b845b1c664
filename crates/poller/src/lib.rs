//! Periodic refresh of bike telemetry for subscribers.

pub mod coordinator;
pub mod source;
pub mod status;

pub use {
    coordinator::{Coordinator, DEFAULT_POLL_INTERVAL, PollExit, PollOutcome},
    source::{BikeStatusSource, SnapshotSource},
    status::{Availability, CoordinatorStatus, PollState},
};
