//! REST client for the eBike Flow profile and activity services.

pub mod client;
pub mod error;
pub mod snapshot;
pub mod types;

pub use {
    client::{ApiClient, ApiEndpoints},
    error::ApiError,
    snapshot::{BikeSnapshot, RangeEstimate},
    types::{ActivitySummary, BikeSummary},
};
