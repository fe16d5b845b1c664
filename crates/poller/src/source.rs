use std::sync::Arc;

use {
    async_trait::async_trait,
    ebike_flow_api::{ApiClient, ApiError, BikeSnapshot},
};

/// Produces one complete snapshot per call.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<BikeSnapshot, ApiError>;
}

/// Fetches profile and, optionally, live state of charge for one bike.
pub struct BikeStatusSource {
    api: Arc<ApiClient>,
    bike_id: String,
    include_live: bool,
}

impl BikeStatusSource {
    pub fn new(api: Arc<ApiClient>, bike_id: impl Into<String>) -> Self {
        Self {
            api,
            bike_id: bike_id.into(),
            include_live: true,
        }
    }

    #[must_use]
    pub fn with_live_data(mut self, include_live: bool) -> Self {
        self.include_live = include_live;
        self
    }
}

#[async_trait]
impl SnapshotSource for BikeStatusSource {
    async fn fetch(&self) -> Result<BikeSnapshot, ApiError> {
        self.api
            .fetch_snapshot(&self.bike_id, self.include_live)
            .await
    }
}
