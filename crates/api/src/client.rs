use std::{collections::HashSet, sync::Arc, time::Duration};

use {
    ebike_flow_oauth::OAuthClient,
    reqwest::StatusCode,
    secrecy::{ExposeSecret, SecretString},
    serde_json::Value,
    tracing::{debug, warn},
};

use crate::{
    error::ApiError,
    snapshot::{self, BikeSnapshot},
    types::{ActivitySummary, BikeSummary},
};

pub const PROFILE_BASE_URL: &str = "https://obc-rider-profile.prod.connected-biking.cloud";
pub const ACTIVITY_BASE_URL: &str = "https://obc-rider-activity.prod.connected-biking.cloud";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const ACTIVITY_PAGE_SIZE: u32 = 30;
const ERROR_BODY_SNIPPET_LEN: usize = 300;

/// Base URLs of the provider services.
#[derive(Debug, Clone)]
pub struct ApiEndpoints {
    pub profile_base: String,
    pub activity_base: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            profile_base: PROFILE_BASE_URL.to_string(),
            activity_base: ACTIVITY_BASE_URL.to_string(),
        }
    }
}

/// Authenticated client for the profile and activity services.
pub struct ApiClient {
    oauth: Arc<OAuthClient>,
    http: reqwest::Client,
    endpoints: ApiEndpoints,
}

impl ApiClient {
    pub fn new(oauth: Arc<OAuthClient>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            oauth,
            http,
            endpoints: ApiEndpoints::default(),
        })
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: ApiEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub async fn list_bikes(&self) -> Result<Vec<BikeSummary>, ApiError> {
        let url = format!("{}/v1/bike-profile", self.endpoints.profile_base);
        let Some(body) = self.get_json(&url).await? else {
            return Ok(Vec::new());
        };
        let bikes: Vec<BikeSummary> = data_items(&body)
            .filter_map(BikeSummary::from_value)
            .collect();
        debug!(count = bikes.len(), "listed bikes");
        Ok(bikes)
    }

    /// Static profile of a bike, or `None` if the provider does not know it.
    ///
    /// Accepts both the `{"data": {"attributes": ..}}` envelope and a flat body.
    pub async fn bike_profile(&self, bike_id: &str) -> Result<Option<Value>, ApiError> {
        let url = format!("{}/v1/bike-profile/{bike_id}", self.endpoints.profile_base);
        Ok(self.get_json(&url).await?.map(unwrap_attributes))
    }

    /// Live state of charge. `None` when the connect module is offline.
    pub async fn state_of_charge(&self, bike_id: &str) -> Result<Option<Value>, ApiError> {
        let url = format!("{}/v1/state-of-charge/{bike_id}", self.endpoints.profile_base);
        let live = self.get_json(&url).await?;
        if live.is_none() {
            debug!(bike_id, "no live state of charge, bike is probably offline");
        }
        Ok(live)
    }

    pub async fn fetch_snapshot(
        &self,
        bike_id: &str,
        include_live: bool,
    ) -> Result<BikeSnapshot, ApiError> {
        let profile = self
            .bike_profile(bike_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("bike profile {bike_id}")))?;

        let live = if include_live {
            match self.state_of_charge(bike_id).await {
                Ok(live) => live,
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => {
                    debug!(bike_id, error = %e, "ignoring live data failure");
                    None
                },
            }
        } else {
            None
        };

        Ok(snapshot::combine(bike_id, &profile, live.as_ref(), self.oauth.clock().now()))
    }

    /// First page of this bike's activities, newest first.
    pub async fn recent_activities(&self, bike_id: &str) -> Result<Vec<ActivitySummary>, ApiError> {
        let mut collector = ActivityCollector::new(bike_id);
        if let Some(page) = self.get_json(&self.activity_url(0)).await? {
            collector.add_page(&page);
        }
        Ok(collector.activities)
    }

    /// Every activity of this bike, following the pagination metadata.
    pub async fn all_activities(&self, bike_id: &str) -> Result<Vec<ActivitySummary>, ApiError> {
        let mut collector = ActivityCollector::new(bike_id);
        let mut page = 0;
        let mut total_pages = 1;
        while page < total_pages {
            let Some(body) = self.get_json(&self.activity_url(page)).await? else {
                break;
            };
            collector.add_page(&body);
            total_pages = body
                .get("meta")
                .and_then(|m| m.get("pages"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            page += 1;
            debug!(bike_id, page, total_pages, "fetched activity page");
        }
        Ok(collector.activities)
    }

    fn activity_url(&self, page: u64) -> String {
        format!(
            "{}/v1/activity?page={page}&size={ACTIVITY_PAGE_SIZE}&sort=-startTime&include-polyline=false",
            self.endpoints.activity_base
        )
    }

    /// GET a JSON resource; `Ok(None)` on 404.
    ///
    /// A 401 is answered with one forced refresh and a single retry.
    async fn get_json(&self, url: &str) -> Result<Option<Value>, ApiError> {
        let token = self.oauth.get_valid_access_token().await?;
        let mut response = self.send(url, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(url, "API answered 401, forcing token refresh");
            let token = self.oauth.force_refresh(&token).await?;
            response = self.send(url, &token).await?;
            if response.status() == StatusCode::UNAUTHORIZED {
                warn!(account = %self.oauth.account(), url, "API rejected refreshed token");
                return Err(ApiError::AuthenticationLost);
            }
        }

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                debug!(url, "resource not found");
                Ok(None)
            },
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(url, "rate limited");
                Err(ApiError::RateLimited)
            },
            s if !s.is_success() => {
                let body: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(ERROR_BODY_SNIPPET_LEN)
                    .collect();
                warn!(url, status = s.as_u16(), "API request failed");
                Err(ApiError::Status {
                    status: s.as_u16(),
                    body,
                })
            },
            _ => {
                let bytes = response.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            },
        }
    }

    async fn send(&self, url: &str, token: &SecretString) -> Result<reqwest::Response, ApiError> {
        Ok(self
            .http
            .get(url)
            .bearer_auth(token.expose_secret())
            .header("Accept", "application/json")
            .send()
            .await?)
    }
}

fn data_items(body: &Value) -> impl Iterator<Item = &Value> {
    body.get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn unwrap_attributes(body: Value) -> Value {
    match body.pointer("/data/attributes") {
        Some(attrs) if attrs.is_object() => attrs.clone(),
        _ => body,
    }
}

/// De-duplicates activities by id and keeps those of one bike, in page order.
struct ActivityCollector<'a> {
    bike_id: &'a str,
    seen: HashSet<String>,
    activities: Vec<ActivitySummary>,
}

impl<'a> ActivityCollector<'a> {
    fn new(bike_id: &'a str) -> Self {
        Self {
            bike_id,
            seen: HashSet::new(),
            activities: Vec::new(),
        }
    }

    fn add_page(&mut self, body: &Value) {
        for activity in data_items(body).filter_map(ActivitySummary::from_value) {
            if !self.seen.insert(activity.id.clone()) {
                warn!(activity_id = %activity.id, "duplicate activity id, skipping");
                continue;
            }
            if activity.bike_id.as_deref() == Some(self.bike_id) {
                self.activities.push(activity);
            }
        }
    }
}
