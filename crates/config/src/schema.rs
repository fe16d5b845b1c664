use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use {
    chrono::TimeDelta,
    ebike_flow_api::{
        ApiEndpoints,
        client::{ACTIVITY_BASE_URL, DEFAULT_REQUEST_TIMEOUT, PROFILE_BASE_URL},
    },
    ebike_flow_oauth::{
        OAuthConfig,
        types::{BOSCH_AUTH_URL, BOSCH_CLIENT_ID, BOSCH_REDIRECT_URI, BOSCH_SCOPES, BOSCH_TOKEN_URL},
    },
    serde::{Deserialize, Serialize},
};

pub const DEFAULT_ACCOUNT: &str = "default";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
/// Anything faster hammers the API without getting fresher data.
pub const MIN_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_EXPIRY_SKEW_SECS: u64 = 30;
/// Must stay well under the access-token lifetime or every call refreshes.
pub const MAX_EXPIRY_SKEW_SECS: u64 = 3600;

/// Root configuration, usually read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Name the tokens are stored under.
    pub account: String,
    /// Bike to poll when commands are not given one explicitly.
    pub bike_id: Option<String>,
    pub oauth: OAuthSettings,
    pub api: ApiSettings,
    pub poll: PollSettings,
    pub storage: StorageSettings,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            account: DEFAULT_ACCOUNT.to_string(),
            bike_id: None,
            oauth: OAuthSettings::default(),
            api: ApiSettings::default(),
            poll: PollSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSettings {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub extra_auth_params: BTreeMap<String, String>,
    /// Refresh this many seconds before the access token expires.
    pub expiry_skew_secs: u64,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            client_id: BOSCH_CLIENT_ID.to_string(),
            auth_url: BOSCH_AUTH_URL.to_string(),
            token_url: BOSCH_TOKEN_URL.to_string(),
            redirect_uri: BOSCH_REDIRECT_URI.to_string(),
            scopes: BOSCH_SCOPES.iter().map(|s| s.to_string()).collect(),
            extra_auth_params: OAuthConfig::bosch_flow()
                .extra_auth_params
                .into_iter()
                .collect(),
            expiry_skew_secs: DEFAULT_EXPIRY_SKEW_SECS,
        }
    }
}

impl OAuthSettings {
    pub fn to_oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.client_id.clone(),
            auth_url: self.auth_url.clone(),
            token_url: self.token_url.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scopes: self.scopes.clone(),
            extra_auth_params: self
                .extra_auth_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn expiry_skew(&self) -> TimeDelta {
        let secs = self.expiry_skew_secs.min(MAX_EXPIRY_SKEW_SECS) as i64;
        TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::zero())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub profile_base_url: String,
    pub activity_base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            profile_base_url: PROFILE_BASE_URL.to_string(),
            activity_base_url: ACTIVITY_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl ApiSettings {
    pub fn endpoints(&self) -> ApiEndpoints {
        ApiEndpoints {
            profile_base: self.profile_base_url.trim_end_matches('/').to_string(),
            activity_base: self.activity_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    /// Also fetch live state of charge from the connect module.
    pub include_live: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            include_live: true,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Token file; defaults to `tokens.json` in the data directory.
    pub token_file: Option<PathBuf>,
}
