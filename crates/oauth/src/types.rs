use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

pub const BOSCH_AUTH_URL: &str =
    "https://p9.authz.bosch.com/auth/realms/obc/protocol/openid-connect/auth";
pub const BOSCH_TOKEN_URL: &str =
    "https://p9.authz.bosch.com/auth/realms/obc/protocol/openid-connect/token";
pub const BOSCH_CLIENT_ID: &str = "one-bike-app";
/// Deep link registered by the mobile app. Browsers cannot follow it, so the
/// user copies the failed redirect from the address bar.
pub const BOSCH_REDIRECT_URI: &str = "onebikeapp-ios://com.bosch.ebike.onebikeapp/oauth2redirect";
pub const BOSCH_SCOPES: &[&str] = &["openid", "offline_access"];

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_ACCESS_TOKEN_LIFETIME_SECS: i64 = 7200;

/// OAuth 2.0 provider configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Provider-specific query parameters appended to the authorization URL.
    pub extra_auth_params: Vec<(String, String)>,
}

impl OAuthConfig {
    /// Configuration used by the Bosch eBike Flow mobile app.
    pub fn bosch_flow() -> Self {
        Self {
            client_id: BOSCH_CLIENT_ID.to_string(),
            auth_url: BOSCH_AUTH_URL.to_string(),
            token_url: BOSCH_TOKEN_URL.to_string(),
            redirect_uri: BOSCH_REDIRECT_URI.to_string(),
            scopes: BOSCH_SCOPES.iter().map(|s| s.to_string()).collect(),
            extra_auth_params: vec![
                ("kc_idp_hint".to_string(), "skid".to_string()),
                ("prompt".to_string(), "login".to_string()),
            ],
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self::bosch_flow()
    }
}

/// Stored OAuth tokens for one account.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: SecretString,
    #[serde(serialize_with = "serialize_secret")]
    pub refresh_token: SecretString,
    pub expires_at: DateTime<Utc>,
    /// Absent when the provider issued a non-expiring (offline) refresh token.
    #[serde(default)]
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// Whether the access token can still be used at `now`, keeping `skew`
    /// as a safety margin before the real expiry.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, skew: TimeDelta) -> bool {
        now < self.expires_at - skew
    }

    /// Whether the refresh token itself has run out.
    pub fn refresh_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at.is_some_and(|at| at <= now)
    }

    pub(crate) fn same_access_token(&self, other: &SecretString) -> bool {
        self.access_token.expose_secret() == other.expose_secret()
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field(
                "access_token",
                &ebike_flow_common::mask_token(self.access_token.expose_secret()),
            )
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

fn serialize_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Raw token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
}

/// PKCE challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

/// Code and state pulled out of a pasted redirect URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub code: String,
    pub state: String,
}

/// A started authorization attempt.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Handle passed back to `complete_authorization`.
    pub request_id: String,
    /// URL the user opens in a browser.
    pub url: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
}
