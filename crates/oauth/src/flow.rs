//! Account-scoped OAuth session: authorization, exchange, refresh.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {
    chrono::{DateTime, TimeDelta, Utc},
    ebike_flow_common::{Clock, SystemClock, mask_token},
    secrecy::{ExposeSecret, SecretString},
    tokio::sync::{Mutex, RwLock},
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    error::AuthError,
    pkce::{self, CHALLENGE_METHOD},
    storage::TokenStore,
    token_endpoint,
    types::{AuthorizationRequest, AuthorizationResult, OAuthConfig, PkceChallenge, TokenSet},
};

/// Access tokens are treated as expired this long before their real expiry.
pub const DEFAULT_EXPIRY_SKEW: TimeDelta = TimeDelta::seconds(30);
/// Pending authorization attempts are forgotten after this long.
pub const PENDING_AUTHORIZATION_TTL: TimeDelta = TimeDelta::minutes(10);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const STATE_BYTES: usize = 32;

#[derive(Debug, Clone)]
struct PendingAuthorization {
    pkce: PkceChallenge,
    state: String,
    created_at: DateTime<Utc>,
}

/// OAuth session for a single account.
///
/// Share it behind an [`Arc`]: every caller that needs an access token goes
/// through the same instance so refreshes are de-duplicated.
pub struct OAuthClient {
    account: String,
    config: OAuthConfig,
    http: reqwest::Client,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    skew: TimeDelta,
    pending: std::sync::Mutex<HashMap<String, PendingAuthorization>>,
    tokens: RwLock<Option<TokenSet>>,
    /// Held for the whole duration of a token endpoint call.
    refresh_lock: Mutex<()>,
}

impl OAuthClient {
    pub fn new(
        account: impl Into<String>,
        config: OAuthConfig,
        store: Arc<dyn TokenStore>,
    ) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;
        Ok(Self {
            account: account.into(),
            config,
            http,
            store,
            clock: Arc::new(SystemClock),
            skew: DEFAULT_EXPIRY_SKEW,
            pending: std::sync::Mutex::new(HashMap::new()),
            tokens: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_skew(mut self, skew: TimeDelta) -> Self {
        self.skew = skew;
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Time source shared with callers that stamp data fetched with these tokens.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ── Authorization ──────────────────────────────────────────────────────

    /// Start an authorization attempt and return the URL the user must open.
    pub fn begin_authorization(&self) -> Result<AuthorizationRequest, AuthError> {
        let pkce = PkceChallenge::generate();
        let state = pkce::random_token(STATE_BYTES);
        let nonce = pkce::random_token(STATE_BYTES);
        let url = self.authorization_url(&pkce, &state, &nonce)?;
        let created_at = self.clock.now();
        let request_id = uuid::Uuid::new_v4().to_string();

        let mut pending = self.lock_pending();
        pending.retain(|_, p| created_at - p.created_at < PENDING_AUTHORIZATION_TTL);
        pending.insert(request_id.clone(), PendingAuthorization {
            pkce,
            state: state.clone(),
            created_at,
        });
        drop(pending);

        info!(account = %self.account, %request_id, "authorization started");
        Ok(AuthorizationRequest {
            request_id,
            url,
            state,
            created_at,
        })
    }

    /// Finish an attempt with the code captured from the pasted redirect.
    pub async fn complete_authorization(
        &self,
        request_id: &str,
        result: AuthorizationResult,
    ) -> Result<TokenSet, AuthError> {
        let now = self.clock.now();
        let pending = {
            let mut map = self.lock_pending();
            if map
                .get(request_id)
                .is_some_and(|p| now - p.created_at >= PENDING_AUTHORIZATION_TTL)
            {
                map.remove(request_id);
            }
            map.get(request_id).cloned()
        };
        let Some(pending) = pending else {
            return Err(AuthError::UnknownAuthorizationRequest(request_id.to_string()));
        };

        if pending.state != result.state {
            warn!(account = %self.account, %request_id, "redirect state does not match pending authorization");
            return Err(AuthError::StateMismatch);
        }

        let _guard = self.refresh_lock.lock().await;
        let response = match token_endpoint::exchange_authorization_code(
            &self.http,
            &self.config,
            &result.code,
            &pending.pkce.verifier,
        )
        .await
        {
            Ok(response) => response,
            Err(e) if e.is_invalid_grant() => {
                self.lock_pending().remove(request_id);
                warn!(account = %self.account, %request_id, "authorization code rejected as expired or used");
                return Err(AuthError::CodeExpiredOrUsed);
            },
            Err(e) => return Err(e),
        };

        let tokens = token_endpoint::token_set_from_response(response, self.clock.now(), None)?;
        self.store.save(&self.account, &tokens).await?;
        *self.tokens.write().await = Some(tokens.clone());
        self.lock_pending().remove(request_id);

        info!(
            account = %self.account,
            expires_at = %tokens.expires_at,
            "authorization completed"
        );
        Ok(tokens)
    }

    // ── Token lifecycle ────────────────────────────────────────────────────

    /// Return an access token that is valid for at least the expiry skew,
    /// refreshing first when needed.
    pub async fn get_valid_access_token(&self) -> Result<SecretString, AuthError> {
        if let Some(token) = self.fresh_access_token().await? {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Someone else may have refreshed while we waited for the lock.
        if let Some(token) = self.fresh_access_token().await? {
            return Ok(token);
        }
        Ok(self.refresh_locked().await?.access_token)
    }

    /// Unconditionally exchange the stored refresh token for a new token set.
    pub async fn refresh(&self) -> Result<TokenSet, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Refresh after the API rejected `rejected`, unless another caller
    /// already replaced it.
    pub async fn force_refresh(&self, rejected: &SecretString) -> Result<SecretString, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        if let Some(tokens) = self.current_tokens().await?
            && !tokens.same_access_token(rejected)
            && tokens.is_fresh_at(self.clock.now(), self.skew)
        {
            return Ok(tokens.access_token);
        }
        Ok(self.refresh_locked().await?.access_token)
    }

    /// Tokens currently held for this account, loading them from the store
    /// on first use.
    pub async fn current_tokens(&self) -> Result<Option<TokenSet>, AuthError> {
        if let Some(tokens) = self.tokens.read().await.as_ref() {
            return Ok(Some(tokens.clone()));
        }
        let loaded = self.store.load(&self.account).await?;
        if let Some(tokens) = &loaded {
            let mut cached = self.tokens.write().await;
            if cached.is_none() {
                *cached = Some(tokens.clone());
            }
        }
        Ok(loaded)
    }

    /// Forget the tokens of this account, in memory and in the store.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _guard = self.refresh_lock.lock().await;
        *self.tokens.write().await = None;
        self.store.delete(&self.account).await?;
        info!(account = %self.account, "signed out");
        Ok(())
    }

    async fn fresh_access_token(&self) -> Result<Option<SecretString>, AuthError> {
        let now = self.clock.now();
        Ok(self
            .current_tokens()
            .await?
            .filter(|t| t.is_fresh_at(now, self.skew))
            .map(|t| t.access_token))
    }

    /// Caller must hold `refresh_lock`.
    async fn refresh_locked(&self) -> Result<TokenSet, AuthError> {
        let Some(current) = self.current_tokens().await? else {
            return Err(AuthError::ReauthorizationRequired(
                "no stored tokens for this account".into(),
            ));
        };
        let now = self.clock.now();
        if current.refresh_expired_at(now) {
            return Err(AuthError::ReauthorizationRequired(
                "refresh token has expired".into(),
            ));
        }

        debug!(
            account = %self.account,
            access_token = %mask_token(current.access_token.expose_secret()),
            "refreshing access token"
        );
        let response = token_endpoint::refresh_access_token(
            &self.http,
            &self.config,
            current.refresh_token.expose_secret(),
        )
        .await
        .map_err(|e| match e {
            AuthError::TokenEndpoint { status: 401, .. } => {
                AuthError::ReauthorizationRequired("refresh token was rejected".into())
            },
            e if e.is_invalid_grant() => {
                AuthError::ReauthorizationRequired("refresh token is no longer valid".into())
            },
            e => e,
        })
        .inspect_err(|e| warn!(account = %self.account, error = %e, "token refresh failed"))?;

        let now = self.clock.now();
        let tokens =
            token_endpoint::token_set_from_response(response, now, Some(&current.refresh_token))?;
        if tokens.expires_at <= now {
            return Err(AuthError::InvalidTokenResponse(
                "refreshed token is already expired".into(),
            ));
        }

        *self.tokens.write().await = Some(tokens.clone());
        // The old refresh token may already be revoked, so keep serving the
        // new one from memory even if persisting it fails.
        if let Err(e) = self.store.save(&self.account, &tokens).await {
            warn!(account = %self.account, error = %e, "failed to persist refreshed tokens");
        }

        info!(account = %self.account, expires_at = %tokens.expires_at, "access token refreshed");
        Ok(tokens)
    }

    fn authorization_url(
        &self,
        pkce: &PkceChallenge,
        state: &str,
        nonce: &str,
    ) -> Result<String, AuthError> {
        let mut url = Url::parse(&self.config.auth_url)
            .map_err(|e| AuthError::InvalidConfig(format!("auth_url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("response_type", "code")
                .append_pair("scope", &self.config.scopes.join(" "))
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", CHALLENGE_METHOD)
                .append_pair("state", state)
                .append_pair("nonce", nonce);
            for (key, value) in &self.config.extra_auth_params {
                query.append_pair(key, value);
            }
        }
        Ok(url.into())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingAuthorization>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use {
        ebike_flow_common::ManualClock,
        serde_json::json,
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{body_string_contains, method, path},
        },
    };

    use super::*;
    use crate::{pkce::code_challenge_s256, storage::MemoryTokenStore};

    const ACCOUNT: &str = "rider";

    fn config_for(server: &MockServer) -> OAuthConfig {
        OAuthConfig {
            auth_url: format!("{}/auth", server.uri()),
            token_url: format!("{}/token", server.uri()),
            ..OAuthConfig::bosch_flow()
        }
    }

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn stored_tokens(access: &str, expires_at: DateTime<Utc>) -> TokenSet {
        TokenSet {
            access_token: SecretString::new(access.into()),
            refresh_token: SecretString::new("rt-1".into()),
            expires_at,
            refresh_expires_at: None,
        }
    }

    struct Harness {
        client: Arc<OAuthClient>,
        clock: Arc<ManualClock>,
        store: Arc<MemoryTokenStore>,
    }

    async fn harness(server: &MockServer, initial: Option<TokenSet>) -> Harness {
        let clock = Arc::new(ManualClock::new(epoch()));
        let store = Arc::new(MemoryTokenStore::new());
        if let Some(tokens) = initial {
            store.save(ACCOUNT, &tokens).await.unwrap();
        }
        let client = OAuthClient::new(ACCOUNT, config_for(server), store.clone())
            .unwrap()
            .with_clock(clock.clone());
        Harness {
            client: Arc::new(client),
            clock,
            store,
        }
    }

    fn query_param(url: &str, key: &str) -> Option<String> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    fn token_json(access: &str, refresh: &str) -> serde_json::Value {
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 7200,
            "refresh_expires_in": 0,
            "token_type": "Bearer",
        })
    }

    #[tokio::test]
    async fn authorization_url_carries_pkce_and_state() {
        let server = MockServer::start().await;
        let h = harness(&server, None).await;

        let request = h.client.begin_authorization().unwrap();
        assert!(request.url.starts_with(&format!("{}/auth?", server.uri())));
        assert_eq!(query_param(&request.url, "response_type").as_deref(), Some("code"));
        assert_eq!(query_param(&request.url, "code_challenge_method").as_deref(), Some("S256"));
        assert_eq!(query_param(&request.url, "client_id").as_deref(), Some("one-bike-app"));
        assert_eq!(
            query_param(&request.url, "redirect_uri").as_deref(),
            Some(crate::types::BOSCH_REDIRECT_URI)
        );
        assert_eq!(query_param(&request.url, "scope").as_deref(), Some("openid offline_access"));
        assert_eq!(query_param(&request.url, "kc_idp_hint").as_deref(), Some("skid"));
        assert_eq!(query_param(&request.url, "state"), Some(request.state.clone()));

        let pending = h.client.lock_pending().get(&request.request_id).cloned().unwrap();
        assert_eq!(
            query_param(&request.url, "code_challenge").unwrap(),
            code_challenge_s256(&pending.pkce.verifier)
        );
    }

    #[tokio::test]
    async fn complete_authorization_exchanges_code_and_stores_tokens() {
        let server = MockServer::start().await;
        let h = harness(&server, None).await;
        let request = h.client.begin_authorization().unwrap();
        let verifier = h.client.lock_pending()[&request.request_id].pkce.verifier.clone();

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=XYZ"))
            .and(body_string_contains(format!("code_verifier={verifier}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_json("at-1", "rt-1")))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = h
            .client
            .complete_authorization(&request.request_id, AuthorizationResult {
                code: "XYZ".into(),
                state: request.state.clone(),
            })
            .await
            .unwrap();

        assert_eq!(tokens.access_token.expose_secret(), "at-1");
        assert_eq!(tokens.expires_at, epoch() + TimeDelta::seconds(7200));
        let stored = h.store.load(ACCOUNT).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.expose_secret(), "rt-1");
        assert!(h.client.lock_pending().is_empty());

        // Consumed: the same request cannot be completed twice.
        let again = h
            .client
            .complete_authorization(&request.request_id, AuthorizationResult {
                code: "XYZ".into(),
                state: request.state,
            })
            .await;
        assert!(matches!(again, Err(AuthError::UnknownAuthorizationRequest(_))));
    }

    #[tokio::test]
    async fn state_mismatch_never_calls_token_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_json("at", "rt")))
            .expect(0)
            .mount(&server)
            .await;
        let h = harness(&server, None).await;
        let request = h.client.begin_authorization().unwrap();

        let err = h
            .client
            .complete_authorization(&request.request_id, AuthorizationResult {
                code: "XYZ".into(),
                state: "someone-elses-state".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::StateMismatch));
        // The attempt survives so the user can paste the right URL.
        assert!(h.client.lock_pending().contains_key(&request.request_id));
        assert!(h.store.load(ACCOUNT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_grant_on_exchange_is_code_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Code not valid",
            })))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server, None).await;
        let request = h.client.begin_authorization().unwrap();

        let err = h
            .client
            .complete_authorization(&request.request_id, AuthorizationResult {
                code: "used".into(),
                state: request.state,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CodeExpiredOrUsed), "{err:?}");
        assert!(h.client.lock_pending().is_empty());
    }

    #[tokio::test]
    async fn other_exchange_failures_stay_generic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_client",
            })))
            .mount(&server)
            .await;
        let h = harness(&server, None).await;
        let request = h.client.begin_authorization().unwrap();

        let err = h
            .client
            .complete_authorization(&request.request_id, AuthorizationResult {
                code: "XYZ".into(),
                state: request.state,
            })
            .await
            .unwrap_err();
        assert!(
            matches!(&err, AuthError::TokenEndpoint { status: 400, error: Some(code), .. } if code == "invalid_client"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn stale_pending_authorization_is_rejected() {
        let server = MockServer::start().await;
        let h = harness(&server, None).await;
        let request = h.client.begin_authorization().unwrap();
        h.clock.advance(PENDING_AUTHORIZATION_TTL + TimeDelta::seconds(1));

        let err = h
            .client
            .complete_authorization(&request.request_id, AuthorizationResult {
                code: "XYZ".into(),
                state: request.state,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownAuthorizationRequest(_)));
    }

    #[tokio::test]
    async fn fresh_token_is_returned_without_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_json("at-2", "rt-2")))
            .expect(0)
            .mount(&server)
            .await;
        let h = harness(&server, Some(stored_tokens("at-1", epoch() + TimeDelta::hours(1)))).await;

        let token = h.client.get_valid_access_token().await.unwrap();
        assert_eq!(token.expose_secret(), "at-1");
    }

    #[tokio::test]
    async fn token_inside_skew_window_is_refreshed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_json("at-2", "rt-2")))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server, Some(stored_tokens("at-1", epoch() + TimeDelta::seconds(10)))).await;

        let token = h.client.get_valid_access_token().await.unwrap();
        assert_eq!(token.expose_secret(), "at-2");
        let stored = h.store.load(ACCOUNT).await.unwrap().unwrap();
        assert_eq!(stored.refresh_token.expose_secret(), "rt-2");
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_json("at-2", "rt-2"))
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server, Some(stored_tokens("at-1", epoch() - TimeDelta::seconds(1)))).await;

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..10 {
            let client = Arc::clone(&h.client);
            tasks.spawn(async move { client.get_valid_access_token().await });
        }
        while let Some(joined) = tasks.join_next().await {
            let token = joined.unwrap().unwrap();
            assert_eq!(token.expose_secret(), "at-2");
        }
    }

    #[tokio::test]
    async fn rejected_refresh_token_requires_reauthorization() {
        for (status, body) in [
            (400, json!({"error": "invalid_grant", "error_description": "Token is not active"})),
            (401, json!({"error": "unauthorized_client"})),
        ] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/token"))
                .respond_with(ResponseTemplate::new(status).set_body_json(body))
                .expect(1)
                .mount(&server)
                .await;
            let h = harness(&server, Some(stored_tokens("at-1", epoch() - TimeDelta::seconds(1)))).await;

            let err = h.client.get_valid_access_token().await.unwrap_err();
            assert!(err.requires_reauthorization(), "{status}: {err:?}");
            // The stale tokens are left alone; only a new login replaces them.
            let stored = h.store.load(ACCOUNT).await.unwrap().unwrap();
            assert_eq!(stored.access_token.expose_secret(), "at-1");
        }
    }

    #[tokio::test]
    async fn server_errors_during_refresh_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server, Some(stored_tokens("at-1", epoch() - TimeDelta::seconds(1)))).await;

        let err = h.client.get_valid_access_token().await.unwrap_err();
        assert!(matches!(err, AuthError::TokenEndpoint { status: 503, .. }));
        assert!(!err.requires_reauthorization());
    }

    #[tokio::test]
    async fn refresh_without_rotation_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-2",
                "expires_in": 300,
            })))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server, Some(stored_tokens("at-1", epoch() + TimeDelta::hours(1)))).await;

        let tokens = h.client.refresh().await.unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "at-2");
        assert_eq!(tokens.refresh_token.expose_secret(), "rt-1");
        assert_eq!(tokens.expires_at, epoch() + TimeDelta::seconds(300));
        let stored = h.store.load(ACCOUNT).await.unwrap().unwrap();
        assert_eq!(stored.access_token.expose_secret(), "at-2");
    }

    #[tokio::test]
    async fn missing_tokens_require_reauthorization() {
        let server = MockServer::start().await;
        let h = harness(&server, None).await;
        let err = h.client.get_valid_access_token().await.unwrap_err();
        assert!(err.requires_reauthorization());
    }

    #[tokio::test]
    async fn expired_refresh_token_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_json("at-2", "rt-2")))
            .expect(0)
            .mount(&server)
            .await;
        let mut tokens = stored_tokens("at-1", epoch() - TimeDelta::seconds(1));
        tokens.refresh_expires_at = Some(epoch() - TimeDelta::minutes(1));
        let h = harness(&server, Some(tokens)).await;

        let err = h.client.get_valid_access_token().await.unwrap_err();
        assert!(err.requires_reauthorization());
    }

    #[tokio::test]
    async fn force_refresh_reuses_token_replaced_by_another_caller() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_json("at-3", "rt-3")))
            .expect(1)
            .mount(&server)
            .await;
        let h = harness(&server, Some(stored_tokens("at-1", epoch() + TimeDelta::hours(1)))).await;

        let stale = SecretString::new("at-0".into());
        let token = h.client.force_refresh(&stale).await.unwrap();
        assert_eq!(token.expose_secret(), "at-1");

        let rejected = SecretString::new("at-1".into());
        let token = h.client.force_refresh(&rejected).await.unwrap();
        assert_eq!(token.expose_secret(), "at-3");
    }

    #[tokio::test]
    async fn sign_out_clears_memory_and_store() {
        let server = MockServer::start().await;
        let h = harness(&server, Some(stored_tokens("at-1", epoch() + TimeDelta::hours(1)))).await;
        assert!(h.client.current_tokens().await.unwrap().is_some());

        h.client.sign_out().await.unwrap();
        assert!(h.client.current_tokens().await.unwrap().is_none());
        assert!(h.store.load(ACCOUNT).await.unwrap().is_none());
    }
}
