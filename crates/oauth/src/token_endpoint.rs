//! Token endpoint calls (authorization_code + refresh_token grants).

use {
    chrono::{DateTime, TimeDelta, Utc},
    secrecy::SecretString,
    serde_json::Value,
    tracing::debug,
};

use crate::{
    error::AuthError,
    types::{DEFAULT_ACCESS_TOKEN_LIFETIME_SECS, OAuthConfig, TokenResponse, TokenSet},
};

const ERROR_BODY_SNIPPET_LEN: usize = 300;

pub(crate) async fn exchange_authorization_code(
    http: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    code_verifier: &str,
) -> Result<TokenResponse, AuthError> {
    let form = [
        ("grant_type", "authorization_code"),
        ("client_id", config.client_id.as_str()),
        ("code", code.trim()),
        ("code_verifier", code_verifier),
        ("redirect_uri", config.redirect_uri.as_str()),
    ];
    post_form(http, &config.token_url, &form).await
}

pub(crate) async fn refresh_access_token(
    http: &reqwest::Client,
    config: &OAuthConfig,
    refresh_token: &str,
) -> Result<TokenResponse, AuthError> {
    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", config.client_id.as_str()),
        ("refresh_token", refresh_token),
    ];
    post_form(http, &config.token_url, &form).await
}

async fn post_form(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let response = http
        .post(token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let (error, description) = parse_oauth_error_details(&body);
        debug!(
            status = status.as_u16(),
            error = error.as_deref().unwrap_or("-"),
            body = %body_snippet(&body),
            "token endpoint rejected request"
        );
        return Err(AuthError::TokenEndpoint {
            status: status.as_u16(),
            error,
            description,
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| AuthError::InvalidTokenResponse(format!("response is not valid JSON: {e}")))
}

/// Build a [`TokenSet`] from an endpoint response.
///
/// `previous_refresh` is kept when the provider does not rotate the refresh
/// token.
pub(crate) fn token_set_from_response(
    response: TokenResponse,
    now: DateTime<Utc>,
    previous_refresh: Option<&SecretString>,
) -> Result<TokenSet, AuthError> {
    let access_token = response
        .access_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::InvalidTokenResponse("missing access_token".into()))?;

    let refresh_token = match response
        .refresh_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
    {
        Some(token) => SecretString::new(token),
        None => previous_refresh.cloned().ok_or_else(|| {
            AuthError::InvalidTokenResponse("missing refresh_token".into())
        })?,
    };

    let lifetime = response
        .expires_in
        .unwrap_or(DEFAULT_ACCESS_TOKEN_LIFETIME_SECS);
    if lifetime <= 0 {
        return Err(AuthError::InvalidTokenResponse(format!(
            "non-positive expires_in: {lifetime}"
        )));
    }

    // Keycloak reports 0 for offline tokens that never expire.
    let refresh_expires_at = response
        .refresh_expires_in
        .filter(|secs| *secs > 0)
        .map(|secs| now + TimeDelta::seconds(secs));

    Ok(TokenSet {
        access_token: SecretString::new(access_token),
        refresh_token,
        expires_at: now + TimeDelta::seconds(lifetime),
        refresh_expires_at,
    })
}

/// Pull `error` / `error_description` out of an OAuth error body.
///
/// Handles both the RFC 6749 flat shape and a nested `{"error": {"code", "message"}}`.
fn parse_oauth_error_details(body: &str) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };

    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut code = None;
    let mut message = non_empty(value.get("error_description"));

    match value.get("error") {
        Some(error @ Value::String(_)) => code = non_empty(Some(error)),
        Some(Value::Object(obj)) => {
            code = non_empty(obj.get("code")).or_else(|| non_empty(obj.get("type")));
            if message.is_none() {
                message = non_empty(obj.get("message"));
            }
        },
        _ => {},
    }

    (code, message)
}

fn body_snippet(body: &str) -> String {
    let mut value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(_) => return body.chars().take(ERROR_BODY_SNIPPET_LEN).collect(),
    };
    redact_token_fields(&mut value);
    value
        .to_string()
        .chars()
        .take(ERROR_BODY_SNIPPET_LEN)
        .collect()
}

fn redact_token_fields(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map.iter_mut() {
                if key.to_ascii_lowercase().contains("token")
                    && let Some(raw) = nested.as_str()
                {
                    *nested = Value::String(ebike_flow_common::mask_token(raw));
                    continue;
                }
                redact_token_fields(nested);
            }
        },
        Value::Array(items) => items.iter_mut().for_each(redact_token_fields),
        _ => {},
    }
}
