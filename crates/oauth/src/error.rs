/// Errors raised while authorizing or keeping tokens fresh.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The pasted redirect could not be parsed or lacks `code`/`state`.
    #[error("malformed redirect URL: {0}")]
    MalformedRedirect(String),
    /// The pasted redirect belongs to a different (or stale) attempt.
    #[error("state parameter does not match the pending authorization")]
    StateMismatch,
    #[error("no pending authorization with id {0}")]
    UnknownAuthorizationRequest(String),
    /// Authorization codes are single use and live for about a minute.
    #[error("authorization code expired or was already used")]
    CodeExpiredOrUsed,
    /// The refresh token was rejected or is missing; the user has to log in again.
    #[error("reauthorization required: {0}")]
    ReauthorizationRequired(String),
    #[error(
        "token endpoint returned HTTP {status}: {}",
        error.as_deref().unwrap_or("unknown error")
    )]
    TokenEndpoint {
        status: u16,
        error: Option<String>,
        description: Option<String>,
    },
    #[error("invalid token response: {0}")]
    InvalidTokenResponse(String),
    #[error("invalid OAuth configuration: {0}")]
    InvalidConfig(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// True when only a fresh interactive login can recover the session.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, Self::ReauthorizationRequired(_))
    }

    pub(crate) fn is_invalid_grant(&self) -> bool {
        matches!(
            self,
            Self::TokenEndpoint { error: Some(code), .. } if code.eq_ignore_ascii_case("invalid_grant")
        )
    }
}

/// Errors from a [`TokenStore`](crate::TokenStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("token store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("token store contents are invalid: {0}")]
    Serde(#[from] serde_json::Error),
}
