use ebike_flow_oauth::AuthError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The API kept answering 401 after a forced token refresh.
    #[error("authentication lost: the API rejected a freshly refreshed token")]
    AuthenticationLost,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited by the eBike Flow API")]
    RateLimited,
    #[error("API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid API response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Errors that polling again cannot fix; the account must be set up anew.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::AuthenticationLost => true,
            Self::Auth(e) => e.requires_reauthorization(),
            _ => false,
        }
    }
}
