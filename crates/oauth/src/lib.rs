pub mod error;
pub mod flow;
pub mod pkce;
pub mod redirect;
pub mod storage;
mod token_endpoint;
pub mod types;

pub use {
    error::{AuthError, StoreError},
    flow::OAuthClient,
    redirect::capture_redirect,
    storage::{FileTokenStore, MemoryTokenStore, TokenStore},
    types::{AuthorizationRequest, AuthorizationResult, OAuthConfig, PkceChallenge, TokenSet},
};
