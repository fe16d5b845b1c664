//! Capture of the deep-link redirect the user pastes back.
//!
//! The provider redirects to a custom scheme only the mobile app handles, so a
//! desktop browser shows an error page with the full redirect URL in its
//! address bar. We never follow that URL, we only read its parameters.

use url::{Url, form_urlencoded};

use crate::{error::AuthError, types::AuthorizationResult};

/// Extract `code` and `state` from a pasted redirect URL.
///
/// Parameters are read from the query string first and from the fragment when
/// the query does not carry both.
pub fn capture_redirect(input: &str) -> Result<AuthorizationResult, AuthError> {
    let trimmed = input.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| AuthError::MalformedRedirect(format!("not a URL ({e})")))?;

    let mut code = None;
    let mut state = None;
    collect_params(url.query().unwrap_or_default(), &mut code, &mut state);
    if code.is_none() || state.is_none() {
        collect_params(url.fragment().unwrap_or_default(), &mut code, &mut state);
    }

    match (code, state) {
        (Some(code), Some(state)) => Ok(AuthorizationResult { code, state }),
        (None, _) => Err(AuthError::MalformedRedirect(
            "missing `code` parameter".into(),
        )),
        (_, None) => Err(AuthError::MalformedRedirect(
            "missing `state` parameter".into(),
        )),
    }
}

fn collect_params(raw: &str, code: &mut Option<String>, state: &mut Option<String>) {
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            "code" if code.is_none() => *code = Some(value.into_owned()),
            "state" if state.is_none() => *state = Some(value.into_owned()),
            _ => {},
        }
    }
}
