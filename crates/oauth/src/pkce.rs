//! PKCE verifier/challenge generation (RFC 7636, S256 only).

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::RngCore,
    sha2::{Digest, Sha256},
};

use crate::types::PkceChallenge;

pub const CHALLENGE_METHOD: &str = "S256";

const VERIFIER_BYTES: usize = 32;
const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
#[error("PKCE verifier must be 43-128 unreserved characters")]
pub struct InvalidVerifier;

impl PkceChallenge {
    /// Generate a fresh verifier and its S256 challenge.
    pub fn generate() -> Self {
        let verifier = random_token(VERIFIER_BYTES);
        let challenge = code_challenge_s256(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// Rebuild a challenge from a known verifier.
    pub fn from_verifier(verifier: impl Into<String>) -> Result<Self, InvalidVerifier> {
        let verifier = verifier.into();
        if !is_valid_verifier(&verifier) {
            return Err(InvalidVerifier);
        }
        let challenge = code_challenge_s256(&verifier);
        Ok(Self {
            verifier,
            challenge,
        })
    }

    pub fn method(&self) -> &'static str {
        CHALLENGE_METHOD
    }
}

/// `base64url(SHA-256(verifier))` without padding.
pub fn code_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// URL-safe random string built from `bytes` bytes of entropy.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn is_valid_verifier(verifier: &str) -> bool {
    (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}
