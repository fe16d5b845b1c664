//! Token masking for log output.

const MASK_PREFIX_LEN: usize = 4;
const MASK_SUFFIX_LEN: usize = 4;

/// Mask a bearer or refresh token so only its edges remain visible.
///
/// Values too short to keep both edges are replaced entirely.
pub fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let len = chars.len();
    if len <= MASK_PREFIX_LEN + MASK_SUFFIX_LEN {
        return "*".repeat(len.min(8));
    }

    let prefix: String = chars[..MASK_PREFIX_LEN].iter().collect();
    let suffix: String = chars[len - MASK_SUFFIX_LEN..].iter().collect();
    format!("{prefix}...{suffix}")
}
