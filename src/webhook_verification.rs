//! # Webhook Signature Verification
//!
//! Verifies GitHub's `X-Hub-Signature-256` header using HMAC-SHA256 over the
//! raw request body with a constant-time comparison.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the `sha256=<hex>` signature GitHub would send for `body`.
pub fn compute_github_signature(body: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verifies a GitHub webhook signature.
///
/// Returns `false` when the header, body or secret is missing or empty, or
/// when the signature does not match. Never panics on malformed input.
pub fn verify_github_signature(signature_header: Option<&str>, body: &[u8], secret: &str) -> bool {
    let Some(signature_header) = signature_header else {
        debug!("GitHub signature header missing");
        return false;
    };

    if signature_header.is_empty() || body.is_empty() || secret.is_empty() {
        debug!(
            body_size = body.len(),
            "GitHub signature verification skipped: empty input"
        );
        return false;
    }

    let Some(expected) = compute_github_signature(body, secret) else {
        return false;
    };

    let expected = expected.as_bytes();
    let provided = signature_header.as_bytes();

    // Unequal length is a mismatch, not an error.
    if expected.len() != provided.len() {
        return false;
    }

    expected.ct_eq(provided).into()
}
