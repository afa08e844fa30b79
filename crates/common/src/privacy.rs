//! Identifier redaction for logs
//!
//! Account identifiers and user emails are personal data. Logs carry a short
//! SHA-256 prefix instead so events for one account can still be correlated.

use sha2::{Digest, Sha256};

const REDACTED_PREFIX_LEN: usize = 12;

/// Hash an identifier into a short, stable, non-reversible token.
///
/// Empty identifiers are rendered as `"<empty>"`.
pub fn redact_identifier(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let digest = Sha256::digest(trimmed.to_ascii_lowercase().as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(REDACTED_PREFIX_LEN);
    format!("id:{encoded}")
}
