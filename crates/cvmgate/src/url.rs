//! URL validation utilities
//!
//! Key discovery is driven by the token's own `iss` claim, so every URL the
//! verifier is about to fetch is checked for scheme, host and length first.

use crate::limits::{MAX_ISSUER_URL_LENGTH, MAX_JWKS_URI_LENGTH};

/// Common URL validation logic
fn validate_url_common(url: &str, max_length: usize, name: &str) -> Result<url::Url, String> {
    if url.trim().is_empty() {
        return Err(format!("{name} cannot be empty"));
    }

    if url.len() > max_length {
        return Err(format!(
            "{name} too long: {} characters (maximum: {max_length} characters)",
            url.len()
        ));
    }

    let parsed = url
        .parse::<url::Url>()
        .map_err(|e| format!("invalid {name}: {e}"))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(format!("{name} must use http or https scheme"));
    }

    if parsed.host_str().is_none() {
        return Err(format!("{name} must have a valid host"));
    }

    Ok(parsed)
}

/// Strip trailing slashes so `<issuer>/.well-known/...` never doubles up
pub(crate) fn normalize_issuer(issuer: &str) -> &str {
    issuer.trim().trim_end_matches('/')
}

/// Validate a normalized issuer URL
pub(crate) fn validate_issuer_url(issuer: &str) -> Result<(), String> {
    validate_url_common(issuer, MAX_ISSUER_URL_LENGTH, "issuer URL")?;

    if issuer.ends_with('/') {
        return Err("issuer URL must not end with trailing slash".into());
    }

    Ok(())
}

/// Validate JWKS URI format and size
pub(crate) fn validate_jwks_uri(uri: &str) -> Result<(), String> {
    validate_url_common(uri, MAX_JWKS_URI_LENGTH, "JWKS URI")?;
    Ok(())
}
