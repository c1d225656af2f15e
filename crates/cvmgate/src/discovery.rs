//! OIDC Discovery module
//!
//! Fetches issuer metadata from `/.well-known/openid-configuration` as defined
//! in [OpenID Connect Discovery 1.0](https://openid.net/specs/openid-connect-discovery-1_0.html)
//! and resolves the JWKS URI. A document without `jwks_uri` is an error;
//! there is no fallback location.

use crate::error::{Error, Result};
use crate::jwks::fetch_url;
use crate::limits::MAX_DISCOVERY_RESPONSE_SIZE;
use crate::url::validate_jwks_uri;
use miniserde::Deserialize;

/// Minimal OIDC discovery document containing the JWKS URI
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OidcDiscovery {
    pub jwks_uri: Option<String>,
}

/// Build the URL to the discovery document from an issuer string
fn build_well_known_url(issuer: &str) -> Result<String> {
    let base = issuer.trim_end_matches('/');

    if base.is_empty() {
        return Err(Error::Discovery("empty issuer".into()));
    }

    Ok(format!("{base}/.well-known/openid-configuration"))
}

/// Discover the JWKS URI using the OIDC well-known configuration
///
/// `issuer` must already be normalized and validated.
pub(crate) async fn discover_jwks_uri(issuer: &str, client: &reqwest::Client) -> Result<String> {
    let url = build_well_known_url(issuer)?;
    let bytes = fetch_url(client, &url, MAX_DISCOVERY_RESPONSE_SIZE)
        .await
        .map_err(|e| Error::Discovery(format!("{url}: {e}")))?;

    let body = std::str::from_utf8(&bytes)
        .map_err(|e| Error::Discovery(format!("utf8 decode failed: {e}")))?;

    let doc: OidcDiscovery = miniserde::json::from_str(body)
        .map_err(|_| Error::Discovery("invalid discovery json".into()))?;

    let jwks_uri = match doc.jwks_uri {
        Some(uri) if !uri.trim().is_empty() => uri,
        _ => return Err(Error::Discovery("missing or empty jwks_uri".into())),
    };

    validate_jwks_uri(&jwks_uri).map_err(Error::Discovery)?;

    Ok(jwks_uri)
}
