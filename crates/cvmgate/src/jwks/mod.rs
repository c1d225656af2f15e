//! Signing key retrieval for attestation token issuers
//!
//! [`KeyDirectoryClient`] resolves an issuer to its JSON Web Key Set in two
//! hops: the OIDC discovery document names the `jwks_uri`, which is then
//! fetched and parsed. Nothing is cached; every call goes to the network.
pub(crate) mod jwk;

pub use jwk::Jwk;

use crate::discovery::discover_jwks_uri;
use crate::error::{Error, Result, TokenError};
use crate::limits::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT, DEFAULT_REQUEST_TIMEOUT, MAX_JWK_SET_SIZE,
    MAX_JWKS_RESPONSE_SIZE,
};
use crate::url::{normalize_issuer, validate_issuer_url, validate_jwks_uri};
use miniserde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Timeouts for discovery and key set requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Limit on each individual read
    pub read_timeout: Duration,
    /// Limit on the whole request, so a slowly trickling body cannot hold it open
    pub request_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Fetch data from a URL using reqwest, reading at most `max_size` bytes
///
/// Non-2xx responses are failures. There are no retries. A declared
/// `Content-Length` above the limit fails before the body is read; otherwise
/// the body is read chunk by chunk and the fetch stops as soon as the limit
/// is passed.
pub(crate) async fn fetch_url(
    client: &reqwest::Client,
    url: &str,
    max_size: usize,
) -> std::result::Result<Vec<u8>, String> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("network: {e}"))?;

    if !response.status().is_success() {
        return Err(format!("http: status {}", response.status()));
    }

    if let Some(len) = response.content_length() {
        if len > max_size as u64 {
            return Err(format!(
                "response too large: {len} bytes (maximum: {max_size} bytes)"
            ));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| format!("network: {e}"))?
    {
        if body.len() + chunk.len() > max_size {
            return Err(format!(
                "response too large: more than {max_size} bytes"
            ));
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

/// JSON Web Key Set (JWKS)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwkSet {
    /// The keys in the set
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Find the single key whose `kid` equals `kid`
    ///
    /// A token without a `kid` matches nothing. Two or more keys sharing the
    /// kid are ambiguous and rejected.
    pub fn find_key_by_kid(&self, kid: Option<&str>) -> std::result::Result<&Jwk, TokenError> {
        let Some(kid) = kid else {
            return Err(TokenError::KeyNotFound(None));
        };

        let matches: Vec<_> = self
            .keys
            .iter()
            .filter(|k| k.kid.as_deref() == Some(kid))
            .collect();

        match matches.as_slice() {
            [] => Err(TokenError::KeyNotFound(Some(kid.into()))),
            [key] => Ok(key),
            _ => Err(TokenError::AmbiguousKey {
                kid: kid.into(),
                count: matches.len(),
            }),
        }
    }
}

/// Fetch and parse a JWKS document from the given URI using the provided HTTP client
pub(crate) async fn fetch_jwks(client: &reqwest::Client, jwks_uri: &str) -> Result<JwkSet> {
    validate_jwks_uri(jwks_uri).map_err(Error::KeySet)?;

    let bytes = fetch_url(client, jwks_uri, MAX_JWKS_RESPONSE_SIZE)
        .await
        .map_err(|e| Error::KeySet(format!("jwks: {e}")))?;

    let body = std::str::from_utf8(&bytes)
        .map_err(|e| Error::KeySet(format!("jwks: utf8 decode failed: {e}")))?;

    let set: JwkSet = miniserde::json::from_str(body)
        .map_err(|_| Error::KeySet("jwks: invalid jwks json".into()))?;

    if set.keys.len() > MAX_JWK_SET_SIZE {
        return Err(Error::KeySet(format!(
            "jwks: too many keys: {} (maximum: {MAX_JWK_SET_SIZE})",
            set.keys.len()
        )));
    }

    Ok(set)
}

/// Resolves an issuer URL to its signing key set
#[derive(Debug, Clone)]
pub struct KeyDirectoryClient {
    client: reqwest::Client,
}

impl KeyDirectoryClient {
    /// Build a client with the given timeouts
    pub fn new(config: HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Discovery(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch the signing keys published by `issuer`
    ///
    /// Discovery failures are [`Error::Discovery`]; failures retrieving or
    /// parsing the key set are [`Error::KeySet`].
    pub async fn fetch_keys(&self, issuer: &str) -> Result<JwkSet> {
        let issuer = normalize_issuer(issuer);
        validate_issuer_url(issuer).map_err(Error::Discovery)?;

        let jwks_uri = discover_jwks_uri(issuer, &self.client).await?;
        debug!(issuer, jwks_uri = %jwks_uri, "resolved key set location");

        let set = fetch_jwks(&self.client, &jwks_uri).await?;
        debug!(issuer, keys = set.len(), "fetched key set");
        Ok(set)
    }
}
