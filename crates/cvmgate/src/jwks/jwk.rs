//! JWK (JSON Web Key) struct and conversion

use crate::algorithm::AlgorithmType;
use crate::error::TokenError;
use crate::limits::{MAX_JWK_E_SIZE, MAX_JWK_N_SIZE};
use crate::utils::base64url;
use miniserde::Deserialize;

/// JSON Web Key (JWK) structure
///
/// Only the members needed for RSA signature keys are read. Certificate
/// chains (`x5c`) and other members are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: Option<String>,
    /// Key ID
    pub kid: Option<String>,
    /// Algorithm the key is meant for, if the issuer states one
    pub alg: Option<String>,
    /// Key use (RFC 7517 Section 4.2)
    ///
    /// "sig" for signature keys, "enc" for encryption keys. If absent, the
    /// key may be used for any purpose.
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (Base64URL-encoded)
    pub n: Option<String>,
    /// RSA exponent (Base64URL-encoded)
    pub e: Option<String>,
}

impl Jwk {
    /// Reject anything but `kty == "RSA"`
    pub(crate) fn require_rsa(&self) -> Result<(), TokenError> {
        match self.kty.as_deref() {
            Some("RSA") => Ok(()),
            Some(other) => Err(TokenError::UnsupportedKeyType(other.into())),
            None => Err(TokenError::UnsupportedKeyType("<missing kty>".into())),
        }
    }

    /// Convert to a DER-encoded SubjectPublicKeyInfo usable with `algorithm`
    ///
    /// Non-RSA keys are rejected with `UnsupportedKeyType`; RSA keys whose
    /// `use` or `alg` rule out `algorithm` are rejected with `InvalidKey`.
    pub(crate) fn to_rsa_key(&self, algorithm: &AlgorithmType) -> Result<Vec<u8>, TokenError> {
        self.require_rsa()?;

        if let Some(use_val) = &self.key_use {
            if use_val != "sig" {
                return Err(TokenError::InvalidKey(format!(
                    "key use mismatch: expected 'sig', found '{use_val}'"
                )));
            }
        }

        if let Some(jwk_alg) = &self.alg {
            if jwk_alg != algorithm.as_str() {
                return Err(TokenError::InvalidKey(format!(
                    "key is for {jwk_alg}, token is signed with {algorithm}"
                )));
            }
        }

        // Base64URL: 4 chars -> 3 bytes
        const MAX_DECODED_JWK_N: usize = (MAX_JWK_N_SIZE * 3) / 4;
        const MAX_DECODED_JWK_E: usize = (MAX_JWK_E_SIZE * 3) / 4;

        let n = self
            .n
            .as_deref()
            .ok_or_else(|| TokenError::InvalidKey("rsa key missing n (modulus)".into()))?;
        let e = self
            .e
            .as_deref()
            .ok_or_else(|| TokenError::InvalidKey("rsa key missing e (exponent)".into()))?;

        if n.len() > MAX_JWK_N_SIZE {
            return Err(TokenError::InvalidKey(format!(
                "n too large: {} bytes (maximum: {MAX_JWK_N_SIZE} bytes)",
                n.len()
            )));
        }
        if e.len() > MAX_JWK_E_SIZE {
            return Err(TokenError::InvalidKey(format!(
                "e too large: {} bytes (maximum: {MAX_JWK_E_SIZE} bytes)",
                e.len()
            )));
        }

        let n_bytes = base64url::decode_bytes(n, MAX_DECODED_JWK_N)
            .map_err(|e| TokenError::InvalidKey(format!("failed to decode n: {e}")))?;
        let e_bytes = base64url::decode_bytes(e, MAX_DECODED_JWK_E)
            .map_err(|e| TokenError::InvalidKey(format!("failed to decode e: {e}")))?;

        crate::utils::der::rsa_spki_from_n_e(&n_bytes, &e_bytes).map_err(TokenError::InvalidKey)
    }
}
