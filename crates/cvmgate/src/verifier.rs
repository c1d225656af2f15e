use crate::algorithm::AlgorithmType;
use crate::claims::{ClaimSet, ClaimValidator};
use crate::error::{Result, TokenError};
use crate::header::TokenHeader;
use crate::jwks::KeyDirectoryClient;
use crate::limits::{
    MAX_DECODED_HEADER_SIZE, MAX_DECODED_PAYLOAD_SIZE, MAX_DECODED_SIGNATURE_SIZE,
    MAX_TOKEN_LENGTH,
};
use crate::url::{normalize_issuer, validate_issuer_url};
use crate::utils::base64url;
use tracing::{debug, warn};

/// A token whose signature and claims have been checked
///
/// Only [`TokenVerifier::verify`] creates one.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    header: TokenHeader,
    claims: ClaimSet,
}

impl VerifiedToken {
    pub(crate) fn new(header: TokenHeader, claims: ClaimSet) -> Self {
        Self { header, claims }
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    pub fn into_parts(self) -> (TokenHeader, ClaimSet) {
        (self.header, self.claims)
    }
}

/// Token split into its segments, with header and payload decoded
struct ParsedToken<'a> {
    signing_input: &'a str,
    signature: Vec<u8>,
    header: TokenHeader,
    claims: ClaimSet,
}

/// Verifies attestation tokens against the keys their issuer publishes
///
/// The issuer is taken from the token itself, so fetched keys are only
/// trusted once the signature checks out, and claims are only looked at
/// after that.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    directory: KeyDirectoryClient,
    validator: ClaimValidator,
}

impl TokenVerifier {
    pub fn new(directory: KeyDirectoryClient, validator: ClaimValidator) -> Self {
        Self {
            directory,
            validator,
        }
    }

    /// Verify a compact JWS token string
    ///
    /// Fails with the first error encountered; nothing is returned unless
    /// every step passed.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken> {
        // 1. Parse token parts
        let parsed = Self::parse_token(token)?;

        // 2. Issuer
        let issuer = parsed
            .claims
            .issuer()
            .map(str::trim)
            .filter(|iss| !iss.is_empty())
            .ok_or(TokenError::MissingIssuer)?;

        // 3. Fetch the issuer's keys
        let issuer = normalize_issuer(issuer);
        validate_issuer_url(issuer).map_err(TokenError::InvalidIssuer)?;
        debug!(issuer, "fetching signing keys");
        let keys = self.directory.fetch_keys(issuer).await?;

        // 4. Select the key
        let kid = parsed.header.key_id();
        let jwk = keys
            .find_key_by_kid(kid)
            .and_then(|jwk| jwk.require_rsa().map(|()| jwk))
            .inspect_err(|e| warn!(issuer, kid, error = %e, "no usable signing key"))?;

        // 5. Verify signature
        let algorithm = AlgorithmType::from_str(parsed.header.algorithm())?;
        let key_der = jwk.to_rsa_key(&algorithm)?;
        algorithm
            .verify_signature(parsed.signing_input, &parsed.signature, &key_der)
            .inspect_err(|_| warn!(issuer, kid, %algorithm, "signature mismatch"))?;
        debug!(issuer, kid, %algorithm, "signature verified");

        // 6. Claims
        self.validator.validate_temporal(&parsed.claims)?;
        self.validator.validate_mandatory(&parsed.claims)?;

        // 7. Construct
        Ok(VerifiedToken::new(parsed.header, parsed.claims))
    }

    /// Split and decode the token without checking anything cryptographic
    fn parse_token(token: &str) -> std::result::Result<ParsedToken<'_>, TokenError> {
        if token.len() > MAX_TOKEN_LENGTH {
            return Err(TokenError::TooLarge {
                size: token.len(),
                max: MAX_TOKEN_LENGTH,
            });
        }

        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed(
                "expected three dot-separated segments".into(),
            ));
        };

        let header_json = base64url::decode_string(header_b64, MAX_DECODED_HEADER_SIZE)
            .map_err(|e| TokenError::Malformed(format!("header: {e}")))?;
        let header = TokenHeader::from_json(&header_json)?;

        let payload_json = base64url::decode_string(payload_b64, MAX_DECODED_PAYLOAD_SIZE)
            .map_err(|e| TokenError::Malformed(format!("payload: {e}")))?;
        let claims = ClaimSet::from_json(&payload_json)?;

        if signature_b64.is_empty() {
            return Err(TokenError::Malformed("empty signature".into()));
        }
        let signature = base64url::decode_bytes(signature_b64, MAX_DECODED_SIGNATURE_SIZE)
            .map_err(|e| TokenError::Malformed(format!("signature: {e}")))?;

        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];

        Ok(ParsedToken {
            signing_input,
            signature,
            header,
            claims,
        })
    }
}
