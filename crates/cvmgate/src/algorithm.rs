//! Signature algorithms accepted for attestation tokens
//!
//! Only RSA signatures are accepted. Azure Attestation signs with RS256; the
//! other RSA variants share the same key material and are accepted too.
use crate::error::TokenError;

use aws_lc_rs::signature::{self, UnparsedPublicKey};

/// Algorithm identifier from the token header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmType {
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
}

impl AlgorithmType {
    pub(crate) fn from_str(s: &str) -> Result<Self, TokenError> {
        match s {
            "RS256" => Ok(AlgorithmType::RS256),
            "RS384" => Ok(AlgorithmType::RS384),
            "RS512" => Ok(AlgorithmType::RS512),
            "PS256" => Ok(AlgorithmType::PS256),
            "PS384" => Ok(AlgorithmType::PS384),
            "PS512" => Ok(AlgorithmType::PS512),
            _ => Err(TokenError::UnsupportedAlgorithm(s.into())),
        }
    }

    /// Convert to string representation
    pub const fn as_str(&self) -> &'static str {
        match self {
            AlgorithmType::RS256 => "RS256",
            AlgorithmType::RS384 => "RS384",
            AlgorithmType::RS512 => "RS512",
            AlgorithmType::PS256 => "PS256",
            AlgorithmType::PS384 => "PS384",
            AlgorithmType::PS512 => "PS512",
        }
    }

    fn verification_algorithm(&self) -> &'static dyn signature::VerificationAlgorithm {
        match self {
            AlgorithmType::RS256 => &signature::RSA_PKCS1_2048_8192_SHA256,
            AlgorithmType::RS384 => &signature::RSA_PKCS1_2048_8192_SHA384,
            AlgorithmType::RS512 => &signature::RSA_PKCS1_2048_8192_SHA512,
            AlgorithmType::PS256 => &signature::RSA_PSS_2048_8192_SHA256,
            AlgorithmType::PS384 => &signature::RSA_PSS_2048_8192_SHA384,
            AlgorithmType::PS512 => &signature::RSA_PSS_2048_8192_SHA512,
        }
    }

    /// Verify a signature using the algorithm
    ///
    /// # Arguments
    /// * `signing_input` - The data that was signed (header.payload)
    /// * `signature` - The decoded signature bytes
    /// * `key_der` - The DER-encoded public key (SubjectPublicKeyInfo)
    pub(crate) fn verify_signature(
        &self,
        signing_input: &str,
        signature: &[u8],
        key_der: &[u8],
    ) -> Result<(), TokenError> {
        let public_key = UnparsedPublicKey::new(self.verification_algorithm(), key_der);

        public_key
            .verify(signing_input.as_bytes(), signature)
            .map_err(|_| TokenError::InvalidSignature)
    }
}

impl std::fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
