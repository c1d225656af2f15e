//! Errors for cvmgate

use std::time::Duration;
use thiserror::Error;

/// Coarse classification used by callers to pick a response.
///
/// A `Denied` outcome is a legitimate refusal (bad signature, failed compliance
/// check). `Infrastructure` means the attestation could not be evaluated at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Denied,
    Infrastructure,
}

/// cvmgate Errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ============================================================================
    // Infrastructure Errors
    // ============================================================================
    #[error("Evidence collection failed: {0}")]
    Evidence(#[from] EvidenceError),

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Key set retrieval failed: {0}")]
    KeySet(String),

    // ============================================================================
    // Denials
    // ============================================================================
    #[error("Token verification error: {0}")]
    Token(#[from] TokenError),

    #[error("Claim validation failed: {0}")]
    Claim(#[from] ClaimError),
}

impl Error {
    /// Classify the failure as a denial or an infrastructure problem
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Token(_) | Error::Claim(_) => ErrorKind::Denied,
            Error::Evidence(_) | Error::Discovery(_) | Error::KeySet(_) => {
                ErrorKind::Infrastructure
            }
        }
    }

    /// Shorthand for `kind() == ErrorKind::Denied`
    pub fn is_denial(&self) -> bool {
        self.kind() == ErrorKind::Denied
    }
}

/// Failures while running the attestation client or reading its output
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvidenceError {
    #[error("failed to launch attestation client '{path}': {reason}")]
    Launch { path: String, reason: String },

    #[error("failed to prepare token file '{path}': {reason}")]
    TokenFileCreate { path: String, reason: String },

    #[error("failed while waiting for attestation client: {0}")]
    Wait(String),

    #[error("attestation client failed with code {}. Errors: {stderr}", exit_label(.code))]
    ExitFailure { code: Option<i32>, stderr: String },

    #[error("attestation client did not finish within {timeout:?}")]
    TimedOut { timeout: Duration },

    #[error("token file missing or empty: {0}")]
    TokenFileMissing(String),

    #[error("failed to read token file '{path}': {reason}")]
    TokenFileRead { path: String, reason: String },

    #[error("token file too large: {size} bytes (maximum: {max} bytes)")]
    TokenFileTooLarge { size: u64, max: u64 },

    #[error("token file content is not a valid token")]
    InvalidToken,
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".into(),
    }
}

/// Failures in token structure, key selection and signature checking
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token too large: {size} bytes (maximum: {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("missing issuer")]
    MissingIssuer,

    #[error("invalid issuer: {0}")]
    InvalidIssuer(String),

    #[error("key not found: {}", .0.as_deref().unwrap_or("<no kid>"))]
    KeyNotFound(Option<String>),

    #[error("ambiguous key: {count} keys share kid '{kid}'")]
    AmbiguousKey { kid: String, count: usize },

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("unusable key: {0}")]
    InvalidKey(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid signature")]
    InvalidSignature,
}

/// Failures in temporal or mandatory claim checks
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClaimError {
    #[error("token expired at {expired_at} (now: {now}, skew: {skew}s)")]
    Expired { expired_at: i64, now: i64, skew: u64 },

    #[error("token not valid until {not_before} (now: {now}, skew: {skew}s)")]
    NotYetValid { not_before: i64, now: i64, skew: u64 },

    #[error("required claim '{0}' is missing")]
    Missing(String),

    #[error("claim '{0}' is not a valid timestamp")]
    InvalidTimestamp(String),

    #[error("clock skew too large: {value}s (maximum: {max}s)")]
    ClockSkewTooLarge { value: u64, max: u64 },

    #[error("compliance check failed: {}", .0.as_deref().unwrap_or("null"))]
    ComplianceMismatch(Option<String>),

    #[error("secure boot is not enabled")]
    SecureBootDisabled,

    #[error("vTPM is not enabled")]
    TpmDisabled,
}

/// Result type alias for cvmgate operations
pub type Result<T> = std::result::Result<T, Error>;
