//! Attestation-gated authorization for confidential VMs.
//!
//! Collects an attestation token from the platform attestation client,
//! verifies it against the keys its issuer publishes, and enforces the
//! compliance and secure boot claims before a protected action may run.

mod error;
mod jwks;

// Internal modules
pub(crate) mod algorithm;
pub(crate) mod claims;
pub(crate) mod discovery;
pub(crate) mod evidence;
pub(crate) mod flow;
pub(crate) mod header;
pub(crate) mod trail;
pub(crate) mod url;
pub(crate) mod utils;
pub(crate) mod verifier;

// Public Interface
pub use algorithm::AlgorithmType;
pub use claims::{
    AZURE_COMPLIANT_CVM, COMPLIANCE_STATUS_PATH, ClaimPolicy, ClaimSet, ClaimValidator,
    SECURE_BOOT_PATH, TPM_ENABLED_PATH,
};
pub use error::{ClaimError, Error, ErrorKind, EvidenceError, Result, TokenError};
pub use evidence::{EvidenceCollector, EvidenceConfig, TokenFileMode};
pub use flow::{AttestationFlow, Authorized, FlowReport};
pub use header::TokenHeader;
pub use jwks::{HttpConfig, Jwk, JwkSet, KeyDirectoryClient};
pub use trail::{ExecutionTrail, TrailEntry};
pub use verifier::{TokenVerifier, VerifiedToken};

/// Re-exported so callers can inspect claim values without a direct dependency
pub use miniserde::json::{Number, Object, Value};

pub(crate) mod limits;
