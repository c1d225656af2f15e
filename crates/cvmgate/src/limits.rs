//! Size limit constants for input validation

use std::time::Duration;

/// Maximum length for a compact token string, and for the token file (64KB)
pub(crate) const MAX_TOKEN_LENGTH: usize = 64 * 1024;

/// Maximum size for decoded token header JSON (8KB)
pub(crate) const MAX_DECODED_HEADER_SIZE: usize = 8 * 1024;

/// Maximum size for decoded token payload JSON (64KB)
/// Attestation tokens carry large nested TEE claim trees, but must be bounded
pub(crate) const MAX_DECODED_PAYLOAD_SIZE: usize = 64 * 1024;

/// Maximum size for decoded signature bytes (1KB)
/// RSA-8192 signatures are exactly 1024 bytes
pub(crate) const MAX_DECODED_SIGNATURE_SIZE: usize = 1024;

/// Maximum length for issuer URLs (2048 characters)
pub(crate) const MAX_ISSUER_URL_LENGTH: usize = 2048;

/// Maximum length for JWKS URIs (2048 characters)
pub(crate) const MAX_JWKS_URI_LENGTH: usize = 2048;

/// Maximum size for OIDC discovery response (64KB)
pub(crate) const MAX_DISCOVERY_RESPONSE_SIZE: usize = 64 * 1024;

/// Maximum size for JWKS response (512KB)
pub(crate) const MAX_JWKS_RESPONSE_SIZE: usize = 512 * 1024;

/// Maximum number of keys in a JWK set (100 keys)
pub(crate) const MAX_JWK_SET_SIZE: usize = 100;

// ============================================================================
// JWK field size limits
// ============================================================================

/// Maximum size for Base64URL-encoded RSA modulus (n) field (12KB)
pub(crate) const MAX_JWK_N_SIZE: usize = 12 * 1024;

/// Maximum size for Base64URL-encoded RSA exponent (e) field (64 bytes)
pub(crate) const MAX_JWK_E_SIZE: usize = 64;

// ============================================================================
// Validation bounds
// ============================================================================

/// Maximum clock skew tolerance (300 seconds = 5 minutes)
pub(crate) const MAX_CLOCK_SKEW_SECONDS: u64 = 300;

// ============================================================================
// Network timeouts
// ============================================================================

/// Default connect timeout for discovery and JWKS fetches
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read timeout for discovery and JWKS fetches
pub(crate) const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound on a whole discovery or JWKS request, body included
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
