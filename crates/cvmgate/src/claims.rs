//! Claim access and validation for attestation tokens
//!
//! A [`ClaimSet`] keeps the decoded payload as a tree of
//! [`miniserde::json::Value`] nodes. Nested claims are reached with
//! [`ClaimSet::lookup`], which stops at the first missing key or non-object
//! node instead of failing on shape mismatches.
//!
//! [`ClaimValidator`] runs two independent checks:
//!
//! - temporal: `exp` and `nbf`, each only when present
//! - mandatory: the TEE compliance status and the secure boot flag of the
//!   confidential VM, as reported by Microsoft Azure Attestation

use crate::error::{ClaimError, TokenError};
use crate::limits::MAX_CLOCK_SKEW_SECONDS;
use miniserde::json::{Number, Object, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Compliance status a confidential VM must report
pub const AZURE_COMPLIANT_CVM: &str = "azure-compliant-cvm";

/// `x-ms-isolation-tee.x-ms-compliance-status`
pub const COMPLIANCE_STATUS_PATH: [&str; 2] = ["x-ms-isolation-tee", "x-ms-compliance-status"];

/// `x-ms-isolation-tee.x-ms-runtime.vm-configuration.secure-boot`
pub const SECURE_BOOT_PATH: [&str; 4] = [
    "x-ms-isolation-tee",
    "x-ms-runtime",
    "vm-configuration",
    "secure-boot",
];

/// `x-ms-isolation-tee.x-ms-runtime.vm-configuration.tpm-enabled`
pub const TPM_ENABLED_PATH: [&str; 4] = [
    "x-ms-isolation-tee",
    "x-ms-runtime",
    "vm-configuration",
    "tpm-enabled",
];

/// Decoded token payload
#[derive(Debug, Clone)]
pub struct ClaimSet {
    claims: Object,
}

impl ClaimSet {
    /// Parse a JSON object into a claim set
    pub fn from_json(json: &str) -> Result<Self, TokenError> {
        let claims: Object = miniserde::json::from_str(json)
            .map_err(|e| TokenError::Malformed(format!("payload is not a JSON object: {e}")))?;
        Ok(Self { claims })
    }

    /// Top-level claim by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Walk a path of object keys
    ///
    /// Returns `None` as soon as a key is missing or an intermediate node is
    /// not an object. An empty path yields `None`.
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.claims.get(*first)?;
        for key in rest {
            match current {
                Value::Object(map) => current = map.get(*key)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// String value at `path`, if present and a string
    pub fn string_at(&self, path: &[&str]) -> Option<&str> {
        match self.lookup(path)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean value at `path`, if present and a boolean
    pub fn bool_at(&self, path: &[&str]) -> Option<bool> {
        match self.lookup(path)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Issuer (`iss`)
    pub fn issuer(&self) -> Option<&str> {
        self.string_at(&["iss"])
    }

    /// Subject (`sub`)
    pub fn subject(&self) -> Option<&str> {
        self.string_at(&["sub"])
    }

    /// Expiration time (`exp`) in seconds since the Unix epoch
    ///
    /// Fractional values are rounded down.
    pub fn expiration(&self) -> Result<Option<i64>, ClaimError> {
        self.timestamp("exp", f64::floor)
    }

    /// Not-before time (`nbf`) in seconds since the Unix epoch
    ///
    /// Fractional values are rounded up.
    pub fn not_before(&self) -> Result<Option<i64>, ClaimError> {
        self.timestamp("nbf", f64::ceil)
    }

    /// Issued-at time (`iat`) in seconds since the Unix epoch
    pub fn issued_at(&self) -> Result<Option<i64>, ClaimError> {
        self.timestamp("iat", f64::floor)
    }

    pub fn as_object(&self) -> &Object {
        &self.claims
    }

    /// Serialize back to JSON (keys in sorted order)
    pub fn to_json(&self) -> String {
        miniserde::json::to_string(&self.claims)
    }

    fn timestamp(&self, name: &str, round: fn(f64) -> f64) -> Result<Option<i64>, ClaimError> {
        let invalid = || ClaimError::InvalidTimestamp(name.into());
        match self.claims.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(Number::U64(n))) => i64::try_from(*n).map(Some).map_err(|_| invalid()),
            Some(Value::Number(Number::I64(n))) => Ok(Some(*n)),
            Some(Value::Number(Number::F64(n))) if n.is_finite() => Ok(Some(round(*n) as i64)),
            Some(_) => Err(invalid()),
        }
    }
}

/// Configuration for claim validation
#[derive(Debug, Clone)]
pub struct ClaimPolicy {
    compliance_status: String,
    clock_skew_seconds: u64,
    require_expiration: bool,
    require_tpm: bool,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            compliance_status: AZURE_COMPLIANT_CVM.into(),
            clock_skew_seconds: 0,
            require_expiration: false,
            require_tpm: false,
        }
    }
}

impl ClaimPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the expected compliance status (compared case-insensitively)
    pub fn compliance_status(mut self, status: impl Into<String>) -> Self {
        self.compliance_status = status.into();
        self
    }

    /// Set clock skew tolerance
    ///
    /// Limited to 300 seconds; larger values are rejected during validation.
    pub fn clock_skew(mut self, seconds: u64) -> Self {
        self.clock_skew_seconds = seconds;
        self
    }

    /// Reject tokens that carry no `exp` claim
    pub fn require_expiration(mut self) -> Self {
        self.require_expiration = true;
        self
    }

    /// Additionally require `vm-configuration.tpm-enabled == true`
    pub fn require_tpm(mut self) -> Self {
        self.require_tpm = true;
        self
    }

    pub fn expected_compliance_status(&self) -> &str {
        &self.compliance_status
    }

    pub fn requires_expiration(&self) -> bool {
        self.require_expiration
    }

    pub fn requires_tpm(&self) -> bool {
        self.require_tpm
    }
}

/// Temporal and mandatory claim checks
#[derive(Debug, Clone, Default)]
pub struct ClaimValidator {
    policy: ClaimPolicy,
}

impl ClaimValidator {
    pub fn new(policy: ClaimPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ClaimPolicy {
        &self.policy
    }

    /// Check `exp` and `nbf` against the current time
    pub fn validate_temporal(&self, claims: &ClaimSet) -> Result<(), ClaimError> {
        self.validate_temporal_at(claims, current_timestamp())
    }

    /// Check `exp` and `nbf` against `now` (seconds since the Unix epoch)
    ///
    /// A missing claim is not an error unless the policy requires expiration.
    pub fn validate_temporal_at(&self, claims: &ClaimSet, now: i64) -> Result<(), ClaimError> {
        let skew = self.policy.clock_skew_seconds;
        if skew > MAX_CLOCK_SKEW_SECONDS {
            return Err(ClaimError::ClockSkewTooLarge {
                value: skew,
                max: MAX_CLOCK_SKEW_SECONDS,
            });
        }
        let skew_i64 = skew as i64;

        match claims.expiration()? {
            Some(exp) => {
                let deadline = exp
                    .checked_add(skew_i64)
                    .ok_or_else(|| ClaimError::InvalidTimestamp("exp".into()))?;
                if now >= deadline {
                    return Err(ClaimError::Expired {
                        expired_at: exp,
                        now,
                        skew,
                    });
                }
            }
            None if self.policy.require_expiration => {
                return Err(ClaimError::Missing("exp".into()));
            }
            None => {}
        }

        if let Some(nbf) = claims.not_before()? {
            let start = nbf
                .checked_sub(skew_i64)
                .ok_or_else(|| ClaimError::InvalidTimestamp("nbf".into()))?;
            if now < start {
                return Err(ClaimError::NotYetValid {
                    not_before: nbf,
                    now,
                    skew,
                });
            }
        }

        Ok(())
    }

    /// Check the compliance status and secure boot claims
    pub fn validate_mandatory(&self, claims: &ClaimSet) -> Result<(), ClaimError> {
        match claims.string_at(&COMPLIANCE_STATUS_PATH) {
            Some(status)
                if !status.is_empty()
                    && status.eq_ignore_ascii_case(&self.policy.compliance_status) => {}
            other => return Err(ClaimError::ComplianceMismatch(other.map(str::to_owned))),
        }

        if claims.bool_at(&SECURE_BOOT_PATH) != Some(true) {
            return Err(ClaimError::SecureBootDisabled);
        }

        if self.policy.require_tpm && claims.bool_at(&TPM_ENABLED_PATH) != Some(true) {
            return Err(ClaimError::TpmDisabled);
        }

        Ok(())
    }
}

/// Get current Unix timestamp
fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| std::time::Duration::from_secs(0))
        .as_secs() as i64
}
