//! Request-scoped attestation flow
//!
//! One call to [`AttestationFlow::execute`] collects fresh evidence, verifies
//! the resulting token and, only if both succeed, runs the protected action.
//! Nothing is shared between calls apart from configuration.

use crate::claims::COMPLIANCE_STATUS_PATH;
use crate::error::{Error, ErrorKind, Result};
use crate::evidence::EvidenceCollector;
use crate::trail::ExecutionTrail;
use crate::verifier::{TokenVerifier, VerifiedToken};
use tracing::{error, info, warn};

/// Successful flow result
#[derive(Debug, Clone)]
pub struct Authorized {
    token: VerifiedToken,
    business_result: String,
}

impl Authorized {
    pub fn token(&self) -> &VerifiedToken {
        &self.token
    }

    pub fn business_result(&self) -> &str {
        &self.business_result
    }
}

/// Trail and outcome of one flow execution
#[derive(Debug)]
pub struct FlowReport {
    trail: ExecutionTrail,
    outcome: Result<Authorized>,
}

impl FlowReport {
    pub fn trail(&self) -> &ExecutionTrail {
        &self.trail
    }

    pub fn outcome(&self) -> &Result<Authorized> {
        &self.outcome
    }

    pub fn is_authorized(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn into_parts(self) -> (ExecutionTrail, Result<Authorized>) {
        (self.trail, self.outcome)
    }
}

/// Evidence collection and token verification in front of a protected action
#[derive(Debug, Clone)]
pub struct AttestationFlow {
    collector: EvidenceCollector,
    verifier: TokenVerifier,
}

impl AttestationFlow {
    pub fn new(collector: EvidenceCollector, verifier: TokenVerifier) -> Self {
        Self {
            collector,
            verifier,
        }
    }

    /// Run the whole flow with a fresh trail
    ///
    /// `protected_action` runs only after the token has been verified. A
    /// denial is recorded as `DENY business logic: ...`, any other failure as
    /// `ERROR: ...`, and the trail always ends with `Flow ended`.
    pub async fn execute<F>(&self, protected_action: F) -> FlowReport
    where
        F: FnOnce(&mut ExecutionTrail) -> String + Send,
    {
        let mut trail = ExecutionTrail::new();
        trail.add("Boot: starting attestation flow");

        let outcome = self.authorize(&mut trail, protected_action).await;
        match &outcome {
            Ok(_) => info!("attestation flow authorized"),
            Err(e) => record_failure(&mut trail, e),
        }

        trail.add("Flow ended");
        FlowReport { trail, outcome }
    }

    async fn authorize<F>(&self, trail: &mut ExecutionTrail, protected_action: F) -> Result<Authorized>
    where
        F: FnOnce(&mut ExecutionTrail) -> String + Send,
    {
        let raw_token = self.collector.collect(trail).await?;
        trail.add("Collected evidence and obtained MAA token");

        let token = self.verifier.verify(&raw_token).await?;
        let header = token.header();
        trail.add(format!(
            "Verified token signature (alg = {}, kid = {})",
            header.algorithm(),
            header.key_id().unwrap_or("null")
        ));
        trail.add(format!(
            "Verified claims: x-ms-compliance-status={}, secure-boot=true",
            token
                .claims()
                .string_at(&COMPLIANCE_STATUS_PATH)
                .unwrap_or_default()
        ));

        let business_result = protected_action(trail);
        Ok(Authorized {
            token,
            business_result,
        })
    }
}

fn record_failure(trail: &mut ExecutionTrail, err: &Error) {
    match err.kind() {
        ErrorKind::Denied => {
            warn!(error = %err, "attestation flow denied");
            trail.add(format!("DENY business logic: {err}"));
        }
        ErrorKind::Infrastructure => {
            error!(error = %err, "attestation flow failed");
            trail.add(format!("ERROR: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClaimError, EvidenceError, TokenError};

    #[test]
    fn test_record_failure_prefix_by_kind() {
        let mut trail = ExecutionTrail::new();
        record_failure(&mut trail, &Error::Token(TokenError::InvalidSignature));
        record_failure(&mut trail, &Error::Claim(ClaimError::SecureBootDisabled));
        record_failure(&mut trail, &Error::Evidence(EvidenceError::InvalidToken));
        record_failure(&mut trail, &Error::KeySet("jwks: http: status 502".into()));

        let steps: Vec<&str> = trail.steps().collect();
        assert!(steps[0].starts_with("DENY business logic: "));
        assert!(steps[0].ends_with("invalid signature"));
        assert!(steps[1].starts_with("DENY business logic: "));
        assert!(steps[2].starts_with("ERROR: "));
        assert!(steps[3].starts_with("ERROR: "));
    }
}
