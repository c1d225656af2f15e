//! API endpoints for the cvmgate server

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use cvmgate::{AttestationFlow, Authorized, ExecutionTrail, Object, Value};
use miniserde::json::Array;
use tracing::info;

use crate::web_error::AppError;

/// Result handed out once attestation has passed
pub const BUSINESS_RESULT: &str = "secret-unlocked";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<AttestationFlow>,
}

// ============================================================================
// Rendering
// ============================================================================

pub(crate) fn json_response(status: StatusCode, body: Object) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        miniserde::json::to_string(&body),
    )
        .into_response()
}

pub(crate) fn trail_value(trail: &ExecutionTrail) -> Value {
    let mut steps = Array::new();
    for step in trail.steps() {
        steps.push(Value::String(step.to_owned()));
    }
    Value::Array(steps)
}

fn success_body(trail: &ExecutionTrail, authorized: &Authorized, include_details: bool) -> Object {
    let mut body = Object::new();
    body.insert("trail".into(), trail_value(trail));
    if include_details {
        let token = authorized.token();
        body.insert(
            "tokenHeader".into(),
            Value::Object(token.header().as_object().clone()),
        );
        body.insert(
            "tokenClaims".into(),
            Value::Object(token.claims().as_object().clone()),
        );
    }
    body.insert(
        "businessResult".into(),
        Value::String(authorized.business_result().to_owned()),
    );
    body
}

/// Lenient boolean query value, `false` when absent
fn parse_flag(value: Option<&String>) -> Option<bool> {
    let Some(value) = value else {
        return Some(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Stand-in for the work attestation protects
pub fn protected_action(trail: &mut ExecutionTrail) -> String {
    trail.add("Business action: allowed (attestation passed)");
    BUSINESS_RESULT.to_string()
}

/// Health check endpoint
pub async fn health_check() -> Response {
    let mut body = Object::new();
    body.insert("status".into(), Value::String("ok".into()));
    body.insert("service".into(), Value::String("cvmgate-server".into()));
    json_response(StatusCode::OK, body)
}

/// Run the attestation flow and, if it passes, the protected action
///
/// `includeDetails=true` adds the verified token header and claims to the
/// response.
pub async fn execute(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let include_details = parse_flag(params.get("includeDetails")).ok_or_else(|| {
        AppError::BadRequest("includeDetails must be a boolean".to_string())
    })?;

    let report = state.flow.execute(protected_action).await;
    let (trail, outcome) = report.into_parts();
    match outcome {
        Ok(authorized) => {
            info!(steps = trail.len(), "execute: authorized");
            Ok(json_response(
                StatusCode::OK,
                success_body(&trail, &authorized, include_details),
            ))
        }
        Err(error) => Err(AppError::Flow { trail, error }),
    }
}
